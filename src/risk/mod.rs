// Risk layer: pre-trade gate, exposure accounting, daily breakers
pub mod breakers;
pub mod exposure;
pub mod gate;

pub use breakers::{CircuitBreakerTrip, CircuitBreakers, DailyStats};
pub use exposure::{ExposureLedger, Reservation};
pub use gate::{CrossTracker, GateVerdict, RiskGate, RiskInput};
