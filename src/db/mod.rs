// SQLite position ledger
pub mod store;

pub use store::Store;
