// Indicator arithmetic consumed by the voters
pub mod rsi;
pub mod vwap;

pub use rsi::calculate_rsi;
pub use vwap::{calculate_vwap, vwap_deviation_pct};

/// Percentage change between the first and last element of a slice.
pub fn pct_change(prices: &[f64]) -> Option<f64> {
    let first = *prices.first()?;
    let last = *prices.last()?;
    if first == 0.0 {
        return None;
    }
    Some((last - first) / first * 100.0)
}

/// Coefficient-of-variation volatility over the slice, clamped to `max`.
pub fn clamped_volatility(prices: &[f64], max: f64) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }
    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let var = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / prices.len() as f64;
    (var.sqrt() / mean).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct_change() {
        let prices = vec![100.0, 101.0, 102.0];
        assert!((pct_change(&prices).unwrap() - 2.0).abs() < 1e-9);
        assert!(pct_change(&[]).is_none());
    }

    #[test]
    fn test_volatility_clamped() {
        let flat = vec![0.5; 10];
        assert_eq!(clamped_volatility(&flat, 0.3), 0.0);

        let wild = vec![0.1, 0.9, 0.1, 0.9, 0.1, 0.9];
        assert_eq!(clamped_volatility(&wild, 0.3), 0.3);
    }
}
