/// Volume-weighted average price over paired price/volume slices.
///
/// Falls back to a simple mean when no volume information is available
/// (the quote feed only carries top-of-book, volumes arrive sparsely).
pub fn calculate_vwap(prices: &[f64], volumes: &[f64]) -> Option<f64> {
    if prices.is_empty() {
        return None;
    }

    if volumes.len() == prices.len() {
        let total_volume: f64 = volumes.iter().sum();
        if total_volume > 0.0 {
            let weighted: f64 = prices.iter().zip(volumes).map(|(p, v)| p * v).sum();
            return Some(weighted / total_volume);
        }
    }

    Some(prices.iter().sum::<f64>() / prices.len() as f64)
}

/// Deviation of the current price from VWAP, in percent.
pub fn vwap_deviation_pct(current: f64, vwap: f64) -> Option<f64> {
    if vwap == 0.0 {
        return None;
    }
    Some((current - vwap) / vwap * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vwap_weighted() {
        let prices = vec![0.40, 0.60];
        let volumes = vec![3.0, 1.0];
        let vwap = calculate_vwap(&prices, &volumes).unwrap();
        assert!((vwap - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_vwap_no_volume_falls_back_to_mean() {
        let prices = vec![0.40, 0.60];
        let vwap = calculate_vwap(&prices, &[]).unwrap();
        assert!((vwap - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_deviation() {
        let dev = vwap_deviation_pct(0.505, 0.50).unwrap();
        assert!((dev - 1.0).abs() < 1e-9);
        assert!(vwap_deviation_pct(0.5, 0.0).is_none());
    }
}
