/// Calculate Relative Strength Index (RSI)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions. On a binary market the "price"
/// is the YES probability, so the same arithmetic applies.
///
/// Values:
/// - RSI > 60: stretched up (voters lean SHORT)
/// - RSI < 40: stretched down (voters lean LONG)
///
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }

    // Only the last `period` deltas matter
    let recent = &prices[prices.len() - (period + 1)..];
    let (gain_sum, loss_sum) = recent.windows(2).fold((0.0_f64, 0.0_f64), |(g, l), w| {
        let change = w[1] - w[0];
        if change > 0.0 {
            (g + change, l)
        } else {
            (g, l - change)
        }
    });

    if loss_sum == 0.0 {
        return Some(100.0);
    }

    let rs = gain_sum / loss_sum;
    Some(100.0 - (100.0 / (1.0 + rs)))
}
