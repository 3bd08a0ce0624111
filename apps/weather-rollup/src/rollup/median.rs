use super::RollupError;

/// Median of `values`: middle element after sorting, or the mean of the two middle
/// elements for even lengths.
pub fn median(values: &[f64]) -> Result<f64, RollupError> {
    if values.is_empty() {
        return Err(RollupError::EmptyReduction);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let half = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Ok(sorted[half])
    } else {
        Ok((sorted[half - 1] + sorted[half]) / 2.0)
    }
}
