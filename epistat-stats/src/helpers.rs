//! Helper functions for statistical calculations

use epistat_core::Dataset;

/// Numeric readings of a column, skipping missing and unparseable cells
pub fn numeric_values(dataset: &Dataset, column: &str) -> Vec<f64> {
    dataset.column(column).into_iter().filter_map(|v| v.as_f64()).collect()
}

/// Calculate mean of numbers
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance (divides by n)
pub fn population_variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|x| (x - m) * (x - m)).sum();
    Some(ss / values.len() as f64)
}

/// Population standard deviation
pub fn population_sd(values: &[f64]) -> Option<f64> {
    population_variance(values).map(f64::sqrt)
}

/// Sort numbers (returns new sorted vector)
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Median with midpoint averaging for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let s = sorted(values);
    let mid = s.len() / 2;
    if s.len() % 2 == 0 {
        Some((s[mid - 1] + s[mid]) / 2.0)
    } else {
        Some(s[mid])
    }
}

/// First and third quartiles by position: s[⌊n/4⌋], s[⌊3n/4⌋]
pub fn quartiles(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let s = sorted(values);
    let n = s.len();
    let q1 = s[(n as f64 * 0.25).floor() as usize];
    let q3 = s[((n as f64 * 0.75).floor() as usize).min(n - 1)];
    Some((q1, q3))
}

/// Number of rows dropped or added for a fraction of n (floored)
pub fn fraction_of(n: usize, fraction: f64) -> usize {
    (n as f64 * fraction).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0, 5.0]), Some(3.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_population_sd() {
        let sd = population_sd(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.0).abs() < 1e-12);
        assert_eq!(population_sd(&[3.0]), Some(0.0));
    }

    #[test]
    fn test_median_and_quartiles() {
        assert_eq!(median(&[5.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(quartiles(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]), Some((3.0, 7.0)));
        assert_eq!(quartiles(&[9.0]), Some((9.0, 9.0)));
    }

    #[test]
    fn test_numeric_values_skip_missing() {
        let ds = Dataset::from_rows(&["age"], &[vec!["40"], vec!["NA"], vec!["x"], vec![" 52 "]]);
        assert_eq!(numeric_values(&ds, "age"), vec![40.0, 52.0]);
    }

    #[test]
    fn test_fraction_of() {
        assert_eq!(fraction_of(100, 0.05), 5);
        assert_eq!(fraction_of(19, 0.05), 0);
        assert_eq!(fraction_of(40, 0.95), 38);
    }
}
