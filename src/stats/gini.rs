/// Gini coefficient: `Σ|xi − xj| / (2 · n² · mean)` over all ordered pairs.
///
/// Zero for an empty vector and for a vector with no mass. Inputs are
/// expected to be non-negative.
pub fn gini(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    // sorted form of the pairwise sum: Σ_i (2i − n + 1) · x_(i)
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, x)| (2.0 * i as f64 - n as f64 + 1.0) * x)
        .sum();
    let mean = total / n as f64;
    // weighted is half of the ordered-pair sum
    (2.0 * weighted) / (2.0 * (n * n) as f64 * mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(values: &[f64]) -> f64 {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let mut diff = 0.0;
        for a in values {
            for b in values {
                diff += (a - b).abs();
            }
        }
        diff / (2.0 * n * n * mean)
    }

    #[test]
    fn test_uniform_is_zero() {
        assert!(gini(&[0.2, 0.2, 0.2, 0.2]).abs() < 1e-12);
        assert_eq!(gini(&[]), 0.0);
        assert_eq!(gini(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_concentrated_approaches_one() {
        let mut v = vec![0.0; 9];
        v.push(1.0);
        let g = gini(&v);
        assert!((g - 0.9).abs() < 1e-12);
        assert!(g < 1.0);
    }

    #[test]
    fn test_matches_pairwise_definition() {
        let v = [0.05, 0.4, 0.1, 0.0, 0.3, 0.15];
        assert!((gini(&v) - naive(&v)).abs() < 1e-12);
        let g = gini(&v);
        assert!((0.0..1.0).contains(&g));
    }
}
