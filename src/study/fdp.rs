//! False discovery proportion of one rejection set

/// Features whose adjusted p-value exists and lies strictly below `q`
pub fn rejections(padj: &[Option<f64>], q: f64) -> Vec<usize> {
    padj.iter()
        .enumerate()
        .filter_map(|(j, p)| match p {
            Some(p) if *p < q => Some(j),
            _ => None,
        })
        .collect()
}

/// Number of rejected features that are truly null
pub fn false_discoveries(rejected: &[usize], truly_null: &[bool]) -> usize {
    rejected.iter().filter(|&&j| truly_null[j]).count()
}

/// Share of rejected features that are truly null; 0 when nothing is rejected
pub fn fdp(rejected: &[usize], truly_null: &[bool]) -> f64 {
    if rejected.is_empty() {
        return 0.0;
    }
    false_discoveries(rejected, truly_null) as f64 / rejected.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_skip_missing() {
        let padj = vec![Some(0.01), None, Some(0.2), Some(0.049), Some(0.05)];
        assert_eq!(rejections(&padj, 0.05), vec![0, 3]);
        assert!(rejections(&padj, 0.0).is_empty());
    }

    #[test]
    fn test_fdp_empty_rejection_set() {
        assert_eq!(fdp(&[], &[true, false]), 0.0);
    }

    #[test]
    fn test_fdp_values() {
        let null = vec![true, false, true, false];
        assert_eq!(fdp(&[0, 2], &null), 1.0);
        assert_eq!(fdp(&[1, 3], &null), 0.0);
        assert_eq!(fdp(&[0, 1, 3], &null), 1.0 / 3.0);
        for rejected in [vec![0], vec![0, 1], vec![1, 2, 3], vec![0, 1, 2, 3]] {
            let v = fdp(&rejected, &null);
            assert!((0.0..=1.0).contains(&v));
        }
    }
}
