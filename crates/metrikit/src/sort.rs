//! Ordering helpers shared by the operator passes.
//!
//! Passes visit work items in a deterministic order derived from edge
//! ratios; ties resolve by index so two runs over the same grid agree.

use itertools::Itertools;

/// Indices of `values` sorted ascending, stable on ties.
pub fn argsort_f64(values: &[f64]) -> Vec<usize> {
    (0..values.len())
        .sorted_by(|&a, &b| values[a].total_cmp(&values[b]))
        .collect()
}

/// Indices of `values` sorted descending, stable on ties.
pub fn argsort_f64_desc(values: &[f64]) -> Vec<usize> {
    (0..values.len())
        .sorted_by(|&a, &b| values[b].total_cmp(&values[a]))
        .collect()
}

/// Sorted deduplicated copy of `values`.
pub fn unique(values: &[usize]) -> Vec<usize> {
    values.iter().copied().sorted_unstable().dedup().collect()
}

/// Position of `target` in ascending `list`.
pub fn search<T: Ord>(list: &[T], target: &T) -> Option<usize> {
    list.binary_search(target).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argsort_orders_values() {
        let values = [3.0, 1.0, 2.0];
        assert_eq!(argsort_f64(&values), vec![1, 2, 0]);
        assert_eq!(argsort_f64_desc(&values), vec![0, 2, 1]);
    }

    #[test]
    fn test_argsort_stable_on_ties() {
        let values = [1.0, 1.0, 0.5, 1.0];
        assert_eq!(argsort_f64(&values), vec![2, 0, 1, 3]);
    }

    #[test]
    fn test_unique() {
        assert_eq!(unique(&[4, 2, 4, 0, 2]), vec![0, 2, 4]);
        assert!(unique(&[]).is_empty());
    }

    #[test]
    fn test_search() {
        let list = [1, 3, 5, 9];
        assert_eq!(search(&list, &5), Some(2));
        assert_eq!(search(&list, &4), None);
    }
}
