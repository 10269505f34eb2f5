//! Recall measurement against ground truth.

use crate::result::{QueryResult, PAD_ID};

/// Fraction of each ground-truth row's first `k` ids that appear in the
/// first `n` ids of the corresponding result row, averaged over queries.
///
/// Rows are matched positionally; padded entries are ignored. Returns 1.0
/// for an empty query set.
pub fn k_recall_at_n(groundtruth: &QueryResult, result: &QueryResult, k: usize, n: usize) -> f64 {
    assert_eq!(groundtruth.num_queries(), result.num_queries(), "query counts differ");
    let queries = groundtruth.num_queries();
    if queries == 0 {
        return 1.0;
    }
    let k = k.min(groundtruth.num_neighbors());
    let n = n.min(result.num_neighbors());

    let mut found = 0usize;
    let mut expected = 0usize;
    for q in 0..queries {
        let truth: Vec<u64> =
            groundtruth.row_ids(q)[..k].iter().copied().filter(|&id| id != PAD_ID).collect();
        let got = &result.row_ids(q)[..n];
        expected += truth.len();
        found += truth.iter().filter(|id| got.contains(id)).count();
    }
    if expected == 0 {
        return 1.0;
    }
    found as f64 / expected as f64
}

/// Shorthand for recall@k against ground truth of the same width.
pub fn recall(groundtruth: &QueryResult, result: &QueryResult) -> f64 {
    let k = groundtruth.num_neighbors();
    k_recall_at_n(groundtruth, result, k, k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[u64]]) -> QueryResult {
        let width = rows[0].len();
        let mut result = QueryResult::new(rows.len(), width, f32::INFINITY);
        for (i, row) in rows.iter().enumerate() {
            for (j, &id) in row.iter().enumerate() {
                result.write_entry(i, j, id, j as f32);
            }
        }
        result
    }

    #[test]
    fn perfect_match_is_one() {
        let gt = matrix(&[&[1, 2, 3], &[4, 5, 6]]);
        assert_eq!(recall(&gt, &gt), 1.0);
    }

    #[test]
    fn order_within_the_row_does_not_matter() {
        let gt = matrix(&[&[1, 2, 3]]);
        let got = matrix(&[&[3, 1, 2]]);
        assert_eq!(recall(&gt, &got), 1.0);
    }

    #[test]
    fn misses_lower_recall() {
        let gt = matrix(&[&[1, 2], &[3, 4]]);
        let got = matrix(&[&[1, 9], &[8, 7]]);
        assert!((recall(&gt, &got) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn padded_ground_truth_entries_are_ignored() {
        let gt = matrix(&[&[1, PAD_ID]]);
        let got = matrix(&[&[1, 5]]);
        assert_eq!(recall(&gt, &got), 1.0);
    }

    #[test]
    fn empty_query_set_is_vacuously_perfect() {
        let gt = QueryResult::new(0, 3, f32::INFINITY);
        let got = QueryResult::new(0, 3, f32::INFINITY);
        assert_eq!(recall(&gt, &got), 1.0);
    }
}
