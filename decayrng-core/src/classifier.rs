//! Bucket classification against a boundary table

use crate::calibrator::BoundaryTable;

/// Map an interval to a bucket index in `[0, bucket_count - 1]`
///
/// Upper-bound search: the index of the first threshold strictly greater than
/// `interval`, or `bucket_count - 1` past the last threshold. Buckets are
/// half-open `[B_k, B_{k+1})`, so a value equal to a threshold starts the
/// bucket that threshold opens. NaN compares false everywhere and lands in
/// bucket 0.
pub fn classify(interval: f64, table: &BoundaryTable) -> usize {
    table.boundaries().partition_point(|&b| b <= interval)
}
