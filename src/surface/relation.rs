//! The relational surface contract.
//!
//! Every diff surface is the same shape: a fixed column list, a set of
//! partitions, and a row stream per partition. Composing the three keeps
//! planners free to prune partitions before any row is read.

use serde_json::Value;

use crate::catalog::ColumnDef;
use crate::diff::{DiffPartition, DiffResult};

/// A stream of projected rows.
pub type RowStream = Box<dyn Iterator<Item = DiffResult<Vec<Value>>>>;

/// A virtual table over diff output.
pub trait DiffRelation {
    /// Columns of this relation, in projection order.
    fn schema(&self) -> Vec<ColumnDef>;

    /// The relation's partitions. Callers may reorder or skip them.
    fn partitions(&self) -> DiffResult<Vec<DiffPartition>>;

    /// Open a row stream over one partition.
    fn rows_for(&self, partition: &DiffPartition) -> DiffResult<RowStream>;

    /// All rows across all partitions, in partition order.
    fn rows(&self) -> DiffResult<RowStream> {
        let mut streams = Vec::new();
        for partition in self.partitions()? {
            streams.push(self.rows_for(&partition)?);
        }
        Ok(Box::new(streams.into_iter().flatten()))
    }
}
