//! The diff engine.
//!
//! Everything between two resolved roots happens here: ref and range
//! resolution, table-level delta detection, streaming row diffs, aggregate
//! statistics, SQL patch generation, and per-table history.
//!
//! The engine never mutates; every operation reads immutable trees, so
//! concurrent diffs over the same store need no coordination.

pub mod delta;
pub mod errors;
pub mod history;
pub mod partition;
pub mod patch;
pub mod resolver;
pub mod stats;

pub use delta::{can_diff_data, table_deltas, TableDelta};
pub use errors::{DiffError, DiffResult};
pub use history::{history_schema, HistoryPartitions, HistoryRowIter};
pub use partition::{
    diff_schema, filter_partitions, DiffPartition, DiffPartitionRowIter, DiffRow, DiffType,
    PartitionFilter,
};
pub use patch::{patch_rows, PatchRow};
pub use resolver::{
    resolve_endpoints, resolve_range, resolve_range_expr, resolve_ref, RefDetails, RefRange,
    EMPTY_LABEL, WORKING_REF,
};
pub use stats::{table_diff_stat, DiffStatistics};
