//! Relational surfaces over diff output.
//!
//! Each surface implements [`DiffRelation`]: a fixed schema, a partition
//! list, and a row stream per partition. Argument strings are validated and
//! resolved at bind time in [`bind`], so a malformed call never reaches row
//! iteration.

pub mod bind;
pub mod relation;
pub mod schema_diff;
pub mod tables;

pub use bind::{literal_arg, BoundDiff};
pub use relation::{DiffRelation, RowStream};
pub use schema_diff::SchemaDiffTable;
pub use tables::{DiffStatTableFunction, DiffTableFunction, HistoryTable, PatchTableFunction};
