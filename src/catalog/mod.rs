//! Schema catalog: table schemas, data types, and comparison rules.

mod schema;
mod types;

pub use schema::{primary_key_sets_diffable, schemas_equal, TableSchema};
pub use types::{ColumnDef, DataType, ForeignKey};
