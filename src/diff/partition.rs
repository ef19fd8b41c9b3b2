//! Diff partitions and the streaming row differ.
//!
//! A partition pairs one table's state on two sides of a diff, tagged with
//! display labels and dates. For keyed tables the row iterator merges both
//! sides' ordered row listings key by key, so neither side is materialized
//! whole and rows whose blob hashes match are skipped unread. Keyless
//! tables are merged on the content hash of each row instead, which means
//! reading both sides up front.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::catalog::{ColumnDef, DataType, TableSchema};
use crate::diff::errors::DiffResult;
use crate::diff::delta::TableDelta;
use crate::diff::resolver::RefDetails;
use crate::storage::{content_id, BlobId, Row, RowKey, TableInfo, TableName, VersionStore};

/// Row change classification, with the literal strings the diff relations
/// expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    Added,
    Removed,
    Modified,
}

impl DiffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffType::Added => "added",
            DiffType::Removed => "removed",
            DiffType::Modified => "modified",
        }
    }
}

/// One table's states on the two sides of a diff, plus display metadata.
#[derive(Debug, Clone)]
pub struct DiffPartition {
    pub from: Option<TableInfo>,
    pub to: Option<TableInfo>,
    /// commit hash, or `WORKING`, or `EMPTY`
    pub from_label: String,
    pub to_label: String,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

impl DiffPartition {
    /// Build a partition from a table delta and its resolved endpoints.
    pub fn from_delta(delta: &TableDelta, from: &RefDetails, to: &RefDetails) -> Self {
        Self {
            from: delta.from.clone(),
            to: delta.to.clone(),
            from_label: from.hash_label.clone(),
            to_label: to.hash_label.clone(),
            from_date: from.timestamp,
            to_date: to.timestamp,
        }
    }

    /// the table's current name: to-name, falling back to from-name
    pub fn curr_name(&self) -> &TableName {
        match (&self.to, &self.from) {
            (Some(to), _) => &to.name,
            (None, Some(from)) => &from.name,
            (None, None) => unreachable!("partition with neither side"),
        }
    }

    pub fn from_schema(&self) -> Option<&TableSchema> {
        self.from.as_ref().map(|t| &t.schema)
    }

    pub fn to_schema(&self) -> Option<&TableSchema> {
        self.to.as_ref().map(|t| &t.schema)
    }

    /// true when neither side's schema declares a primary key
    pub fn is_keyless(&self) -> bool {
        let from_keyless = self.from.as_ref().map_or(true, |t| t.schema.is_keyless());
        let to_keyless = self.to.as_ref().map_or(true, |t| t.schema.is_keyless());
        from_keyless && to_keyless
    }

    /// Deterministic identity bytes: the two subtree hashes.
    pub fn key(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(80);
        match &self.from {
            Some(t) => bytes.extend_from_slice(t.subtree.to_string().as_bytes()),
            None => bytes.extend_from_slice(b"EMPTY"),
        }
        bytes.push(b':');
        match &self.to {
            Some(t) => bytes.extend_from_slice(t.subtree.to_string().as_bytes()),
            None => bytes.extend_from_slice(b"EMPTY"),
        }
        bytes
    }
}

/// Schema of a row-diff relation: every to-side column prefixed `to_`, then
/// every from-side column prefixed `from_`, then the trailing `diff_type`.
///
/// All projected columns are nullable; one side of an add or remove is
/// entirely absent.
pub fn diff_schema(from: Option<&TableSchema>, to: Option<&TableSchema>) -> Vec<ColumnDef> {
    let mut columns = Vec::new();

    if let Some(to) = to {
        for col in &to.columns {
            columns.push(ColumnDef::new(format!("to_{}", col.name), col.data_type, true));
        }
    }
    if let Some(from) = from {
        for col in &from.columns {
            columns.push(ColumnDef::new(format!("from_{}", col.name), col.data_type, true));
        }
    }

    columns.push(ColumnDef::new("diff_type", DataType::Text, true));
    columns
}

/// One changed row: classification plus whichever images exist.
#[derive(Debug, Clone)]
pub struct DiffRow {
    pub diff_type: DiffType,
    pub from: Option<Row>,
    pub to: Option<Row>,
}

impl DiffRow {
    /// Project into the `diff_schema` column order.
    pub fn project(&self, from_schema: Option<&TableSchema>, to_schema: Option<&TableSchema>) -> Vec<Value> {
        let mut values = Vec::new();

        if let Some(schema) = to_schema {
            for col in &schema.columns {
                let v = self
                    .to
                    .as_ref()
                    .and_then(|row| row.get(&col.name).cloned())
                    .unwrap_or(Value::Null);
                values.push(v);
            }
        }
        if let Some(schema) = from_schema {
            for col in &schema.columns {
                let v = self
                    .from
                    .as_ref()
                    .and_then(|row| row.get(&col.name).cloned())
                    .unwrap_or(Value::Null);
                values.push(v);
            }
        }

        values.push(Value::String(self.diff_type.as_str().to_string()));
        values
    }
}

/// Pull-based iterator over a partition's changed rows.
///
/// Keyed tables merge on row key; a key present on both sides with equal
/// blob hashes is skipped unread, differing hashes produce exactly one
/// `Modified` row carrying both images. Keyless tables match rows by
/// the content hash of their column data (storage key excluded), so only
/// adds and removes exist and a row re-inserted under a new generated key
/// cancels out.
pub struct DiffPartitionRowIter {
    store: VersionStore,
    from_rows: Vec<(RowKey, BlobId)>,
    to_rows: Vec<(RowKey, BlobId)>,
    from_content: Vec<(BlobId, Row)>,
    to_content: Vec<(BlobId, Row)>,
    from_idx: usize,
    to_idx: usize,
    keyless: bool,
    closed: bool,
}

/// Read every row on one side and sort by content hash. Keyless merging
/// has to look at row contents, so laziness buys nothing here.
fn keyless_listing(store: &VersionStore, rows: &[(RowKey, BlobId)]) -> DiffResult<Vec<(BlobId, Row)>> {
    let mut out = Vec::with_capacity(rows.len());
    for (key, blob) in rows {
        let row = store.read_row_blob(*blob, key)?;
        let id = content_id(&row)?;
        out.push((id, row));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

impl DiffPartitionRowIter {
    /// Open the iterator. Keyed partitions fetch only the ordered listings;
    /// keyless partitions also read both sides to hash their contents.
    pub fn open(store: &VersionStore, partition: &DiffPartition) -> DiffResult<Self> {
        let mut from_rows = match &partition.from {
            Some(info) => store.list_rows(info.subtree)?,
            None => Vec::new(),
        };
        let mut to_rows = match &partition.to {
            Some(info) => store.list_rows(info.subtree)?,
            None => Vec::new(),
        };

        let keyless = partition.is_keyless();
        let (from_content, to_content) = if keyless {
            let from = keyless_listing(store, &from_rows)?;
            let to = keyless_listing(store, &to_rows)?;
            from_rows.clear();
            to_rows.clear();
            (from, to)
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(Self {
            store: store.clone(),
            from_rows,
            to_rows,
            from_content,
            to_content,
            from_idx: 0,
            to_idx: 0,
            keyless,
            closed: false,
        })
    }

    /// Stop iterating without draining. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }

    fn read(&self, blob: BlobId, key: &RowKey) -> DiffResult<Row> {
        Ok(self.store.read_row_blob(blob, key)?)
    }

    fn next_keyed(&mut self) -> Option<DiffResult<DiffRow>> {
        loop {
            let from = self.from_rows.get(self.from_idx).cloned();
            let to = self.to_rows.get(self.to_idx).cloned();

            match (from, to) {
                (None, None) => return None,
                (Some((key, blob)), None) => {
                    self.from_idx += 1;
                    return Some(self.read(blob, &key).map(|row| DiffRow {
                        diff_type: DiffType::Removed,
                        from: Some(row),
                        to: None,
                    }));
                }
                (None, Some((key, blob))) => {
                    self.to_idx += 1;
                    return Some(self.read(blob, &key).map(|row| DiffRow {
                        diff_type: DiffType::Added,
                        from: None,
                        to: Some(row),
                    }));
                }
                (Some((from_key, from_blob)), Some((to_key, to_blob))) => {
                    match from_key.cmp(&to_key) {
                        std::cmp::Ordering::Less => {
                            self.from_idx += 1;
                            return Some(self.read(from_blob, &from_key).map(|row| DiffRow {
                                diff_type: DiffType::Removed,
                                from: Some(row),
                                to: None,
                            }));
                        }
                        std::cmp::Ordering::Greater => {
                            self.to_idx += 1;
                            return Some(self.read(to_blob, &to_key).map(|row| DiffRow {
                                diff_type: DiffType::Added,
                                from: None,
                                to: Some(row),
                            }));
                        }
                        std::cmp::Ordering::Equal => {
                            self.from_idx += 1;
                            self.to_idx += 1;

                            // identical content hash: unchanged, skip unread
                            if from_blob == to_blob {
                                continue;
                            }

                            let result = self.read(from_blob, &from_key).and_then(|from_row| {
                                let to_row = self.read(to_blob, &to_key)?;
                                Ok(DiffRow {
                                    diff_type: DiffType::Modified,
                                    from: Some(from_row),
                                    to: Some(to_row),
                                })
                            });
                            return Some(result);
                        }
                    }
                }
            }
        }
    }

    fn next_keyless(&mut self) -> Option<DiffResult<DiffRow>> {
        loop {
            let from = self.from_content.get(self.from_idx).cloned();
            let to = self.to_content.get(self.to_idx).cloned();

            match (from, to) {
                (None, None) => return None,
                (Some((_, row)), None) => {
                    self.from_idx += 1;
                    return Some(Ok(DiffRow {
                        diff_type: DiffType::Removed,
                        from: Some(row),
                        to: None,
                    }));
                }
                (None, Some((_, row))) => {
                    self.to_idx += 1;
                    return Some(Ok(DiffRow {
                        diff_type: DiffType::Added,
                        from: None,
                        to: Some(row),
                    }));
                }
                (Some((from_id, from_row)), Some((to_id, to_row))) => {
                    match from_id.cmp(&to_id) {
                        std::cmp::Ordering::Equal => {
                            // same content on both sides: cancels out
                            self.from_idx += 1;
                            self.to_idx += 1;
                            continue;
                        }
                        std::cmp::Ordering::Less => {
                            self.from_idx += 1;
                            return Some(Ok(DiffRow {
                                diff_type: DiffType::Removed,
                                from: Some(from_row),
                                to: None,
                            }));
                        }
                        std::cmp::Ordering::Greater => {
                            self.to_idx += 1;
                            return Some(Ok(DiffRow {
                                diff_type: DiffType::Added,
                                from: None,
                                to: Some(to_row),
                            }));
                        }
                    }
                }
            }
        }
    }
}

impl Iterator for DiffPartitionRowIter {
    type Item = DiffResult<DiffRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        if self.keyless {
            self.next_keyless()
        } else {
            self.next_keyed()
        }
    }
}

/// Predicate over a partition's commit-label / commit-date pseudo-columns,
/// letting history-mode consumers skip partitions without opening them.
#[derive(Debug, Clone)]
pub enum PartitionFilter {
    ToLabel(String),
    ToDateAfter(DateTime<Utc>),
    ToDateBefore(DateTime<Utc>),
}

impl PartitionFilter {
    pub fn matches(&self, partition: &DiffPartition) -> bool {
        match self {
            PartitionFilter::ToLabel(label) => partition.to_label == *label,
            PartitionFilter::ToDateAfter(cutoff) => {
                partition.to_date.map_or(true, |d| d >= *cutoff)
            }
            PartitionFilter::ToDateBefore(cutoff) => {
                partition.to_date.map_or(true, |d| d <= *cutoff)
            }
        }
    }
}

/// Apply a conjunction of filters.
pub fn filter_partitions(partitions: Vec<DiffPartition>, filters: &[PartitionFilter]) -> Vec<DiffPartition> {
    partitions
        .into_iter()
        .filter(|p| filters.iter().all(|f| f.matches(p)))
        .collect()
}
