//! DriftDB - version-aware diff and history queries over Git-backed tables
//!
//! This crate is the diff/history engine of a SQL database whose tables are
//! stored as immutable, content-addressed trees in a commit DAG. Differences
//! between two points in history - two commits, a dotted range, or the live
//! working state - become ordinary relational surfaces: row-level diffs,
//! schema diffs, aggregate diff statistics, generated SQL patches, and full
//! per-commit history of a table.
//!
//! # Example
//!
//! ```no_run
//! use driftdb::session::Session;
//! use driftdb::surface::{DiffRelation, DiffTableFunction};
//!
//! let session = Session::open("./my_database").unwrap();
//! let diff = DiffTableFunction::bind(&session, &["'main~1'", "'main'", "'people'"]).unwrap();
//! for partition in diff.partitions().unwrap() {
//!     for row in diff.rows_for(&partition).unwrap() {
//!         println!("{:?}", row.unwrap());
//!     }
//! }
//! ```

#![allow(dead_code)] // Many methods are for public API extensibility

pub mod catalog;
pub mod diff;
pub mod hooks;
pub mod session;
pub mod storage;
pub mod surface;
