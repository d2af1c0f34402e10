//! Elasticsearch support for the relade project
//!
//! This crate holds the bulk-document model and the thin REST client the
//! rest of the project ingests through. Nothing here knows about rebasing or
//! load tests, only about getting documents into and out of a cluster.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod client;
pub mod document;

pub use client::{Client, Credentials};
pub use document::{BulkDocument, SourceDocument};
