//! The relade load-test republishing tool.
//!
//! This library supports the relade binary found elsewhere in this project.
//! It ingests an Artillery result artifact, rebases every timestamp onto a
//! chosen time of day and republishes the per-request records into
//! Elasticsearch, optionally copying documents from other clusters in the
//! same window so they chart alongside the load-test data.

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

pub mod artifact;
pub mod config;
pub mod copier;
pub mod document;
pub mod normalize;
pub mod rebase;
