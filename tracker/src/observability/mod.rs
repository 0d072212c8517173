//! Run reporting: per-message outcomes and the end-of-batch table.

mod batch_summary;
mod common;

pub use batch_summary::BatchSummary;
