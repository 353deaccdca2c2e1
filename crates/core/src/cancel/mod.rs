//! Reservation cancellation.
//!
//! The history page takes a national id, a reservation code and a challenge
//! code; the details page it returns carries the cancel control.

mod action;
mod batch;
mod config;
mod pipeline;

pub use action::{judge_cancellation, CancelAction, CancelVerdict};
pub use batch::{run_batch, BatchItem, BatchReport, ItemResult};
pub use config::{split_pnr_list, BatchConfig, CancelConfig, CancelItem, CancelMode, CancellationTarget};
pub use pipeline::{CancelOutcome, CancelPipeline};
