//! Offline-first local data layer for a student polling client.
//!
//! Polls are mirrored in a short-lived cache, votes land in a local ledger
//! before the server sees them, and undelivered votes wait in a sync queue
//! until a later reconciliation pass gets them through.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod ledger;
pub mod models;
pub mod queue;
pub mod session;
pub mod storage;
pub mod sync;

pub use client::{PollClient, SubmissionState, VoteOutcome};
pub use config::Config;
pub use error::{PollError, Result};
