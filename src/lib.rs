//! Leader-side rebuild coordination service for a distributed object
//! store: schedules rebuild tasks, drives the broadcast/query/finalize
//! protocol against live targets, and aggregates per-target progress into
//! one status a caller can poll.

pub mod aggregator;
pub mod config;
pub mod driver;
pub mod error;
pub mod finalize;
pub mod logging;
pub mod model;
pub mod pool;
pub mod scheduler;
pub mod state;
pub mod testutil;
pub mod worker;

pub use error::RebuildError;
pub use model::{RankList, RebuildStatus, RebuildTask};
pub use state::{GlobalRebuild, RebuildPhase};
