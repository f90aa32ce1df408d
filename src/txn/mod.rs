//! Crash-recoverable thread transactions.

pub mod pending;
pub mod pipeline;
pub mod recovery;

pub use pending::{Op, PendingName};
pub use pipeline::{apply, Building, Staged};
pub use recovery::{recover, RecoveryReport};
