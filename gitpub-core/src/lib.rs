//! gitpub core - publish generated content onto a git branch
//!
//! This crate maintains a local working clone of a remote repository and
//! deposits generated content onto one branch of it: the clone is reused
//! when still valid and recreated otherwise, the branch is synchronized with
//! the remote (or started as an orphan), unpreserved leftovers are removed,
//! and real changes are committed and pushed.

pub mod alternates;
pub mod commit;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod preserve;
pub mod push;
pub mod remote;
pub mod repo;
pub mod sync;

pub use config::{Config, Credentials, PublicationConfig, PublishSettings};
pub use error::{Error, Result};
pub use pipeline::{PublishOutcome, Publisher};
pub use preserve::PreserveSet;
pub use repo::PublishRepo;
