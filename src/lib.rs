//! # tongbu - continuous directory synchronization over local and SSH endpoints
//!
//! `tongbu` keeps two directory trees in sync, either one-way (a source
//! mirrored onto a target) or two-way (both sides reconciled against each
//! other with last-writer-wins and tombstoned deletes). Either side of a
//! task may be a local path or a path on a remote host reached over SSH.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tongbu::config::Config;
//! use tongbu::manager::TaskManager;
//! use tongbu::store::Store;
//! use tongbu::transport::RemoteOptions;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let store = Arc::new(Store::open(&config.state_dir.join("state.redb"))?);
//!     let remote = RemoteOptions {
//!         bin: config.remote_bin.clone(),
//!         host_key_policy: config.host_key_policy,
//!         known_hosts_path: config.ssh_known_hosts_path.clone(),
//!     };
//!     let manager = TaskManager::new(store, remote, config.batch_max_parallel);
//!     manager.auto_start().await?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod eol;
pub mod error;
pub mod filter;
pub mod logging;
pub mod manager;
pub mod oneway;
pub mod reconcile;
pub mod runner;
pub mod serve;
pub mod store;
pub mod transport;
pub mod types;
pub mod watch;

pub use config::Config;
pub use endpoint::Endpoint;
pub use error::{ReconcileError, StateError, SyncError, TransportError};
pub use manager::{TaskManager, TaskStatus};
pub use store::Store;
pub use types::{EndpointDescriptor, RemoteDescriptor, Side, SyncMode, TaskDef};

// vim: ts=4
