//! kube-integration — ephemeral Kubernetes control planes for integration tests.
//!
//! [`TestManager`] starts a kube-apiserver + etcd (or attaches to an existing
//! cluster), installs CRDs from local directories, remote URLs or Rust types,
//! hands out a client, and runs controllers until [`TestManager::cleanup`].

pub mod config;
pub mod crd;
pub mod download;
pub mod environment;
pub mod error;
pub mod harness;
pub mod helpers;
pub mod manager;
pub mod operation;

pub use config::{
    with_builder, with_cleaners, with_crd_directory_paths, with_crds, with_download_timeout,
    with_manager_options, with_remote_crd_paths, with_remote_path, Config, ConfigOption,
};
pub use environment::Environment;
pub use error::{Error, Result};
pub use harness::TestManager;
pub use manager::{Context, Manager, ManagerOptions};
pub use operation::{crd_cleaner, noop_builder, operation, remote_dir_cleaner, Operation};
