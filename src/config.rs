//! Harness configuration and the options that modify it.

use std::path::PathBuf;
use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

use crate::manager::ManagerOptions;
use crate::operation::{crd_cleaner, noop_builder, Operation};

/// Where remote CRDs are downloaded unless overridden.
pub const REMOTE_PATH: &str = "./tmp-test";

/// Per-request limit when fetching remote CRDs.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a `TestManager`.
pub struct Config {
    pub remote_crd_paths: Vec<String>,
    pub crd_directory_paths: Vec<PathBuf>,
    pub crds: Vec<CustomResourceDefinition>,
    pub builder: Operation,
    pub cleaners: Vec<Operation>,
    pub manager_options: ManagerOptions,
    pub remote_path: PathBuf,
    pub download_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_crd_paths: vec![],
            crd_directory_paths: vec![],
            crds: vec![],
            builder: noop_builder(),
            cleaners: vec![crd_cleaner()],
            manager_options: ManagerOptions::default(),
            remote_path: PathBuf::from(REMOTE_PATH),
            download_timeout: DOWNLOAD_TIMEOUT,
        }
    }
}

impl Config {
    /// Apply options in order; a later option overrides an earlier one.
    pub fn apply(mut self, options: impl IntoIterator<Item = ConfigOption>) -> Self {
        for option in options {
            option(&mut self);
        }
        self
    }

    /// The local CRD directories followed by the remote download directory,
    /// unless it is already listed.
    pub fn crd_directories(&self) -> Vec<PathBuf> {
        let mut dirs = self.crd_directory_paths.clone();
        if !dirs.contains(&self.remote_path) {
            dirs.push(self.remote_path.clone());
        }
        dirs
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("remote_crd_paths", &self.remote_crd_paths)
            .field("crd_directory_paths", &self.crd_directory_paths)
            .field("crds", &self.crds.len())
            .field("cleaners", &self.cleaners.len())
            .field("manager_options", &self.manager_options)
            .field("remote_path", &self.remote_path)
            .field("download_timeout", &self.download_timeout)
            .finish()
    }
}

/// Configures a [`Config`].
pub type ConfigOption = Box<dyn FnOnce(&mut Config) + Send>;

/// Set a custom builder.
pub fn with_builder(builder: Operation) -> ConfigOption {
    Box::new(move |c| c.builder = builder)
}

/// Replace the cleaners.
pub fn with_cleaners(cleaners: impl IntoIterator<Item = Operation>) -> ConfigOption {
    let cleaners: Vec<_> = cleaners.into_iter().collect();
    Box::new(move |c| c.cleaners = cleaners)
}

/// Replace the local CRD directories.
pub fn with_crd_directory_paths<P: Into<PathBuf>>(
    paths: impl IntoIterator<Item = P>,
) -> ConfigOption {
    let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
    Box::new(move |c| c.crd_directory_paths = paths)
}

/// Replace the remote CRD locations.
pub fn with_remote_crd_paths<S: Into<String>>(urls: impl IntoIterator<Item = S>) -> ConfigOption {
    let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
    Box::new(move |c| c.remote_crd_paths = urls)
}

/// Set the options for the controller manager.
pub fn with_manager_options(options: ManagerOptions) -> ConfigOption {
    Box::new(move |c| c.manager_options = options)
}

/// Replace the in-memory CRDs, typically built with `CustomResourceExt::crd()`.
pub fn with_crds(crds: impl IntoIterator<Item = CustomResourceDefinition>) -> ConfigOption {
    let crds: Vec<_> = crds.into_iter().collect();
    Box::new(move |c| c.crds = crds)
}

/// Download remote CRDs somewhere other than [`REMOTE_PATH`].
pub fn with_remote_path(path: impl Into<PathBuf>) -> ConfigOption {
    let path = path.into();
    Box::new(move |c| c.remote_path = path)
}

/// Limit how long each remote CRD download may take.
pub fn with_download_timeout(timeout: Duration) -> ConfigOption {
    Box::new(move |c| c.download_timeout = timeout)
}
