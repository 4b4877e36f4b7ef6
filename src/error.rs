use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to download CRDs from remote location {url}: {source}")]
    RemoteCrds {
        url: String,
        #[source]
        source: Box<Error>,
    },

    #[error("failure in default cleanup: {0}")]
    Cleanup(#[source] Box<Error>),

    #[error("Invalid CRD manifest {path}: {message}")]
    Manifest { path: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Manager error: {0}")]
    Manager(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("no cluster config given and the embedded control plane is not compiled in (enable the `embedded` feature)")]
    EmbeddedUnavailable,
}

/// Short alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn environment(msg: impl Into<String>) -> Self {
        Self::Environment(msg.into())
    }
    pub fn manager(msg: impl Into<String>) -> Self {
        Self::Manager(msg.into())
    }
    pub fn cleanup(err: Error) -> Self {
        Self::Cleanup(Box::new(err))
    }
    pub fn remote_crds(url: impl Into<String>, err: Error) -> Self {
        Self::RemoteCrds {
            url: url.into(),
            source: Box::new(err),
        }
    }
}
