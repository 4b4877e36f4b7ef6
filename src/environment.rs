//! The control plane tests run against: an embedded kube-apiserver + etcd
//! started through envtest, or an existing cluster reached through a
//! `kube::Config`.

use std::path::PathBuf;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::config::Kubeconfig;
use kube::{Client, Config};
use tracing::info;

use crate::crd;
use crate::error::{Error, Result};

/// Describes a running control plane. Cheap to clone, handed to every
/// builder and cleaner.
#[derive(Clone)]
pub struct Environment {
    pub crd_directory_paths: Vec<PathBuf>,
    pub crds: Vec<CustomResourceDefinition>,
    pub config: Config,
    /// Kubeconfig of the embedded control plane; `None` for an existing cluster.
    pub kubeconfig: Option<Kubeconfig>,
    pub use_existing_cluster: bool,
    pub remote_path: PathBuf,
}

impl Environment {
    /// Every CRD this environment installs: directory manifests first, then
    /// the in-memory definitions.
    pub fn all_crds(&self) -> Result<Vec<CustomResourceDefinition>> {
        let mut crds = crd::read_all(&self.crd_directory_paths)?;
        crds.extend(self.crds.iter().cloned());
        Ok(crds)
    }

    pub fn client(&self) -> Result<Client> {
        Ok(Client::try_from(self.config.clone())?)
    }
}

/// What `ControlPlane::start` needs to know before a config exists.
pub struct EnvironmentSpec {
    pub crd_directory_paths: Vec<PathBuf>,
    pub crds: Vec<CustomResourceDefinition>,
    pub config: Option<Config>,
    pub remote_path: PathBuf,
}

/// Owns whatever has to be shut down when the environment is stopped.
pub struct ControlPlane {
    env: Environment,
    #[cfg(feature = "embedded")]
    server: Option<envtest::Server>,
}

impl ControlPlane {
    /// Start the control plane and install every CRD into it.
    pub async fn start(spec: EnvironmentSpec) -> Result<Self> {
        let EnvironmentSpec {
            crd_directory_paths,
            crds,
            config,
            remote_path,
        } = spec;

        match config {
            Some(config) => {
                let env = Environment {
                    crd_directory_paths,
                    crds,
                    config,
                    kubeconfig: None,
                    use_existing_cluster: true,
                    remote_path,
                };
                let all = env.all_crds()?;
                crd::install(&env.client()?, &all).await?;
                info!(crds = all.len(), "attached to existing cluster");
                Ok(Self {
                    env,
                    #[cfg(feature = "embedded")]
                    server: None,
                })
            }
            None => Self::start_embedded(crd_directory_paths, crds, remote_path).await,
        }
    }

    #[cfg(feature = "embedded")]
    async fn start_embedded(
        crd_directory_paths: Vec<PathBuf>,
        crds: Vec<CustomResourceDefinition>,
        remote_path: PathBuf,
    ) -> Result<Self> {
        use kube::config::KubeConfigOptions;

        let mut all = crd::read_all(&crd_directory_paths)?;
        all.extend(crds.iter().cloned());
        let count = all.len();

        let mut envtest_env = envtest::Environment::default();
        let envtest_env = envtest_env
            .with_crds(all)
            .map_err(|e| Error::environment(format!("configuring CRDs: {e}")))?;
        let server = envtest_env
            .create()
            .map_err(|e| Error::environment(format!("starting envtest server: {e}")))?;
        let kubeconfig = server
            .kubeconfig()
            .map_err(|e| Error::environment(format!("reading envtest kubeconfig: {e}")))?;
        let config =
            Config::from_custom_kubeconfig(kubeconfig.clone(), &KubeConfigOptions::default())
                .await?;

        info!(url = %config.cluster_url, crds = count, "started embedded control plane");
        Ok(Self {
            env: Environment {
                crd_directory_paths,
                crds,
                config,
                kubeconfig: Some(kubeconfig),
                use_existing_cluster: false,
                remote_path,
            },
            server: Some(server),
        })
    }

    #[cfg(not(feature = "embedded"))]
    async fn start_embedded(
        _crd_directory_paths: Vec<PathBuf>,
        _crds: Vec<CustomResourceDefinition>,
        _remote_path: PathBuf,
    ) -> Result<Self> {
        Err(Error::EmbeddedUnavailable)
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Shut down the embedded server. An existing cluster is left running.
    #[cfg_attr(not(feature = "embedded"), allow(unused_mut))]
    pub fn stop(mut self) -> Result<()> {
        #[cfg(feature = "embedded")]
        if let Some(mut server) = self.server.take() {
            server
                .destroy()
                .map_err(|e| Error::environment(format!("stopping envtest server: {e}")))?;
            info!("stopped embedded control plane");
        }
        Ok(())
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        // Dropping the server tears it down; errors have nowhere to go here.
        #[cfg(feature = "embedded")]
        if self.server.take().is_some() {
            info!("stopped embedded control plane");
        }
    }
}
