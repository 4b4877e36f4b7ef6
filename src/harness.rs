//! TestManager — the entry point for integration tests.
//!
//! Sequences the whole lifecycle: download remote CRDs, start the control
//! plane, build a client, run the builder, create the controller manager.
//! `cleanup` reverses it: stop the manager, run the cleaners, stop the
//! control plane.

use tracing::{debug, info};

use crate::config::{Config, ConfigOption};
use crate::download::download_path;
use crate::environment::{ControlPlane, Environment, EnvironmentSpec};
use crate::error::{Error, Result};
use crate::manager::Manager;
use crate::operation::Operation;

pub struct TestManager {
    manager: Manager,
    client: kube::Client,
    cleaners: Vec<Operation>,
    control_plane: ControlPlane,
}

impl TestManager {
    /// Start a test environment.
    ///
    /// With `Some(config)` the CRDs are installed into that existing cluster;
    /// with `None` an embedded control plane is started.
    pub async fn new(
        config: Option<kube::Config>,
        options: impl IntoIterator<Item = ConfigOption>,
    ) -> Result<Self> {
        let c = Config::default().apply(options);
        debug!(config = ?c, use_existing = config.is_some(), "starting test environment");

        if !c.remote_crd_paths.is_empty() {
            let http = reqwest::Client::builder()
                .timeout(c.download_timeout)
                .build()?;
            for url in &c.remote_crd_paths {
                download_path(&http, url, &c.remote_path)
                    .await
                    .map_err(|e| Error::remote_crds(url, e))?;
            }
        }

        let control_plane = ControlPlane::start(EnvironmentSpec {
            crd_directory_paths: c.crd_directories(),
            crds: c.crds,
            config,
            remote_path: c.remote_path,
        })
        .await?;

        let env = control_plane.environment().clone();
        let client = env.client()?;

        (c.builder)(env, client.clone()).await?;

        let manager = Manager::new(client.clone(), c.manager_options);

        info!("test environment ready");
        Ok(Self {
            manager,
            client,
            cleaners: c.cleaners,
            control_plane,
        })
    }

    /// Start the controller manager in the background.
    pub fn run(&mut self) -> Result<()> {
        self.manager.start()
    }

    /// Client for the test environment.
    pub fn client(&self) -> kube::Client {
        self.client.clone()
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Register controllers here before calling [`TestManager::run`].
    pub fn manager_mut(&mut self) -> &mut Manager {
        &mut self.manager
    }

    pub fn environment(&self) -> &Environment {
        self.control_plane.environment()
    }

    /// Stop the manager, run each cleaner in order, then stop the environment.
    ///
    /// A cleaner failure is returned immediately; the control plane is still
    /// released when `self` drops. A controller error reported by the manager
    /// is returned after everything else has been torn down.
    pub async fn cleanup(mut self) -> Result<()> {
        let stopped = self.manager.stop().await;

        let env = self.control_plane.environment().clone();
        for clean in &self.cleaners {
            clean(env.clone(), self.client.clone()).await?;
        }

        self.control_plane.stop()?;
        info!("test environment cleaned up");
        stopped
    }
}
