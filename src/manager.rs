//! Controller manager — runs registered controllers as tokio tasks sharing a
//! client, and stops them together.
//!
//! Controllers are registered as async closures taking a [`Context`]. The
//! context carries the shutdown signal, which controllers built on
//! `kube::runtime::Controller` pass to `graceful_shutdown_on`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use kube::runtime::controller::Action;
use kube::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use warp::Filter;

use crate::error::{Error, Result};

pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ManagerOptions {
    /// Default interval after which controllers requeue an object.
    pub sync_period: Duration,
    /// How long controllers get to exit after shutdown is signalled before
    /// their tasks are aborted.
    pub graceful_shutdown_timeout: Duration,
    /// Serve `/healthz` and `/readyz` here while the manager runs.
    pub health_probe_bind_address: Option<SocketAddr>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            sync_period: DEFAULT_SYNC_PERIOD,
            graceful_shutdown_timeout: DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT,
            health_probe_bind_address: None,
        }
    }
}

// ── Context handed to every controller ────────────────────────────────────────

#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub sync_period: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Context {
    /// Resolves once the manager is stopped.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.clone();
        async move {
            // A dropped sender also means the manager is gone.
            let _ = rx.wait_for(|stop| *stop).await;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Requeue after the configured sync period.
    pub fn requeue(&self) -> Action {
        Action::requeue(self.sync_period)
    }
}

type Runnable = Box<dyn FnOnce(Context) -> BoxFuture<'static, Result<()>> + Send>;

// ── Manager ───────────────────────────────────────────────────────────────────

pub struct Manager {
    client: Client,
    options: ManagerOptions,
    pending: Vec<(String, Runnable)>,
    tasks: Vec<(String, JoinHandle<Result<()>>)>,
    shutdown: watch::Sender<bool>,
    ready: Arc<AtomicBool>,
    health_addr: Option<SocketAddr>,
    started: bool,
}

impl Manager {
    pub fn new(client: Client, options: ManagerOptions) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            client,
            options,
            pending: vec![],
            tasks: vec![],
            shutdown,
            ready: Arc::new(AtomicBool::new(false)),
            health_addr: None,
            started: false,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Address the health probe server is bound to, once started.
    pub fn health_probe_addr(&self) -> Option<SocketAddr> {
        self.health_addr
    }

    /// A context sharing this manager's client and shutdown signal.
    pub fn context(&self) -> Context {
        Context {
            client: self.client.clone(),
            sync_period: self.options.sync_period,
            shutdown: self.shutdown.subscribe(),
        }
    }

    /// Register a controller. It starts running on [`Manager::start`].
    pub fn add<F, Fut>(&mut self, name: impl Into<String>, runnable: F) -> Result<()>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        if self.started {
            return Err(Error::manager(format!(
                "cannot add {name:?}: manager already started"
            )));
        }
        self.pending
            .push((name, Box::new(move |ctx| runnable(ctx).boxed())));
        Ok(())
    }

    /// Spawn every registered controller (and the health probe server, if
    /// configured) onto the current tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::manager("manager already started"));
        }

        // Bind before committing so a failed bind leaves the manager startable.
        if let Some(addr) = self.options.health_probe_bind_address {
            self.start_health_probes(addr)?;
        }
        self.started = true;

        for (name, runnable) in std::mem::take(&mut self.pending) {
            let fut = runnable(self.context());
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                let res = fut.await;
                match &res {
                    Ok(()) => debug!(runnable = %task_name, "runnable exited"),
                    Err(e) => error!(runnable = %task_name, %e, "runnable failed"),
                }
                res
            });
            self.tasks.push((name, handle));
        }

        self.ready.store(true, Ordering::SeqCst);
        info!(
            runnables = self.tasks.len(),
            sync_period = ?self.options.sync_period,
            "manager started"
        );
        Ok(())
    }

    fn start_health_probes(&mut self, addr: SocketAddr) -> Result<()> {
        let ready = self.ready.clone();

        let healthz = warp::get()
            .and(warp::path("healthz"))
            .and(warp::path::end())
            .map(|| warp::reply::with_status("ok", warp::http::StatusCode::OK));
        let readyz = warp::get()
            .and(warp::path("readyz"))
            .and(warp::path::end())
            .map(move || {
                if ready.load(Ordering::SeqCst) {
                    warp::reply::with_status("ok", warp::http::StatusCode::OK)
                } else {
                    warp::reply::with_status(
                        "not ready",
                        warp::http::StatusCode::SERVICE_UNAVAILABLE,
                    )
                }
            });

        let signal = self.context().shutdown_signal();
        let (bound, server) = warp::serve(healthz.or(readyz))
            .try_bind_with_graceful_shutdown(addr, signal)
            .map_err(|e| Error::manager(format!("binding health probes on {addr}: {e}")))?;

        info!(addr = %bound, "serving health probes");
        self.health_addr = Some(bound);
        self.tasks.push((
            "health-probes".to_string(),
            tokio::spawn(async move {
                server.await;
                Ok(())
            }),
        ));
        Ok(())
    }

    /// Signal shutdown and wait for every controller to exit. Controllers still
    /// running after the graceful timeout are aborted. Returns the first
    /// controller error, if any.
    pub async fn stop(&mut self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);

        let deadline = tokio::time::Instant::now() + self.options.graceful_shutdown_timeout;
        let mut first_err = None;

        for (name, mut handle) in self.tasks.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    first_err.get_or_insert(e);
                }
                Ok(Err(join_err)) => {
                    first_err.get_or_insert_with(|| {
                        Error::manager(format!("runnable {name} panicked: {join_err}"))
                    });
                }
                Err(_) => {
                    warn!(runnable = %name, "runnable did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        if self.started {
            info!("manager stopped");
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
