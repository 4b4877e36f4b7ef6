//! Builder and cleaner hooks run against a started environment.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use kube::Client;
use tracing::{debug, info};

use crate::crd;
use crate::environment::Environment;
use crate::error::{Error, Result};

/// A hook that uses the environment and a client to perform an operation.
pub type Operation = Arc<dyn Fn(Environment, Client) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`Operation`].
pub fn operation<F, Fut>(f: F) -> Operation
where
    F: Fn(Environment, Client) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |env, client| f(env, client).boxed())
}

/// The default builder: does nothing.
pub fn noop_builder() -> Operation {
    operation(|_, _| async { Ok(()) })
}

/// Deletes every CRD the environment installed, from its directories and its
/// in-memory definitions.
pub fn crd_cleaner() -> Operation {
    operation(|env, client| async move {
        let crds = env.all_crds().map_err(Error::cleanup)?;
        crd::uninstall(&client, &crds)
            .await
            .map_err(Error::cleanup)?;
        info!(count = crds.len(), "removed installed CRDs");
        Ok(())
    })
}

/// Removes the directory remote CRDs were downloaded into.
pub fn remote_dir_cleaner() -> Operation {
    operation(|env, _| async move {
        match tokio::fs::remove_dir_all(&env.remote_path).await {
            Ok(()) => {
                debug!(dir = %env.remote_path.display(), "removed remote CRD directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    })
}
