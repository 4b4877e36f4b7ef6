//! Polling and namespace helpers for tests running against a control plane.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use tracing::debug;

use crate::error::Result;

pub const TIMEOUT: Duration = Duration::from_secs(30);
pub const POLL: Duration = Duration::from_millis(500);

/// Counter for generating unique namespace names.
static NS_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Poll until a condition is true, or timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Namespace name unique within this process: `{prefix}-{pid}-{n}`.
pub fn unique_namespace(prefix: &str) -> String {
    let id = NS_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}-{}-{id}", std::process::id())
}

/// Create a fresh namespace so a test can run in isolation. Returns its name.
pub async fn create_namespace(client: &Client, prefix: &str) -> Result<String> {
    let name = unique_namespace(prefix);
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    api.create(&PostParams::default(), &ns).await?;
    debug!(ns = %name, "created test namespace");
    Ok(name)
}
