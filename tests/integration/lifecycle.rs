use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, PostParams};
use kube::CustomResourceExt;

use kube_integration::helpers::create_namespace;
use kube_integration::*;

use super::common::*;

/// The embedded control plane boots and serves in-memory CRDs.
#[tokio::test]
async fn envtest_boots_with_in_memory_crds() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let tm = TestManager::new(
        None,
        [
            with_crds([Widget::crd()]),
            with_remote_path(dir.path().join("tmp-test")),
        ],
    )
    .await
    .expect("failed to start test environment");

    assert!(!tm.environment().use_existing_cluster);
    assert!(tm.environment().kubeconfig.is_some());

    let client = tm.client();
    let ns = create_namespace(&client, "boot").await.unwrap();
    let api: Api<Widget> = Api::namespaced(client.clone(), &ns);
    api.create(&PostParams::default(), &widget("w1", &ns, 1))
        .await
        .expect("Widget CRD not served");

    tm.cleanup().await.expect("cleanup failed");
}

/// CRDs are read from directories and the builder runs against the client.
#[tokio::test]
async fn crd_directory_and_builder() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let crd_dir = dir.path().join("crds");
    std::fs::create_dir_all(&crd_dir).unwrap();
    std::fs::write(
        crd_dir.join("widgets.yaml"),
        serde_yaml::to_string(&Widget::crd()).unwrap(),
    )
    .unwrap();

    let built = Arc::new(AtomicBool::new(false));
    let flag = built.clone();
    let builder = operation(move |env, client| {
        let flag = flag.clone();
        async move {
            assert_eq!(env.all_crds()?.len(), 1);
            let namespaces: Api<Namespace> = Api::all(client);
            let ns: Namespace = serde_json::from_value(serde_json::json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "name": "built-by-builder" }
            }))?;
            namespaces.create(&PostParams::default(), &ns).await?;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });

    let tm = TestManager::new(
        None,
        [
            with_crd_directory_paths([crd_dir.clone()]),
            with_remote_path(dir.path().join("tmp-test")),
            with_builder(builder),
        ],
    )
    .await
    .expect("failed to start test environment");

    assert!(built.load(Ordering::SeqCst));
    let namespaces: Api<Namespace> = Api::all(tm.client());
    assert!(namespaces.get("built-by-builder").await.is_ok());

    tm.cleanup().await.expect("cleanup failed");
}

/// The default cleaner removes installed CRDs before the environment stops.
#[tokio::test]
async fn crd_cleaner_removes_crds() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let removed = Arc::new(AtomicBool::new(false));
    let flag = removed.clone();
    let verify = operation(move |_env, client| {
        let flag = flag.clone();
        async move {
            let crds: Api<CustomResourceDefinition> = Api::all(client);
            let gone = wait_for(TIMEOUT, POLL, || {
                let crds = crds.clone();
                async move { matches!(crds.get_opt("widgets.example.org").await, Ok(None)) }
            })
            .await;
            flag.store(gone, Ordering::SeqCst);
            Ok(())
        }
    });

    let tm = TestManager::new(
        None,
        [
            with_crds([Widget::crd()]),
            with_remote_path(dir.path().join("tmp-test")),
            with_cleaners([crd_cleaner(), verify, remote_dir_cleaner()]),
        ],
    )
    .await
    .expect("failed to start test environment");

    tm.cleanup().await.expect("cleanup failed");
    assert!(removed.load(Ordering::SeqCst), "Widget CRD still present");
}

/// A failing builder aborts construction.
#[tokio::test]
async fn builder_error_propagates() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let res = TestManager::new(
        None,
        [
            with_remote_path(dir.path().join("tmp-test")),
            with_builder(operation(|_, _| async {
                Err(Error::environment("builder refused"))
            })),
        ],
    )
    .await;
    assert!(matches!(res, Err(Error::Environment(msg)) if msg == "builder refused"));
}

/// A second harness attached to the first one's API server treats it as an
/// existing cluster and keeps the CRD that is already installed.
#[tokio::test]
async fn existing_cluster_keeps_installed_crds() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let embedded = TestManager::new(
        None,
        [
            with_crds([Widget::crd()]),
            with_remote_path(dir.path().join("embedded")),
        ],
    )
    .await
    .expect("failed to start test environment");

    let attached = TestManager::new(
        Some(embedded.environment().config.clone()),
        [
            with_crds([Widget::crd()]),
            with_remote_path(dir.path().join("attached")),
            with_cleaners(Vec::<Operation>::new()),
        ],
    )
    .await
    .expect("failed to attach to running control plane");

    assert!(attached.environment().use_existing_cluster);
    assert!(attached.environment().kubeconfig.is_none());

    let client = attached.client();
    let ns = create_namespace(&client, "attached").await.unwrap();
    let api: Api<Widget> = Api::namespaced(client, &ns);
    api.create(&PostParams::default(), &widget("w1", &ns, 2))
        .await
        .expect("Widget CRD not served");

    attached.cleanup().await.expect("attached cleanup failed");
    embedded.cleanup().await.expect("embedded cleanup failed");
}

fn record(log: &Arc<Mutex<Vec<u32>>>, id: u32) -> Operation {
    let log = log.clone();
    operation(move |_, _| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(id);
            Ok(())
        }
    })
}

/// Cleaners run in order and the first failure stops the rest.
#[tokio::test]
async fn cleanup_stops_at_first_failing_cleaner() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(vec![]));
    let fail = operation(|_, _| async { Err(Error::environment("cleaner refused")) });

    let tm = TestManager::new(
        None,
        [
            with_remote_path(dir.path().join("tmp-test")),
            with_cleaners([record(&log, 1), fail, record(&log, 2)]),
        ],
    )
    .await
    .expect("failed to start test environment");

    let err = tm.cleanup().await.unwrap_err();
    assert!(matches!(&err, Error::Environment(msg) if msg == "cleaner refused"), "{err}");
    assert_eq!(*log.lock().unwrap(), vec![1]);
}

/// A controller error surfaces from cleanup only after the cleaners ran.
#[tokio::test]
async fn cleanup_reports_controller_error_after_teardown() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(vec![]));

    let mut tm = TestManager::new(
        None,
        [
            with_remote_path(dir.path().join("tmp-test")),
            with_cleaners([record(&log, 1), record(&log, 2)]),
        ],
    )
    .await
    .expect("failed to start test environment");

    tm.manager_mut()
        .add("broken", |_ctx| async { Err(Error::manager("controller gave up")) })
        .unwrap();
    tm.run().unwrap();

    let err = tm.cleanup().await.unwrap_err();
    assert_eq!(err.to_string(), "Manager error: controller gave up");
    assert_eq!(*log.lock().unwrap(), vec![1, 2]);
}

/// After a successful cleanup the embedded API server no longer answers.
#[tokio::test]
async fn cleanup_stops_embedded_control_plane() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let tm = TestManager::new(None, [with_remote_path(dir.path().join("tmp-test"))])
        .await
        .expect("failed to start test environment");

    let client = tm.client();
    let namespaces: Api<Namespace> = Api::all(client.clone());
    assert!(namespaces.get("default").await.is_ok());

    tm.cleanup().await.expect("cleanup failed");

    let namespaces: Api<Namespace> = Api::all(client);
    assert!(namespaces.get("default").await.is_err());
}
