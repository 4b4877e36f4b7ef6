//! envtest-harness — start a throwaway control plane with CRDs installed and
//! keep it up until Ctrl-C.
//!
//! Usage:
//!   envtest-harness --crd-dir ./crds                      # kubeconfig to stdout
//!   envtest-harness --crd-url https://... --kubeconfig-out ./kubeconfig
//!   envtest-harness --existing-cluster --crd-dir ./crds   # use current context

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use kube_integration::{
    crd_cleaner, remote_dir_cleaner, with_cleaners, with_crd_directory_paths,
    with_remote_crd_paths, with_remote_path, TestManager,
};

#[derive(Parser, Debug)]
#[command(
    name = "envtest-harness",
    about = "Run a local control plane with CRDs installed"
)]
struct Args {
    /// Directory of CRD manifests to install. Repeatable.
    #[arg(long = "crd-dir", env = "CRD_DIRS", value_delimiter = ',')]
    crd_dirs: Vec<PathBuf>,

    /// URL of a CRD manifest to download and install. Repeatable.
    #[arg(long = "crd-url", env = "CRD_URLS", value_delimiter = ',')]
    crd_urls: Vec<String>,

    /// Where downloaded manifests are stored.
    #[arg(long, default_value = "./tmp-test", env = "REMOTE_CRD_DIR")]
    remote_dir: PathBuf,

    /// Install into the cluster of the current kubeconfig context instead of
    /// starting a control plane.
    #[arg(long, env = "USE_EXISTING_CLUSTER")]
    existing_cluster: bool,

    /// Write the kubeconfig of the started control plane here instead of stdout.
    #[arg(long, env = "KUBECONFIG_OUT")]
    kubeconfig_out: Option<PathBuf>,

    /// Log format: "text" for human-readable, "json" for structured.
    #[arg(long, default_value = "text", env = "LOG_FORMAT")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kube=warn,hyper=warn,tower=warn".into());

    if args.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let existing = if args.existing_cluster {
        Some(kube::Config::infer().await?)
    } else {
        None
    };

    let mut tm = TestManager::new(
        existing,
        [
            with_crd_directory_paths(args.crd_dirs),
            with_remote_crd_paths(args.crd_urls),
            with_remote_path(args.remote_dir),
            with_cleaners([crd_cleaner(), remote_dir_cleaner()]),
        ],
    )
    .await?;
    tm.run()?;

    if let Some(kubeconfig) = &tm.environment().kubeconfig {
        let kubeconfig = serde_yaml::to_string(kubeconfig)?;
        match &args.kubeconfig_out {
            Some(path) => {
                std::fs::write(path, kubeconfig)?;
                info!(path = %path.display(), "wrote kubeconfig");
            }
            None => println!("{kubeconfig}"),
        }
    }

    info!("control plane running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tm.cleanup().await?;
    Ok(())
}
