//! Fetching remote CRD manifests into a local directory.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::crd::is_manifest;
use crate::error::Result;

/// Local file name for a manifest downloaded from `url`.
///
/// Prefixed with a digest of the full URL so two URLs ending in the same
/// segment never overwrite each other.
pub fn file_name_for(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .unwrap_or("crds");

    if is_manifest(Path::new(segment)) {
        format!("{}-{segment}", &digest[..12])
    } else {
        format!("{}-{segment}.yaml", &digest[..12])
    }
}

/// Download `url` into `dir`, creating the directory if needed. Returns the
/// path of the written file.
pub async fn download_path(http: &reqwest::Client, url: &str, dir: &Path) -> Result<PathBuf> {
    let body = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    tokio::fs::create_dir_all(dir).await?;
    let dest = dir.join(file_name_for(url));
    tokio::fs::write(&dest, &body).await?;

    info!(%url, dest = %dest.display(), bytes = body.len(), "downloaded CRD manifest");
    Ok(dest)
}
