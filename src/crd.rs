//! Reading CRD manifests from disk and installing them into a cluster.

use std::path::{Path, PathBuf};
use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, PostParams, ResourceExt};
use kube::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::helpers::wait_for;

const CRD_KIND: &str = "CustomResourceDefinition";
const MANIFEST_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// How long `install` waits for every CRD to report `Established`.
pub const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(30);
const ESTABLISH_POLL: Duration = Duration::from_millis(200);

/// Return true if the path has an extension `read_crds` picks up.
pub fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MANIFEST_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read every CRD from the manifest files directly inside `dir`.
///
/// Files are visited in name order. Multi-document YAML is split and documents
/// of any other kind are skipped. A missing directory yields no CRDs.
pub fn read_crds(dir: impl AsRef<Path>) -> Result<Vec<CustomResourceDefinition>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "CRD directory does not exist, skipping");
        return Ok(vec![]);
    }

    let mut files: Vec<PathBuf> = vec![];
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_manifest(&path) {
            files.push(path);
        }
    }
    files.sort();

    let mut crds = vec![];
    for file in files {
        let content = std::fs::read_to_string(&file)?;
        let found = parse_crds(&content).map_err(|e| Error::Manifest {
            path: file.display().to_string(),
            message: e.to_string(),
        })?;
        debug!(file = %file.display(), count = found.len(), "read CRDs");
        crds.extend(found);
    }
    Ok(crds)
}

/// Read CRDs from several directories, in order.
pub fn read_all<P: AsRef<Path>>(dirs: &[P]) -> Result<Vec<CustomResourceDefinition>> {
    let mut crds = vec![];
    for dir in dirs {
        crds.extend(read_crds(dir)?);
    }
    Ok(crds)
}

/// Parse the CRDs out of a (possibly multi-document) YAML or JSON string.
pub fn parse_crds(content: &str) -> Result<Vec<CustomResourceDefinition>> {
    let mut crds = vec![];
    for doc in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        if value.get("kind").and_then(|k| k.as_str()) != Some(CRD_KIND) {
            continue;
        }
        crds.push(serde_yaml::from_value(value)?);
    }
    Ok(crds)
}

/// Return true once the API server reports the CRD as established.
pub fn is_established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Create each CRD (existing ones are left alone) and wait until all of them
/// are served.
pub async fn install(client: &Client, crds: &[CustomResourceDefinition]) -> Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    for crd in crds {
        match api.create(&PostParams::default(), crd).await {
            Ok(_) => info!(crd = %crd.name_any(), "installed CRD"),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(crd = %crd.name_any(), "CRD already present");
            }
            Err(e) => return Err(e.into()),
        }
    }

    for crd in crds {
        let name = crd.name_any();
        let established = wait_for(ESTABLISH_TIMEOUT, ESTABLISH_POLL, || {
            let api = api.clone();
            let name = name.clone();
            async move {
                api.get(&name)
                    .await
                    .map(|c| is_established(&c))
                    .unwrap_or(false)
            }
        })
        .await;
        if !established {
            return Err(Error::Timeout(format!("CRD {name} never became established")));
        }
    }
    Ok(())
}

/// Delete each CRD. CRDs that are already gone are ignored.
pub async fn uninstall(client: &Client, crds: &[CustomResourceDefinition]) -> Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    for crd in crds {
        let name = crd.name_any();
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => info!(crd = %name, "deleted CRD"),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(crd = %name, "CRD already deleted");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
