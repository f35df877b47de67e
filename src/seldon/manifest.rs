/// Loading and validation of SeldonDeployment documents
use std::path::{Path, PathBuf};

use kube::core::TypeMeta;
use kube::{Resource, ResourceExt};
use thiserror::Error;

use super::models::SeldonDeployment;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON document")]
    Json(#[from] serde_json::Error),

    #[error("malformed YAML document")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid seldon deployment: {0}")]
    Invalid(String),
}

/// Document encoding, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
}

impl ManifestFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => ManifestFormat::Yaml,
            _ => ManifestFormat::Json,
        }
    }
}

/// Read, parse and validate a seldon deployment document from disk
pub fn load<P: AsRef<Path>>(path: P) -> Result<SeldonDeployment, ManifestError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content, ManifestFormat::from_path(path))
}

/// Parse and validate a seldon deployment document
pub fn parse(content: &str, format: ManifestFormat) -> Result<SeldonDeployment, ManifestError> {
    let (types, dpl): (TypeMeta, SeldonDeployment) = match format {
        ManifestFormat::Json => (
            serde_json::from_str(content)?,
            serde_json::from_str(content)?,
        ),
        ManifestFormat::Yaml => (
            serde_yaml::from_str(content)?,
            serde_yaml::from_str(content)?,
        ),
    };

    check_types(&types)?;
    validate(&dpl)?;
    Ok(dpl)
}

fn check_types(types: &TypeMeta) -> Result<(), ManifestError> {
    let kind = SeldonDeployment::kind(&());
    let api_version = SeldonDeployment::api_version(&());

    if types.kind != kind {
        return Err(ManifestError::Invalid(format!(
            "expected kind {}, found {}",
            kind, types.kind
        )));
    }
    if types.api_version != api_version {
        return Err(ManifestError::Invalid(format!(
            "expected apiVersion {}, found {}",
            api_version, types.api_version
        )));
    }
    Ok(())
}

/// Check the fields the lifecycle depends on
pub fn validate(dpl: &SeldonDeployment) -> Result<(), ManifestError> {
    if dpl.name_any().is_empty() {
        return Err(ManifestError::Invalid(
            "metadata.name cannot be empty".into(),
        ));
    }

    if dpl.spec.predictors.is_empty() {
        return Err(ManifestError::Invalid(
            "at least one predictor is required".into(),
        ));
    }

    for (i, predictor) in dpl.spec.predictors.iter().enumerate() {
        if predictor.name.is_empty() {
            return Err(ManifestError::Invalid(format!(
                "predictors[{}].name cannot be empty",
                i
            )));
        }
        if predictor.graph.name.is_empty() {
            return Err(ManifestError::Invalid(format!(
                "predictors[{}].graph.name cannot be empty",
                i
            )));
        }
        if predictor.replicas.is_some_and(|r| r < 0) {
            return Err(ManifestError::Invalid(format!(
                "predictors[{}].replicas cannot be negative",
                i
            )));
        }
    }

    Ok(())
}
