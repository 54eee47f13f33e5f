//! App manifest parsing.
//!
//! Two schema versions exist in the wild. Both are parsed once into the
//! normalized [`AppManifest`]:
//!
//! - v1: `{"uuid": "...", "buildId": "...", "name": "..."}`
//! - v2: `{"manifestVersion": 2, "appId": "...", "buildId": "...", "name": "..."}`

use crate::error::{BridgeError, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppManifest {
    pub version: ManifestVersion,
    pub app_id: String,
    pub build_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestDocument {
    V2 {
        #[serde(rename = "manifestVersion")]
        manifest_version: u64,
        #[serde(rename = "appId")]
        app_id: Option<Value>,
        #[serde(rename = "buildId")]
        build_id: Option<Value>,
        name: Option<Value>,
    },
    V1 {
        uuid: Option<Value>,
        #[serde(rename = "buildId")]
        build_id: Option<Value>,
        name: Option<Value>,
    },
}

fn string_field(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn required_id(value: Option<Value>, field: &str) -> Result<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) => Err(BridgeError::InvalidManifest(format!("{} is empty", field))),
        Some(_) => Err(BridgeError::InvalidManifest(format!("{} is not a string", field))),
        None => Err(BridgeError::InvalidManifest(format!("{} is missing", field))),
    }
}

impl AppManifest {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let document: ManifestDocument = serde_json::from_slice(data)
            .map_err(|e| BridgeError::InvalidManifest(e.to_string()))?;

        match document {
            ManifestDocument::V2 {
                manifest_version,
                app_id,
                build_id,
                name,
            } => {
                if manifest_version != 2 {
                    return Err(BridgeError::InvalidManifest(format!(
                        "unsupported manifestVersion {}",
                        manifest_version
                    )));
                }
                Ok(Self {
                    version: ManifestVersion::V2,
                    app_id: required_id(app_id, "appId")?,
                    build_id: string_field(build_id),
                    name: string_field(name),
                })
            }
            ManifestDocument::V1 {
                uuid,
                build_id,
                name,
            } => Ok(Self {
                version: ManifestVersion::V1,
                app_id: required_id(uuid, "uuid")?,
                build_id: string_field(build_id),
                name: string_field(name),
            }),
        }
    }
}
