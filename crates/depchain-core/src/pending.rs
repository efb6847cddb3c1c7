//! Build requests and pending buildset requests.

use crate::ids::{PendingRequestId, SourceStampId};
use crate::properties::PropertyMap;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Arguments of a build request, as passed between schedulers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BuildRequest {
    pub reason: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl BuildRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// Whether two requests are duplicates for pending-request purposes.
    pub fn is_equivalent(&self, reason: &str, properties: &PropertyMap) -> bool {
        self.reason == reason && &self.properties == properties
    }

    /// Hex SHA-256 over reason and properties; equal for equivalent requests.
    ///
    /// Each field is length-prefixed. `PropertyMap` and nested JSON objects
    /// are ordered maps, so a value's compact JSON text is canonical.
    pub fn fingerprint(&self) -> String {
        fn field(hasher: &mut Sha256, bytes: &[u8]) {
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        }

        let mut hasher = Sha256::new();
        field(&mut hasher, self.reason.as_bytes());
        for (name, value) in &self.properties {
            field(&mut hasher, name.as_bytes());
            field(&mut hasher, value.to_string().as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

/// A build that was requested but is waiting on dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PendingBuildsetRequest {
    pub id: PendingRequestId,
    pub source_stamp_id: SourceStampId,
    pub scheduler: String,
    /// Dependency names at the time of the request.
    pub dependencies: Vec<String>,
    pub reason: String,
    pub external_id: Option<String>,
    pub properties: PropertyMap,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl PendingBuildsetRequest {
    pub fn matches(&self, request: &BuildRequest) -> bool {
        request.is_equivalent(&self.reason, &self.properties)
    }

    pub fn to_request(&self) -> BuildRequest {
        BuildRequest {
            reason: self.reason.clone(),
            external_id: self.external_id.clone(),
            properties: self.properties.clone(),
        }
    }
}
