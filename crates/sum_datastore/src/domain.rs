use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A finished run as kept by a [`crate::ResultStore`].
///
/// The payload is stored as opaque JSON; the store never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRun {
    pub key: String,
    pub config_fingerprint: String,
    pub run_id: u64,
    pub stored_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl CachedRun {
    pub fn new<T: Serialize>(
        key: impl Into<String>,
        config_fingerprint: impl Into<String>,
        run_id: u64,
        payload: &T,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            key: key.into(),
            config_fingerprint: config_fingerprint.into(),
            run_id,
            stored_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Keys end up as file names, so only hex-ish identifiers are accepted.
pub(crate) fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
