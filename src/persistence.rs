//! On-disk persistence for the firmware-transfer cache, keyed by device
//! name: one JSON record per device recording the last known-good image
//! hash and the decoded project bytes it produced.
//!
//! Without persistence, a restarted process has no memory of a prior
//! download and re-downloads the whole image. Recording the hash and
//! project bytes to disk lets [`crate::fwt::FwtClient`] skip straight to
//! `Ready` when the cached hash still matches.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::FIRMWARE_HASH_SIZE;
use crate::error::CoreError;
use crate::fwt::{FwtPersistence, PersistedFirmware};

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    device_name: String,
    #[serde(with = "hex_hash")]
    image_hash: [u8; FIRMWARE_HASH_SIZE],
    #[serde(with = "hex_bytes")]
    project_bytes: Vec<u8>,
}

impl From<&PersistedFirmware> for StoredRecord {
    fn from(record: &PersistedFirmware) -> Self {
        StoredRecord {
            device_name: record.device_name.clone(),
            image_hash: record.image_hash,
            project_bytes: record.project_bytes.clone(),
        }
    }
}

impl From<StoredRecord> for PersistedFirmware {
    fn from(record: StoredRecord) -> Self {
        PersistedFirmware {
            device_name: record.device_name,
            image_hash: record.image_hash,
            project_bytes: record.project_bytes,
        }
    }
}

mod hex_hash {
    use super::FIRMWARE_HASH_SIZE;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; FIRMWARE_HASH_SIZE], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; FIRMWARE_HASH_SIZE], D::Error> {
        let encoded = String::deserialize(d)?;
        let decoded = hex::decode(&encoded).map_err(serde::de::Error::custom)?;
        decoded
            .try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::custom(format!("expected {FIRMWARE_HASH_SIZE} bytes, got {}", v.len())))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        hex::decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// A [`FwtPersistence`] backed by one JSON file per device name under a
/// root directory.
pub struct FileFwtPersistence {
    root: PathBuf,
}

impl FileFwtPersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileFwtPersistence { root: root.into() }
    }

    fn path_for(&self, device_name: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(device_name)))
    }
}

/// Replaces path separators so a device name can never escape `root`.
fn sanitize(device_name: &str) -> String {
    device_name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

impl FwtPersistence for FileFwtPersistence {
    fn load(&self, device_name: &str) -> Result<Option<PersistedFirmware>, CoreError> {
        let path = self.path_for(device_name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| CoreError::PersistenceError(format!("reading {}: {e}", path.display())))?;
        let record: StoredRecord =
            serde_json::from_str(&contents).map_err(|e| CoreError::PersistenceError(format!("parsing {}: {e}", path.display())))?;
        Ok(Some(record.into()))
    }

    fn store(&self, record: &PersistedFirmware) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.root).map_err(|e| CoreError::PersistenceError(format!("creating {}: {e}", self.root.display())))?;
        let path = self.path_for(&record.device_name);
        let stored: StoredRecord = record.into();
        let contents = serde_json::to_string_pretty(&stored).map_err(|e| CoreError::PersistenceError(e.to_string()))?;
        std::fs::write(&path, contents).map_err(|e| CoreError::PersistenceError(format!("writing {}: {e}", path.display())))
    }
}

/// A no-op persistence layer for embedders that don't want on-disk
/// caching; equivalent to always passing `None` but usable where a
/// concrete trait object is required.
pub struct NoPersistence;

impl FwtPersistence for NoPersistence {
    fn load(&self, _device_name: &str) -> Result<Option<PersistedFirmware>, CoreError> {
        Ok(None)
    }

    fn store(&self, _record: &PersistedFirmware) -> Result<(), CoreError> {
        Ok(())
    }
}
