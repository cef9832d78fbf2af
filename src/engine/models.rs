use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SyncError};

/// One row of a manifest, local or remote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size", default)]
    pub size: u64,
    #[serde(rename = "MD5", default)]
    pub digest: String,
    #[serde(rename = "Time", default)]
    pub timestamp: i64,
    #[serde(rename = "Path", default)]
    pub source_location: String,
    #[serde(rename = "Version", default)]
    pub version: u64,
    #[serde(rename = "MinVersion", default)]
    pub minimum_version: u64,
    #[serde(rename = "EnabledUpdate", default, with = "enabled_flag")]
    pub update_enabled: bool,
}

impl ResourceDescriptor {
    #[cfg(test)]
    pub fn new(name: &str, version: u64, digest: &str) -> Self {
        Self {
            name: name.to_owned(),
            size: 0,
            digest: digest.to_owned(),
            timestamp: 0,
            source_location: String::new(),
            version,
            minimum_version: 0,
            update_enabled: false,
        }
    }

    /// Record that `applied` is now what sits on disk for this entry.
    pub fn mark_applied(&mut self, applied: &ResourceDescriptor) {
        self.version = applied.version;
        self.digest = applied.digest.clone();
        self.size = applied.size;
        self.timestamp = applied.timestamp;
        self.source_location = applied.source_location.clone();
    }
}

/// Ordered list of descriptors with unique names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ResourceDescriptor>,
}

impl Manifest {
    #[cfg(test)]
    pub fn new(entries: Vec<ResourceDescriptor>) -> Self {
        Self { entries }
    }

    /// Decode a manifest document, rejecting duplicate names.
    pub fn from_slice(bytes: &[u8], origin: &str) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|e| SyncError::Decode {
                origin: origin.to_owned(),
                message: e.to_string(),
            })?;

        let mut seen = HashSet::new();
        for entry in &manifest.entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(SyncError::Decode {
                    origin: origin.to_owned(),
                    message: format!("duplicate entry {:?}", entry.name),
                });
            }
        }
        Ok(manifest)
    }

    pub fn to_pretty_json(&self) -> Vec<u8> {
        // A Vec of plain structs cannot fail to serialize.
        serde_json::to_vec_pretty(self).unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Replace the entry with the same name, or append it.
    pub fn upsert(&mut self, entry: ResourceDescriptor) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.name == entry.name) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Mark `applied` as on disk, appending an entry if the name is new.
    pub fn record_applied(&mut self, applied: &ResourceDescriptor) {
        match self.entries.iter_mut().find(|e| e.name == applied.name) {
            Some(existing) => existing.mark_applied(applied),
            None => self.entries.push(applied.clone()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `EnabledUpdate` travels as 0/1; plain booleans are accepted too.
mod enabled_flag {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Int(i64),
        Bool(bool),
    }

    pub fn serialize<S: Serializer>(
        value: &bool,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<bool, D::Error> {
        Ok(match Flag::deserialize(deserializer)? {
            Flag::Int(value) => value == 1,
            Flag::Bool(value) => value,
        })
    }
}
