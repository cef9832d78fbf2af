use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::debug;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::engine::models::Manifest;
use crate::error::{Result, SyncError};
use crate::util::{discard, staging_path};

/// Owns one on-disk manifest file.
#[derive(Clone, Debug)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Manifest> {
        let bytes = fs::read(&self.path)
            .await
            .map_err(|e| SyncError::read(&self.path, e))?;
        Manifest::from_slice(&bytes, &self.path.display().to_string())
    }

    /// Like [`ManifestStore::load`], but a missing file is `None`.
    pub async fn load_optional(&self) -> Result<Option<Manifest>> {
        match self.load().await {
            Ok(manifest) => Ok(Some(manifest)),
            Err(SyncError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Write `manifest` through a staging file and rename it into place.
    pub async fn save(&self, manifest: &Manifest) -> Result<()> {
        write_atomic(&self.path, &manifest.to_pretty_json()).await?;
        debug!(
            "manifest: saved {} entries to {}",
            manifest.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Replace `path` with `content` so readers only ever see the old or the new
/// bytes.
pub async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::write(parent, e))?;
    }

    let staged = staging_path(path);
    if let Err(err) = write_synced(&staged, content).await {
        discard(&staged).await;
        return Err(err);
    }
    if let Err(e) = fs::rename(&staged, path).await {
        discard(&staged).await;
        return Err(SyncError::write(path, e));
    }
    Ok(())
}

async fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| SyncError::write(path, e))?;
    file.write_all(content)
        .await
        .map_err(|e| SyncError::write(path, e))?;
    file.sync_all()
        .await
        .map_err(|e| SyncError::write(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::ResourceDescriptor;

    fn sample() -> Manifest {
        Manifest::new(vec![
            ResourceDescriptor::new("b.bin", 3, "b3"),
            ResourceDescriptor::new("a.bin", 1, "a1"),
        ])
    }

    #[tokio::test]
    async fn saves_and_loads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("state").join("manifest.json"));

        store.save(&sample()).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, sample());
        assert!(!staging_path(store.path()).exists());

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("[\n"), "expected indented JSON: {text}");
    }

    #[tokio::test]
    async fn save_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("manifest.json"));

        store.save(&sample()).await.unwrap();
        let first = std::fs::read(store.path()).unwrap();
        store.save(&sample()).await.unwrap();
        let second = std::fs::read(store.path()).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("manifest.json"));

        assert!(store.load_optional().await.unwrap().is_none());
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, SyncError::Read { .. }));
    }

    #[tokio::test]
    async fn malformed_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("manifest.json"));
        std::fs::write(store.path(), b"[{\"Name\":").unwrap();

        let err = store.load_optional().await.unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let store = ManifestStore::new(&path);
        store.save(&sample()).await.unwrap();

        // A directory squatting on the staging path makes the write fail.
        std::fs::create_dir(staging_path(&path)).unwrap();
        let mut changed = sample();
        changed.upsert(ResourceDescriptor::new("a.bin", 2, "a2"));
        let err = store.save(&changed).await.unwrap_err();
        assert_eq!(err.kind(), "write");

        assert_eq!(store.load().await.unwrap(), sample());
    }
}
