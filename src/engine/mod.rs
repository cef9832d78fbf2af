use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use log::{debug, error, info, warn};
use tokio::fs;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::config::AgentConfig;
use crate::engine::models::{Manifest, ResourceDescriptor};
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::integrity::{DigestAlgorithm, digest_file, digests_match};
use crate::networking::NetworkClient;
use crate::storage::{ManifestStore, write_atomic};
use crate::util::{discard, is_plain_file_name, staging_path};

pub mod models;

/// What one cycle changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Files whose content was replaced, in manifest order.
    pub applied: Vec<String>,
    /// Eligible files that already had the expected content on disk.
    pub already_current: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Applied,
    AlreadyCurrent,
}

impl CycleReport {
    fn record(&mut self, name: &str, outcome: Outcome) {
        match outcome {
            Outcome::Applied => self.applied.push(name.to_owned()),
            Outcome::AlreadyCurrent => self.already_current.push(name.to_owned()),
        }
    }
}

/// Runs sync cycles against one remote manifest. All filesystem mutation of
/// the resource directory and local manifest goes through here.
pub struct ReconciliationEngine {
    config: AgentConfig,
    networking: NetworkClient,
    store: ManifestStore,
}

impl ReconciliationEngine {
    pub fn new(config: AgentConfig) -> Self {
        let networking = NetworkClient::new(config.request_timeout);
        let store = ManifestStore::new(&config.local_manifest);
        Self {
            config,
            networking,
            store,
        }
    }

    /// One full cycle: fetch, compare, replace, persist.
    pub async fn run_cycle(
        &self,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) -> Result<CycleReport> {
        let policy = self.config.policy.label();
        info!("cycle: checking for updates ({policy} policy)");
        events.send(SyncEvent::CycleStarted { policy }).ok();

        match self.reconcile(events).await {
            Ok(report) => {
                info!(
                    "cycle: finished, {} updated, {} already current",
                    report.applied.len(),
                    report.already_current.len()
                );
                events
                    .send(SyncEvent::CycleFinished {
                        applied: report.applied.len(),
                    })
                    .ok();
                Ok(report)
            }
            Err(err) => {
                error!("cycle: failed: {err}");
                events
                    .send(SyncEvent::CycleFailed {
                        kind: err.kind(),
                        reason: err.to_string(),
                    })
                    .ok();
                Err(err)
            }
        }
    }

    async fn reconcile(&self, events: &mpsc::UnboundedSender<SyncEvent>) -> Result<CycleReport> {
        let remote = self
            .networking
            .fetch_manifest(&self.config.server_url)
            .await?;
        if remote.is_empty() {
            warn!("cycle: remote manifest {} lists no files", self.config.server_url);
        }
        events
            .send(SyncEvent::RemoteFetched {
                entries: remote.len(),
            })
            .ok();
        self.mirror_remote(&remote).await;

        if self.config.policy.tracks_local_manifest() {
            self.reconcile_tracked(&remote, events).await
        } else {
            self.reconcile_gated(&remote, events).await
        }
    }

    /// Gate policy: no local state; the first eligible descriptor ends the scan.
    async fn reconcile_gated(
        &self,
        remote: &Manifest,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) -> Result<CycleReport> {
        let untracked = Manifest::default();
        let mut report = CycleReport::default();

        for entry in remote.iter() {
            if !self.config.policy.decide(&untracked, entry).required {
                debug!("gate: {} not eligible", entry.name);
                continue;
            }
            let outcome = self.apply(entry, events).await?;
            report.record(&entry.name, outcome);
            if self.config.policy.single_update_per_cycle() {
                break;
            }
        }
        Ok(report)
    }

    /// Diff policy: every stale descriptor is replaced and recorded locally.
    async fn reconcile_tracked(
        &self,
        remote: &Manifest,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) -> Result<CycleReport> {
        let mut local = match self.store.load_optional().await? {
            Some(local) => local,
            None => {
                let local = self.bootstrap(remote).await;
                info!(
                    "cycle: created local manifest {} with {} entries",
                    self.store.path().display(),
                    local.len()
                );
                self.store.save(&local).await?;
                local
            }
        };

        let mut report = CycleReport::default();
        let mut dirty = false;
        for entry in remote.iter() {
            let decision = self.config.policy.decide(&local, entry);
            if !decision.required {
                debug!(
                    "diff: {} up to date (local {}, remote {})",
                    entry.name, decision.entry.version, entry.version
                );
                continue;
            }
            match self.apply(entry, events).await {
                Ok(outcome) => {
                    local.record_applied(entry);
                    dirty = true;
                    report.record(&entry.name, outcome);
                }
                Err(err) => {
                    // Keep the manifest in step with files replaced earlier in this cycle.
                    if dirty && let Err(save_err) = self.store.save(&local).await {
                        warn!("cycle: could not record earlier updates: {save_err}");
                    }
                    return Err(err);
                }
            }
        }

        if dirty {
            self.store.save(&local).await?;
        }
        Ok(report)
    }

    /// Derive a first local manifest from what is already on disk.
    async fn bootstrap(&self, remote: &Manifest) -> Manifest {
        let mut local = Manifest::default();
        for entry in remote.iter() {
            if !is_plain_file_name(&entry.name) {
                continue;
            }
            let path = self.config.resources_dir.join(&entry.name);
            let algorithm = DigestAlgorithm::for_expected(&entry.digest);
            match digest_file(&path, algorithm).await {
                Ok(actual) if digests_match(&actual, &entry.digest) => {
                    local.upsert(entry.clone());
                }
                Ok(actual) => {
                    let mut stale = entry.clone();
                    stale.version = 0;
                    stale.digest = actual;
                    local.upsert(stale);
                }
                Err(_) => debug!("bootstrap: {} not present locally", entry.name),
            }
        }
        local
    }

    /// Remove staging files left by an interrupted cycle and return them.
    ///
    /// Only `<name>.tmp` where `<name>` is a tracked resource, the local
    /// manifest or the remote copy counts as staging. Files listed in either
    /// manifest are kept even when their own name ends in `.tmp`.
    pub async fn sweep_staging(&self) -> Vec<PathBuf> {
        let dir = &self.config.resources_dir;
        let mut owned = HashSet::from([self.config.local_manifest.clone()]);
        let mut stores = vec![self.store.clone()];
        if let Some(copy) = &self.config.remote_copy {
            owned.insert(copy.clone());
            stores.push(ManifestStore::new(copy));
        }
        for store in &stores {
            match store.load_optional().await {
                Ok(Some(manifest)) => owned.extend(
                    manifest
                        .iter()
                        .filter(|entry| is_plain_file_name(&entry.name))
                        .map(|entry| dir.join(&entry.name)),
                ),
                Ok(None) => {}
                Err(err) => warn!("sweep: ignoring {}: {err}", store.path().display()),
            }
        }

        let mut candidates: BTreeSet<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .flatten()
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        // The manifests may live outside the resource directory.
        candidates.insert(staging_path(&self.config.local_manifest));
        if let Some(copy) = &self.config.remote_copy {
            candidates.insert(staging_path(copy));
        }

        let staged: HashSet<PathBuf> = owned.iter().map(|path| staging_path(path)).collect();
        let mut removed = Vec::new();
        for path in candidates {
            if owned.contains(&path) || !staged.contains(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed.push(path),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!("failed to remove stale staging file {}: {err}", path.display()),
            }
        }
        removed
    }

    async fn mirror_remote(&self, remote: &Manifest) {
        let Some(path) = &self.config.remote_copy else {
            return;
        };
        if let Err(err) = write_atomic(path, &remote.to_pretty_json()).await {
            warn!("cycle: failed to store remote manifest copy: {err}");
        }
    }

    async fn apply(
        &self,
        entry: &ResourceDescriptor,
        events: &mpsc::UnboundedSender<SyncEvent>,
    ) -> Result<Outcome> {
        let result = self.verified_replace(entry).await;
        let event = match &result {
            Ok(Outcome::Applied) => {
                info!("updated {} to version {}", entry.name, entry.version);
                SyncEvent::FileApplied {
                    name: entry.name.clone(),
                    version: entry.version,
                }
            }
            Ok(Outcome::AlreadyCurrent) => {
                info!("{} already at version {}", entry.name, entry.version);
                SyncEvent::FileAlreadyCurrent {
                    name: entry.name.clone(),
                    version: entry.version,
                }
            }
            Err(err) => {
                warn!("update of {} failed: {err}", entry.name);
                SyncEvent::FileFailed {
                    name: entry.name.clone(),
                    kind: err.kind(),
                    reason: err.to_string(),
                }
            }
        };
        events.send(event).ok();
        result
    }

    /// Download to `<final>.tmp`, check the digest, then rename into place.
    /// The final path only ever holds the old bytes or verified new bytes.
    async fn verified_replace(&self, entry: &ResourceDescriptor) -> Result<Outcome> {
        if !is_plain_file_name(&entry.name) {
            return Err(SyncError::InvalidName {
                name: entry.name.clone(),
            });
        }
        let final_path = self.config.resources_dir.join(&entry.name);
        let algorithm = DigestAlgorithm::for_expected(&entry.digest);

        if let Ok(current) = digest_file(&final_path, algorithm).await
            && digests_match(&current, &entry.digest)
        {
            return Ok(Outcome::AlreadyCurrent);
        }

        let staged = staging_path(&final_path);
        debug!("downloading {} to {}", entry.source_location, staged.display());
        let written = self
            .networking
            .fetch_to_file(&entry.source_location, &staged)
            .await?;

        let actual = match digest_file(&staged, algorithm).await {
            Ok(actual) => actual,
            Err(err) => {
                discard(&staged).await;
                return Err(err);
            }
        };
        if !digests_match(&actual, &entry.digest) {
            discard(&staged).await;
            return Err(SyncError::IntegrityMismatch {
                name: entry.name.clone(),
                expected: entry.digest.trim().to_ascii_lowercase(),
                actual,
            });
        }
        if entry.size > 0 && written != entry.size {
            warn!(
                "{}: manifest lists {} bytes, downloaded {written}",
                entry.name, entry.size
            );
        }

        if let Err(e) = fs::rename(&staged, &final_path).await {
            discard(&staged).await;
            return Err(SyncError::write(&final_path, e));
        }
        Ok(Outcome::Applied)
    }
}
