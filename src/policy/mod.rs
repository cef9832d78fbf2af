//! Eligibility rules deciding whether a remote descriptor should replace what
//! is on disk.
//!
//! Two rules exist side by side and are picked by configuration:
//!
//! * [`EligibilityPolicy::Gate`] looks at one global client version and the
//!   descriptor's `MinVersion`/`EnabledUpdate` pair, and applies at most one
//!   descriptor per cycle.
//! * [`EligibilityPolicy::Diff`] compares per-file versions by name and
//!   applies every stale file in one cycle.

use crate::engine::models::{Manifest, ResourceDescriptor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EligibilityPolicy {
    Gate { current_version: u64 },
    Diff { add_missing: bool },
}

/// Outcome of evaluating one remote descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Local entry for the name when one exists, otherwise the remote one.
    pub entry: ResourceDescriptor,
    pub required: bool,
}

impl EligibilityPolicy {
    pub fn decide(&self, local: &Manifest, remote: &ResourceDescriptor) -> Decision {
        match *self {
            EligibilityPolicy::Gate { current_version } => Decision {
                entry: remote.clone(),
                required: current_version >= remote.minimum_version && remote.update_enabled,
            },
            EligibilityPolicy::Diff { add_missing } => match local.get(&remote.name) {
                Some(existing) => Decision {
                    entry: existing.clone(),
                    required: existing.version < remote.version,
                },
                None => Decision {
                    entry: remote.clone(),
                    required: add_missing,
                },
            },
        }
    }

    /// Gate applies one descriptor per cycle; diff applies all of them.
    pub fn single_update_per_cycle(&self) -> bool {
        matches!(self, EligibilityPolicy::Gate { .. })
    }

    /// Only the diff rule keeps per-file state in a local manifest.
    pub fn tracks_local_manifest(&self) -> bool {
        matches!(self, EligibilityPolicy::Diff { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            EligibilityPolicy::Gate { .. } => "gate",
            EligibilityPolicy::Diff { .. } => "diff",
        }
    }
}
