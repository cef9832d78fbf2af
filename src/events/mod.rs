use std::fmt;
use std::path::PathBuf;

use chrono::Local;
use log::warn;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Significant things that happen during a sync cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    CycleStarted { policy: &'static str },
    RemoteFetched { entries: usize },
    FileApplied { name: String, version: u64 },
    FileAlreadyCurrent { name: String, version: u64 },
    FileFailed { name: String, kind: &'static str, reason: String },
    CycleFinished { applied: usize },
    CycleFailed { kind: &'static str, reason: String },
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::CycleStarted { policy } => {
                write!(f, "checking for updates ({policy} policy)")
            }
            SyncEvent::RemoteFetched { entries } => {
                write!(f, "remote manifest lists {entries} files")
            }
            SyncEvent::FileApplied { name, version } => {
                write!(f, "updated {name} to version {version}")
            }
            SyncEvent::FileAlreadyCurrent { name, version } => {
                write!(f, "{name} already matches version {version}")
            }
            SyncEvent::FileFailed { name, kind, reason } => {
                write!(f, "update of {name} failed [{kind}]: {reason}")
            }
            SyncEvent::CycleFinished { applied } => {
                write!(f, "update check finished, {applied} files updated")
            }
            SyncEvent::CycleFailed { kind, reason } => {
                write!(f, "update failed [{kind}]: {reason}")
            }
        }
    }
}

/// Append-only, one line per event.
#[derive(Clone, Debug)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn append(&self, event: &SyncEvent) -> std::io::Result<()> {
        let line = format!("{} {event}\n", Local::now().format("%Y/%m/%d %H:%M:%S"));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    /// Drain `events` into the log until every sender is dropped.
    pub fn spawn_writer(self, mut events: mpsc::UnboundedReceiver<SyncEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(err) = self.append(&event).await {
                    warn!(
                        "event log: failed to append to {}: {err}",
                        self.path.display()
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_events() {
        let event = SyncEvent::FileApplied {
            name: "core.bin".into(),
            version: 3,
        };
        assert_eq!(event.to_string(), "updated core.bin to version 3");

        let event = SyncEvent::CycleFailed {
            kind: "remote-status",
            reason: "http://host returned status 500".into(),
        };
        assert_eq!(
            event.to_string(),
            "update failed [remote-status]: http://host returned status 500"
        );
    }

    #[tokio::test]
    async fn writer_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update.log");
        std::fs::write(&path, "earlier line\n").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = EventLog::new(&path).spawn_writer(rx);
        tx.send(SyncEvent::CycleStarted { policy: "diff" }).unwrap();
        tx.send(SyncEvent::CycleFinished { applied: 0 }).unwrap();
        drop(tx);
        writer.await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "earlier line");
        assert!(lines[1].ends_with("checking for updates (diff policy)"));
        assert!(lines[2].ends_with("update check finished, 0 files updated"));
    }
}
