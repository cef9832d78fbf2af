use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use log::warn;

/// Render a human-friendly transfer speed string.
#[must_use]
pub fn format_speed(bytes_per_sec: f32) -> String {
    const KIB: f32 = 1024.0;
    const MIB: f32 = KIB * 1024.0;

    if bytes_per_sec < KIB {
        format!("{bytes_per_sec:.0} B/s")
    } else if bytes_per_sec < MIB {
        format!("{:.1} KB/s", bytes_per_sec / KIB)
    } else {
        format!("{:.1} MB/s", bytes_per_sec / MIB)
    }
}

/// `<path>.tmp`, next to the final file so the rename stays on one filesystem.
#[must_use]
pub fn staging_path(path: &Path) -> PathBuf {
    let mut staged = OsString::from(path.as_os_str());
    staged.push(".tmp");
    PathBuf::from(staged)
}

/// Remove a staging file on an error path. A file that is already gone is
/// fine; anything else is logged so a stranded file shows up.
pub async fn discard(staged: &Path) {
    if let Err(err) = tokio::fs::remove_file(staged).await
        && err.kind() != ErrorKind::NotFound
    {
        warn!("failed to remove staging file {}: {err}", staged.display());
    }
}

/// True when `name` is a single normal path component.
#[must_use]
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}
