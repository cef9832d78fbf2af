use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
pub const EVENT_LOG_FILE: &str = "update.log";
pub const LOCAL_MANIFEST_FILE: &str = "manifest.json";
pub const REMOTE_COPY_FILE: &str = "preload.json";

/// Directory holding the agent executable; config and logs live next to it.
pub fn executable_dir() -> std::io::Result<PathBuf> {
    let exe = env::current_exe()?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

/// Resource directory relative to the executable. On macOS the agent ships
/// inside the app bundle's `Contents/MacOS`.
pub fn default_resources_dir(exe_dir: &Path) -> PathBuf {
    let relative = if cfg!(target_os = "macos") {
        Path::new("..")
            .join("..")
            .join("Resources")
            .join("exts")
            .join("preload")
    } else {
        Path::new("resources").join("exts").join("preload")
    };
    exe_dir.join(relative)
}

/// Resolve a configured path against the executable directory.
pub fn resolve(exe_dir: &Path, configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        exe_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resources_dir_lives_under_exe_dir() {
        let dir = default_resources_dir(Path::new("/opt/app"));
        assert!(dir.starts_with("/opt/app"));
        assert!(dir.ends_with(Path::new("exts").join("preload")));
    }

    #[test]
    fn resolves_relative_and_absolute_paths() {
        let exe = Path::new("/opt/app");
        assert_eq!(resolve(exe, "data/m.json"), PathBuf::from("/opt/app/data/m.json"));
        assert_eq!(resolve(exe, "/var/m.json"), PathBuf::from("/var/m.json"));
    }
}
