use std::path::{Path, PathBuf};

/// Environment variable that relocates the data directory (config, database, log).
pub const DATA_DIR_ENV: &str = "CORTEXKIT_DATA_DIR";

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Root data directory for cortexkit.
    /// Unix: `~/.cortexkit`, Windows: `%APPDATA%\cortexkit`.
    fn data_dir() -> PathBuf;
}

/// Honour `CORTEXKIT_DATA_DIR` when set and non-empty, otherwise use `default`.
pub(crate) fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var(DATA_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
