//! Purpose: Shared data-directory resolution for the CLI and API clients.
//! Exports: `default_data_dir`.
//! Role: Keep CLI and client path semantics aligned from one source.
//! Invariants: Resolution order is `SNIPSTORE_DATA_DIR`, then `~/.snipstore`.

use std::path::PathBuf;

pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("SNIPSTORE_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".snipstore")
}

#[cfg(test)]
mod tests {
    use super::default_data_dir;

    #[test]
    fn default_data_dir_lands_under_home() {
        if std::env::var_os("SNIPSTORE_DATA_DIR").is_some() {
            return;
        }
        let dir = default_data_dir();
        assert!(dir.to_string_lossy().contains(".snipstore"));
    }
}
