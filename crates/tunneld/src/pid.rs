//! PID file management.
//!
//! Absolute path required (enforced by `tunnel_config::validation`).
//! Contents: the decimal PID followed by a newline, permissions 0644,
//! created with exclusive-create semantics so two daemons never clobber each
//! other's file, and unlinked at normal exit only by the process whose
//! recorded PID matches the current one.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::debug;

use crate::errors::TunnelError;

/// Create the PID file with exclusive-create semantics and write the
/// current process's PID into it.
pub fn write(path: &Path) -> Result<(), TunnelError> {
    let pid = std::process::id();
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| TunnelError::startup(format!("create pid file {}", path.display()), &e))?;
    file.write_all(format!("{pid}\n").as_bytes())
        .map_err(|e| TunnelError::startup(format!("write pid file {}", path.display()), &e))?;
    debug!(event = "pid.written", pid, path = %path.display());
    Ok(())
}

/// Remove the PID file, but only if it still names the current process —
/// a second daemon instance that failed to start must never delete the
/// first one's PID file.
pub fn remove(path: &Path) {
    let recorded = std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok());
    if recorded == Some(std::process::id()) {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(event = "pid.remove_failed", path = %path.display(), error = %e);
        } else {
            debug!(event = "pid.removed", path = %path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunneld.pid");

        write(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n", std::process::id()));

        remove(&path);
        assert!(!path.exists());
    }

    #[test]
    fn write_fails_if_file_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunneld.pid");
        std::fs::write(&path, "1\n").unwrap();

        let err = write(&path).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn remove_does_not_delete_a_file_owned_by_another_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunneld.pid");
        std::fs::write(&path, "999999\n").unwrap();

        remove(&path);
        assert!(path.exists());
    }

    #[test]
    fn file_has_0644_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunneld.pid");
        write(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }
}
