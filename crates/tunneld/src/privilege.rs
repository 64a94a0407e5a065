//! Privilege manager.
//!
//! Performs chroot, setgid/setgroups, setuid and PID-file placement in the
//! mandated order, plus daemonization. Grounded on `daemonbase`'s
//! `Process::drop_privileges`/`set_user_and_group` for the resolve-then-apply
//! shape, and on `stunnel.c`'s `drop_privileges()`/`daemonize()` for exact
//! sequencing.

use std::path::Path;

use nix::unistd::{self, Gid, Group, Uid, User};
use tracing::info;

use crate::errors::TunnelError;
use crate::pid;
use tunnel_config::GlobalOptions;

/// A user or group identifier as configured: either a symbolic name looked
/// up via the system database, or a decimal numeric id.
fn resolve_uid(spec: &str) -> Result<Uid, TunnelError> {
    if let Ok(numeric) = spec.parse::<u32>() {
        return Ok(Uid::from_raw(numeric));
    }
    User::from_name(spec)
        .map_err(|e| config_error(spec, &e.to_string()))?
        .map(|u| u.uid)
        .ok_or_else(|| config_error(spec, "no such user"))
}

fn resolve_gid(spec: &str) -> Result<Gid, TunnelError> {
    if let Ok(numeric) = spec.parse::<u32>() {
        return Ok(Gid::from_raw(numeric));
    }
    Group::from_name(spec)
        .map_err(|e| config_error(spec, &e.to_string()))?
        .map(|g| g.gid)
        .ok_or_else(|| config_error(spec, "no such group"))
}

fn config_error(spec: &str, message: &str) -> TunnelError {
    TunnelError::Startup {
        context: format!("resolve identity '{spec}'"),
        message: message.to_string(),
        code: -1,
    }
}

/// Perform the full privilege-drop sequence: chroot+chdir, then (after
/// writing the PID file) setgid+setgroups, then setuid.
///
/// Decision: the PID file is written **after** chroot but **before**
/// setuid, so the daemon still holds the privileges needed to create and
/// permission the file, and the file lands inside the chroot jail where
/// the unprivileged process can still see it.
pub fn drop_privileges(global: &GlobalOptions) -> Result<(), TunnelError> {
    if let Some(dir) = &global.chroot {
        unistd::chroot(dir.as_path())
            .map_err(|e| TunnelError::startup(format!("chroot {}", dir.display()), &std::io::Error::from_raw_os_error(e as i32)))?;
        unistd::chdir("/")
            .map_err(|e| TunnelError::startup("chdir / after chroot", &std::io::Error::from_raw_os_error(e as i32)))?;
        info!(event = "privilege.chroot", dir = %dir.display());
    }

    if let Some(path) = &global.pid {
        pid::write(path)?;
    }

    if let Some(group_spec) = &global.setgid {
        let gid = resolve_gid(group_spec)?;
        unistd::setgroups(&[gid]).map_err(|e| TunnelError::startup("setgroups", &std::io::Error::from_raw_os_error(e as i32)))?;
        unistd::setgid(gid).map_err(|e| TunnelError::startup("setgid", &std::io::Error::from_raw_os_error(e as i32)))?;
        info!(event = "privilege.setgid", gid = gid.as_raw());
    }

    if let Some(user_spec) = &global.setuid {
        let uid = resolve_uid(user_spec)?;
        unistd::setuid(uid).map_err(|e| TunnelError::startup("setuid", &std::io::Error::from_raw_os_error(e as i32)))?;
        info!(event = "privilege.setuid", uid = uid.as_raw());
    }

    Ok(())
}

/// Detach from the controlling terminal: fork, `setsid`, and redirect the
/// standard streams to `/dev/null`, matching `stunnel.c`'s `daemonize()`.
/// Must run before privilege drop and after bind: binding may need
/// privileges the daemonized child retains until `drop_privileges` runs.
pub fn daemonize() -> Result<(), TunnelError> {
    match unsafe { unistd::fork() } {
        Ok(unistd::ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(unistd::ForkResult::Child) => {}
        Err(e) => return Err(TunnelError::startup("fork", &std::io::Error::from_raw_os_error(e as i32))),
    }

    unistd::setsid().map_err(|e| TunnelError::startup("setsid", &std::io::Error::from_raw_os_error(e as i32)))?;

    let dev_null = Path::new("/dev/null");
    let null_fd = nix::fcntl::open(
        dev_null,
        nix::fcntl::OFlag::O_RDWR,
        nix::sys::stat::Mode::empty(),
    )
    .map_err(|e| {
        TunnelError::startup("open /dev/null", &std::io::Error::from_raw_os_error(e as i32))
    })?;
    for fd in [0, 1, 2] {
        unsafe {
            libc::dup2(null_fd, fd);
        }
    }
    Ok(())
}
