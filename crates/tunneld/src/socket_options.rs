//! Socket-option table.
//!
//! A data-driven name -> `(level, optname)` table, applied at three roles
//! (`accept`, `local`, `remote`) against the values a `ServiceDefinition`
//! carries. Kept as data rather than inline control flow, the same way the
//! platform error table in `errors.rs` is: a long match statement per
//! option name would bury the actual policy (which options exist) inside
//! dispatch code.

use socket2::Socket;
use tunnel_config::OptionValue;

struct OptionSpec {
    name: &'static str,
    level: i32,
    optname: i32,
}

const TABLE: &[OptionSpec] = &[
    OptionSpec {
        name: "SO_REUSEADDR",
        level: libc::SOL_SOCKET,
        optname: libc::SO_REUSEADDR,
    },
    OptionSpec {
        name: "SO_KEEPALIVE",
        level: libc::SOL_SOCKET,
        optname: libc::SO_KEEPALIVE,
    },
    OptionSpec {
        name: "SO_LINGER",
        level: libc::SOL_SOCKET,
        optname: libc::SO_LINGER,
    },
    OptionSpec {
        name: "TCP_NODELAY",
        level: libc::IPPROTO_TCP,
        optname: libc::TCP_NODELAY,
    },
    OptionSpec {
        name: "SO_RCVBUF",
        level: libc::SOL_SOCKET,
        optname: libc::SO_RCVBUF,
    },
    OptionSpec {
        name: "SO_SNDBUF",
        level: libc::SOL_SOCKET,
        optname: libc::SO_SNDBUF,
    },
];

/// Apply a single named option with its configured value to `socket`.
///
/// Unknown option names and value/type mismatches are rejected rather than
/// silently ignored, since a typo in a service's `socket` table should
/// surface at startup, not at the first connection.
pub fn apply(socket: &Socket, name: &str, value: &OptionValue) -> std::io::Result<()> {
    let spec = TABLE
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("unknown socket option '{name}'")))?;

    match (name, value) {
        ("SO_LINGER", OptionValue::Linger(on, secs)) => {
            let linger = if *on {
                Some(std::time::Duration::from_secs((*secs).max(0) as u64))
            } else {
                None
            };
            socket.set_linger(linger)
        }
        (_, OptionValue::Int(v)) => set_int(socket, spec, *v as i32),
        (_, OptionValue::Bool(v)) => set_int(socket, spec, if *v { 1 } else { 0 }),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported value type for socket option '{name}'"),
        )),
    }
}

fn set_int(socket: &Socket, spec: &OptionSpec, value: i32) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = socket.as_raw_fd();
    let rc = unsafe {
        libc::setsockopt(
            fd,
            spec.level,
            spec.optname,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Apply every override configured for one role, stopping at the first
/// failure. Application is idempotent: applying the same table twice to a
/// fresh socket succeeds both times.
pub fn apply_all<'a>(
    socket: &Socket,
    options: impl IntoIterator<Item = (&'a String, &'a OptionValue)>,
) -> std::io::Result<()> {
    for (name, value) in options {
        apply(socket, name, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use socket2::{Domain, Type};

    #[test]
    fn unknown_option_name_is_rejected() {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        let err = apply(&socket, "NOT_A_REAL_OPTION", &OptionValue::Bool(true)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn reuseaddr_applies_idempotently() {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        apply(&socket, "SO_REUSEADDR", &OptionValue::Bool(true)).unwrap();
        apply(&socket, "SO_REUSEADDR", &OptionValue::Bool(true)).unwrap();
        assert!(socket.reuse_address().unwrap());
    }

    #[test]
    fn linger_option_applies() {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        apply(&socket, "SO_LINGER", &OptionValue::Linger(true, 5)).unwrap();
        assert!(socket.linger().unwrap().is_some());
    }

    #[test]
    fn tcp_nodelay_with_wrong_value_type_is_rejected() {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
        let err = apply(
            &socket,
            "TCP_NODELAY",
            &OptionValue::Linger(true, 1),
        )
        .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
