//! Listening sockets bound once and inherited by every worker.
//!
//! # Data Flow
//! ```text
//! parent: SharedSockets::bind(config)
//!     → std TcpListener per role, FD_CLOEXEC cleared
//!     → MICROHOST_LISTEN_FDS="tcp=3,http=4" in each child's environment
//! worker: SharedSockets::from_env_value(..)
//!     → adopt the inherited descriptors, never re-bind
//! ```
//!
//! # Design Decisions
//! - The kernel spreads incoming connections across all processes blocked
//!   in accept on the same socket; there is no balancing logic here

use std::fmt;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};

use crate::config::HostConfig;
use crate::error::WorkerError;

/// Environment variable carrying the inherited descriptors.
pub const LISTEN_FDS_ENV: &str = "MICROHOST_LISTEN_FDS";

/// Which listener a socket serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketRole {
    Tcp,
    Http,
}

impl SocketRole {
    pub fn name(&self) -> &'static str {
        match self {
            SocketRole::Tcp => "tcp",
            SocketRole::Http => "http",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "tcp" => Some(SocketRole::Tcp),
            "http" => Some(SocketRole::Http),
            _ => None,
        }
    }
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The packet listener plus the optional HTTP listener.
#[derive(Debug)]
pub struct SharedSockets {
    tcp: TcpListener,
    http: Option<TcpListener>,
}

impl SharedSockets {
    /// Bind the configured listeners and mark them inheritable.
    pub fn bind(config: &HostConfig) -> Result<Self, WorkerError> {
        let tcp = bind_inheritable(&config.tcp.bind_address)?;
        let http = if config.http.enabled {
            Some(bind_inheritable(&config.http.bind_address)?)
        } else {
            None
        };
        let sockets = Self { tcp, http };
        tracing::info!(
            tcp = %sockets.describe_addr(SocketRole::Tcp),
            http = %sockets.describe_addr(SocketRole::Http),
            "Bound shared sockets"
        );
        Ok(sockets)
    }

    pub fn tcp(&self) -> &TcpListener {
        &self.tcp
    }

    pub fn http(&self) -> Option<&TcpListener> {
        self.http.as_ref()
    }

    pub fn tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn http_addr(&self) -> Option<std::io::Result<SocketAddr>> {
        self.http.as_ref().map(TcpListener::local_addr)
    }

    fn describe_addr(&self, role: SocketRole) -> String {
        let addr = match role {
            SocketRole::Tcp => Some(self.tcp.local_addr()),
            SocketRole::Http => self.http_addr(),
        };
        match addr {
            Some(Ok(addr)) => addr.to_string(),
            Some(Err(_)) => "unknown".to_string(),
            None => "disabled".to_string(),
        }
    }

    /// Value for `MICROHOST_LISTEN_FDS` describing these sockets.
    pub fn env_value(&self) -> String {
        let mut parts = vec![format!("{}={}", SocketRole::Tcp, self.tcp.as_raw_fd())];
        if let Some(http) = &self.http {
            parts.push(format!("{}={}", SocketRole::Http, http.as_raw_fd()));
        }
        parts.join(",")
    }

    /// Adopt sockets inherited from the parent.
    pub fn from_env_value(value: &str) -> Result<Self, WorkerError> {
        let mut tcp = None;
        let mut http = None;
        for (role, fd) in parse_listen_fds(value)? {
            // F_GETFD fails on a descriptor that was not actually inherited.
            fcntl(fd, FcntlArg::F_GETFD)
                .map_err(|_| WorkerError::InvalidEnvironment(format!("{role}={fd} is not open")))?;
            // SAFETY: the descriptor is open, was created by the parent as a
            // listening socket, and nothing else in this process owns it.
            let listener = unsafe { TcpListener::from_raw_fd(fd) };
            match role {
                SocketRole::Tcp => tcp = Some(listener),
                SocketRole::Http => http = Some(listener),
            }
        }
        Ok(Self {
            tcp: tcp.ok_or(WorkerError::MissingSocket("tcp"))?,
            http,
        })
    }

    pub fn into_parts(self) -> (TcpListener, Option<TcpListener>) {
        (self.tcp, self.http)
    }
}

/// Bind `addr` with a listener that survives exec.
pub fn bind_inheritable(addr: &str) -> Result<TcpListener, WorkerError> {
    let listener = TcpListener::bind(addr).map_err(|source| WorkerError::Bind {
        addr: addr.to_string(),
        source,
    })?;
    fcntl(listener.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty()))?;
    Ok(listener)
}

/// Parse `role=fd` pairs separated by commas.
pub fn parse_listen_fds(value: &str) -> Result<Vec<(SocketRole, RawFd)>, WorkerError> {
    let invalid = || WorkerError::InvalidEnvironment(value.to_string());
    let mut seen = Vec::new();
    for part in value.split(',').filter(|p| !p.is_empty()) {
        let (role, fd) = part.split_once('=').ok_or_else(invalid)?;
        let role = SocketRole::parse(role.trim()).ok_or_else(invalid)?;
        let fd: RawFd = fd.trim().parse().map_err(|_| invalid())?;
        if fd < 0 || seen.iter().any(|(r, _)| *r == role) {
            return Err(invalid());
        }
        seen.push((role, fd));
    }
    Ok(seen)
}
