use std::fmt;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;

/// Well-known local daemon socket.
pub const LOCAL_SOCKET: &str = "unix:///var/run/docker.sock";

/// boot2docker VM address, TLS only.
pub const BOOT2DOCKER_HOST: &str = "tcp://192.168.59.103:2376";

/// boot2docker cert directory, relative to `$HOME`.
pub const BOOT2DOCKER_CERT_DIR: &str = ".boot2docker/certs/boot2docker-vm";

/// Last-resort guess when nothing else answers.
pub const FALLBACK_HOST: &str = "tcp://127.0.0.1:2375";

/// File names the daemon client expects inside a cert directory.
pub const CLIENT_CERT_FILE: &str = "cert.pem";
pub const CLIENT_KEY_FILE: &str = "key.pem";
pub const CA_CERT_FILE: &str = "ca.pem";

/// Docker connection flags, bound to the same environment variables the
/// docker CLI reads.
#[derive(Args, Debug, Clone, Default)]
pub struct DockerArgs {
    /// Docker API endpoint (unix:// or tcp://)
    #[arg(long, global = true, env = "DOCKER_HOST")]
    pub docker_host: Option<String>,

    /// Use TLS when talking to the Docker API (1/true/yes)
    #[arg(
        long,
        global = true,
        env = "DOCKER_TLS_VERIFY",
        default_value = "0",
        action = clap::ArgAction::Set,
        value_parser = parse_flag
    )]
    pub docker_tls_verify: bool,

    /// Directory holding cert.pem, key.pem and ca.pem
    #[arg(long, global = true, env = "DOCKER_CERT_PATH")]
    pub docker_cert_path: Option<PathBuf>,
}

impl DockerArgs {
    pub fn hints(&self) -> ConnectionHints {
        ConnectionHints {
            host: self.docker_host.clone().filter(|h| !h.trim().is_empty()),
            tls_verify: self.docker_tls_verify,
            cert_path: self
                .docker_cert_path
                .clone()
                .filter(|p| !p.as_os_str().is_empty()),
        }
    }
}

/// Accepts the loose truthy values people put in `DOCKER_TLS_VERIFY`.
fn parse_flag(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected 0 or 1, got '{other}'")),
    }
}

/// What the user told us about the daemon, possibly nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHints {
    pub host: Option<String>,
    pub tls_verify: bool,
    pub cert_path: Option<PathBuf>,
}

/// A concrete endpoint to build a client from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub tls: bool,
    pub cert_path: Option<PathBuf>,
}

impl ConnectionConfig {
    pub fn plain(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            tls: false,
            cert_path: None,
        }
    }

    pub fn with_tls(host: impl Into<String>, cert_path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            tls: true,
            cert_path: Some(cert_path.into()),
        }
    }

    /// The cert directory to read TLS material from. Falls back to
    /// `~/.docker`, where the docker CLI keeps it.
    pub fn cert_dir(&self) -> PathBuf {
        self.cert_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(".docker"))
                .unwrap_or_else(|| PathBuf::from(".docker"))
        })
    }

    pub fn tls_files(&self) -> TlsFiles {
        TlsFiles::in_dir(&self.cert_dir())
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tls {
            write!(f, "{} (tls, certs: {})", self.host, self.cert_dir().display())
        } else {
            write!(f, "{}", self.host)
        }
    }
}

/// Client certificate, private key and CA certificate paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

impl TlsFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            cert: dir.join(CLIENT_CERT_FILE),
            key: dir.join(CLIENT_KEY_FILE),
            ca: dir.join(CA_CERT_FILE),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [self.cert.as_path(), self.key.as_path(), self.ca.as_path()].into_iter()
    }
}
