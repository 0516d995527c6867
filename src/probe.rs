//! Docker endpoint discovery.
//!
//! When the user gives no host we try, in order: the local unix socket, a
//! boot2docker VM over TLS, and finally a plain TCP port on localhost. The
//! first candidate that answers a ping wins. Resolution never fails; a bad
//! guess only shows up later when the real requests are made.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::client::Connector;
use crate::config::{
    BOOT2DOCKER_CERT_DIR, BOOT2DOCKER_HOST, ConnectionConfig, ConnectionHints, FALLBACK_HOST,
    LOCAL_SOCKET,
};
use crate::progress::Notice;

/// How long the boot2docker ping may take before we give up on it.
pub const REMOTE_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Resolver<'a> {
    connector: &'a dyn Connector,
    notice: &'a dyn Notice,
    home: Option<PathBuf>,
    local_socket: bool,
    remote_timeout: Duration,
}

impl<'a> Resolver<'a> {
    pub fn new(connector: &'a dyn Connector, notice: &'a dyn Notice) -> Self {
        Self {
            connector,
            notice,
            home: dirs::home_dir(),
            local_socket: cfg!(target_os = "linux"),
            remote_timeout: REMOTE_PROBE_TIMEOUT,
        }
    }

    /// Override the home directory the boot2docker certs are looked up in.
    #[cfg(test)]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Force the local socket probe on or off regardless of platform.
    #[cfg(test)]
    pub fn with_local_socket(mut self, enabled: bool) -> Self {
        self.local_socket = enabled;
        self
    }

    pub async fn resolve(&self, hints: ConnectionHints) -> ConnectionConfig {
        if let Some(host) = hints.host {
            return ConnectionConfig {
                host,
                tls: hints.tls_verify,
                cert_path: hints.cert_path,
            };
        }

        if self.local_socket {
            let candidate = ConnectionConfig::plain(LOCAL_SOCKET);
            self.notice.notice(&format!(
                "No Docker host specified, checking {}",
                candidate.host
            ));
            if self.probe_local(&candidate).await {
                return candidate;
            }
        }

        let candidate = ConnectionConfig::with_tls(BOOT2DOCKER_HOST, self.boot2docker_certs());
        self.notice.notice(&format!(
            "No Docker host specified, checking for boot2docker at {}",
            candidate.host
        ));
        if self.probe_remote(&candidate).await {
            return candidate;
        }

        let fallback = ConnectionConfig::plain(FALLBACK_HOST);
        self.notice.notice(&format!(
            "No Docker host found, falling back to default {}",
            fallback.host
        ));
        fallback
    }

    fn boot2docker_certs(&self) -> PathBuf {
        match &self.home {
            Some(home) => home.join(BOOT2DOCKER_CERT_DIR),
            None => PathBuf::from(BOOT2DOCKER_CERT_DIR),
        }
    }

    /// A missing socket fails immediately, so the ping runs inline.
    async fn probe_local(&self, candidate: &ConnectionConfig) -> bool {
        let daemon = match self.connector.connect(candidate) {
            Ok(daemon) => daemon,
            Err(err) => {
                tracing::debug!(host = %candidate.host, error = %err, "local socket unusable");
                return false;
            }
        };
        match daemon.ping().await {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(host = %candidate.host, error = %err, "local socket ping failed");
                false
            }
        }
    }

    /// A VM that is still booting can hold the connection open for a long
    /// time. The ping runs on its own task and we wait at most
    /// `remote_timeout` for it; a late answer is dropped with the receiver.
    async fn probe_remote(&self, candidate: &ConnectionConfig) -> bool {
        let daemon = match self.connector.connect(candidate) {
            Ok(daemon) => daemon,
            Err(err) => {
                tracing::debug!(host = %candidate.host, error = %err, "remote candidate unusable");
                return false;
            }
        };

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(daemon.ping().await);
        });

        match tokio::time::timeout(self.remote_timeout, rx).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(err))) => {
                tracing::debug!(host = %candidate.host, error = %err, "remote ping failed");
                false
            }
            Ok(Err(_)) => {
                tracing::debug!(host = %candidate.host, "remote ping task ended without a result");
                false
            }
            Err(_) => {
                tracing::debug!(
                    host = %candidate.host,
                    timeout_ms = self.remote_timeout.as_millis() as u64,
                    "remote ping timed out"
                );
                false
            }
        }
    }
}
