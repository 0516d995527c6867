//! Thin layer over the Docker API client.
//!
//! The resolver and the `sizes` command only need two calls from the daemon,
//! so they talk to it through the [`Daemon`] trait. [`DockerConnector`] backs
//! it with `bollard`.

use std::sync::Arc;

use async_trait::async_trait;
use bollard::image::ListImagesOptions;
use bollard::{API_DEFAULT_VERSION, Docker};

use crate::config::ConnectionConfig;
use crate::graph::ImageRecord;

/// Seconds bollard waits on a single request.
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Bad endpoint or unusable TLS material. Nothing was sent.
    #[error("invalid docker configuration: {0}")]
    Config(String),

    /// The daemon could not be reached or answered with an error.
    #[error("docker request failed: {0}")]
    Transport(String),
}

impl From<bollard::errors::Error> for ClientError {
    fn from(err: bollard::errors::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// The daemon operations the rest of the crate relies on.
#[async_trait]
pub trait Daemon: Send + Sync {
    /// Cheap round trip, used to check an endpoint is alive.
    async fn ping(&self) -> Result<(), ClientError>;

    /// List images. `all` includes intermediate layers.
    async fn list_images(&self, all: bool) -> Result<Vec<ImageRecord>, ClientError>;
}

/// Builds a [`Daemon`] for a connection config.
pub trait Connector: Send + Sync {
    fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Daemon>, ClientError>;
}

/// Connects to real daemons through bollard.
pub struct DockerConnector;

impl Connector for DockerConnector {
    fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn Daemon>, ClientError> {
        let docker = open(config)?;
        Ok(Arc::new(DockerDaemon { docker }))
    }
}

fn open(config: &ConnectionConfig) -> Result<Docker, ClientError> {
    let host = config.host.as_str();

    if let Some(path) = host.strip_prefix("unix://") {
        return open_unix(path);
    }

    if !(host.starts_with("tcp://") || host.starts_with("http://") || host.starts_with("https://"))
    {
        return Err(ClientError::Config(format!(
            "unsupported docker host '{host}', expected unix://, tcp:// or http(s)://"
        )));
    }

    if config.tls {
        let files = config.tls_files();
        for path in files.iter() {
            std::fs::File::open(path).map_err(|e| {
                ClientError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
        }
        return Docker::connect_with_ssl(
            host,
            &files.key,
            &files.cert,
            &files.ca,
            REQUEST_TIMEOUT_SECS,
            API_DEFAULT_VERSION,
        )
        .map_err(|e| ClientError::Config(e.to_string()));
    }

    Docker::connect_with_http(host, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
        .map_err(|e| ClientError::Config(e.to_string()))
}

#[cfg(unix)]
fn open_unix(path: &str) -> Result<Docker, ClientError> {
    Docker::connect_with_unix(path, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
        .map_err(|e| ClientError::Config(e.to_string()))
}

#[cfg(not(unix))]
fn open_unix(path: &str) -> Result<Docker, ClientError> {
    Err(ClientError::Config(format!(
        "unix sockets are not supported on this platform: {path}"
    )))
}

struct DockerDaemon {
    docker: Docker,
}

#[async_trait]
impl Daemon for DockerDaemon {
    async fn ping(&self) -> Result<(), ClientError> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn list_images(&self, all: bool) -> Result<Vec<ImageRecord>, ClientError> {
        let options = ListImagesOptions::<String> {
            all,
            ..Default::default()
        };
        let images = self.docker.list_images(Some(options)).await?;
        tracing::debug!(count = images.len(), all, "listed images");
        Ok(images.into_iter().map(ImageRecord::from).collect())
    }
}

impl From<bollard::models::ImageSummary> for ImageRecord {
    fn from(i: bollard::models::ImageSummary) -> Self {
        let size = non_negative(i.size);
        Self {
            id: i.id,
            parent_id: Some(i.parent_id).filter(|p| !p.is_empty()),
            size,
            virtual_size: i.virtual_size.map(non_negative).unwrap_or(size),
            repo_tags: i.repo_tags,
        }
    }
}

/// The API reports sizes as signed integers; `-1` means unknown.
fn non_negative(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}
