use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use sipc_core::tcp::TcpHub;
use sipc_core::{DispatchStats, EchoHandler, Responder};
use sipc_crypto::identity::AsymmetricIdentity;
use sipc_crypto::keystore::{FileKeyStore, KeyStore, MemoryKeyStore};

use crate::config::ServiceConfig;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service initialization failed: {0}")]
    InitFailed(String),
    #[error("service start failed: {0}")]
    StartFailed(String),
    #[error("service stop failed: {0}")]
    StopFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    Running,
}

/// Where the responder keeps its RSA keypair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStorage {
    /// `FileKeyStore` under the configured key directory
    Persistent,
    /// `MemoryKeyStore`; a fresh identity on every start
    Ephemeral,
}

/// Open the key store and make sure the identity keypair exists.
///
/// Key generation is CPU-bound and runs on the blocking pool.
pub async fn load_identity(
    config: &ServiceConfig,
    storage: KeyStorage,
) -> Result<AsymmetricIdentity, ServiceError> {
    let store: Arc<dyn KeyStore> = match storage {
        KeyStorage::Persistent => Arc::new(
            FileKeyStore::open(&config.key_dir)
                .map_err(|e| ServiceError::InitFailed(e.to_string()))?,
        ),
        KeyStorage::Ephemeral => Arc::new(MemoryKeyStore::new()),
    };
    let identity =
        AsymmetricIdentity::new(store, config.key_alias.clone()).with_modulus_bits(config.rsa_bits);

    let worker = identity.clone();
    tokio::task::spawn_blocking(move || worker.ensure_key_pair())
        .await
        .map_err(|e| ServiceError::InitFailed(e.to_string()))?
        .map_err(|e| ServiceError::InitFailed(e.to_string()))?;
    Ok(identity)
}

/// The responder daemon: identity, TCP listener and router.
pub struct SecureService {
    status: ServiceStatus,
    local_addr: SocketAddr,
    fingerprint: String,
    stats: Arc<DispatchStats>,
    hub: Arc<TcpHub>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SecureService {
    pub async fn start(config: &ServiceConfig, storage: KeyStorage) -> Result<Self, ServiceError> {
        let bind = config
            .socket_addr()
            .map_err(|e| ServiceError::StartFailed(e.to_string()))?;
        let identity = load_identity(config, storage).await?;
        let fingerprint = identity
            .fingerprint()
            .map_err(|e| ServiceError::InitFailed(e.to_string()))?;
        info!(alias = identity.alias(), %fingerprint, "identity ready");

        let (hub, events) = TcpHub::new();
        let local_addr = hub
            .listen(bind)
            .await
            .map_err(|e| ServiceError::StartFailed(e.to_string()))?;

        let responder = Responder::new(
            identity,
            hub.clone(),
            Arc::new(EchoHandler::new(config.response_prefix.clone())),
        );
        let stats = Arc::clone(responder.stats());

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = responder.run(events) => {}
                _ = shutdown_rx.wait_for(|stop| *stop) => {}
            }
        });

        info!(%local_addr, "secure service running");
        Ok(Self {
            status: ServiceStatus::Running,
            local_addr,
            fingerprint,
            stats,
            hub,
            shutdown,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Hex SHA-256 of the exported public key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    /// Stop routing and release the listening socket. Open connections,
    /// channels and their session keys are dropped.
    pub async fn stop(&mut self) -> Result<(), ServiceError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        info!("stopping secure service");
        let _ = self.shutdown.send(true);
        let routed = task.await;
        self.hub.shutdown().await;
        routed.map_err(|e| ServiceError::StopFailed(e.to_string()))?;
        self.status = ServiceStatus::Stopped;
        Ok(())
    }
}
