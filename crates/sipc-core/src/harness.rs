//! Test harness for secure channel flows.
//!
//! Provides a process-wide responder identity (RSA generation is slow, so
//! it happens once) and an end-to-end flow over the in-process bus.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use sipc_crypto::identity::AsymmetricIdentity;
use sipc_crypto::keystore::MemoryKeyStore;

use crate::channel::EchoHandler;
use crate::dispatch::{DispatchStatsSnapshot, Initiator, Responder};
use crate::errors::CoreError;
use crate::transport::LocalBus;

/// Alias of the shared harness identity.
pub const HARNESS_ALIAS: &str = "harness-responder";

/// Upper bound for any single wait in [`run_handshake_flow`].
pub const FLOW_TIMEOUT: Duration = Duration::from_secs(30);

static STORE: OnceLock<Arc<MemoryKeyStore>> = OnceLock::new();

/// A responder identity shared by every caller in this process.
pub fn shared_identity() -> Result<AsymmetricIdentity, CoreError> {
    let store = STORE.get_or_init(|| Arc::new(MemoryKeyStore::new())).clone();
    let identity = AsymmetricIdentity::new(store, HARNESS_ALIAS);
    identity.ensure_key_pair()?;
    Ok(identity)
}

/// Result of one complete flow.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub responses: Vec<String>,
    pub responder_stats: DispatchStatsSnapshot,
    pub initiator_stats: DispatchStatsSnapshot,
}

async fn within<T>(
    what: &str,
    fut: impl std::future::Future<Output = Result<T, CoreError>>,
) -> Result<T, CoreError> {
    tokio::time::timeout(FLOW_TIMEOUT, fut)
        .await
        .map_err(|_| CoreError::Internal(format!("timed out waiting for {}", what)))?
}

/// Run a complete handshake and exchange over a fresh bus.
///
/// Each message in `messages` is submitted in order; the outcome holds
/// the decrypted responses in arrival order.
pub async fn run_handshake_flow(messages: &[&str]) -> Result<FlowOutcome, CoreError> {
    let bus = Arc::new(LocalBus::new());
    let (service_addr, service_rx) = bus.bind();
    let (client_addr, client_rx) = bus.bind();

    let responder = Responder::new(
        shared_identity()?,
        bus.clone(),
        Arc::new(EchoHandler::default()),
    )
    .with_local_address(service_addr);
    let responder_stats = Arc::clone(responder.stats());
    let router = responder.spawn(service_rx);

    let initiator = Initiator::spawn(bus.clone(), client_addr, client_rx);
    initiator.connect(service_addr).await?;
    within("handshake", initiator.established()).await?;

    for text in messages {
        initiator.submit(*text).await?;
    }
    let responses = within("responses", initiator.wait_for_responses(messages.len())).await?;

    let outcome = FlowOutcome {
        responses,
        responder_stats: responder_stats.snapshot(),
        initiator_stats: initiator.stats().snapshot(),
    };
    initiator.shutdown();
    router.abort();
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hello_flow() {
        let outcome = run_handshake_flow(&["hello"]).await.unwrap();
        assert_eq!(outcome.responses, vec!["Service received: hello".to_string()]);
        // key request, session key, secure data
        assert_eq!(outcome.responder_stats.dispatched, 3);
        assert_eq!(outcome.responder_stats.dropped, 0);
        // public key reply, secure response
        assert_eq!(outcome.initiator_stats.dispatched, 2);
    }

    #[test]
    fn test_identity_is_shared() {
        let a = shared_identity().unwrap().public_key().unwrap();
        let b = shared_identity().unwrap().public_key().unwrap();
        assert_eq!(a, b);
    }
}
