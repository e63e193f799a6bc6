//! Channel runtimes: routing transport events to channel tasks.
//!
//! The responder keeps one task per peer reply address. Each task owns its
//! [`ResponderChannel`], so one peer's handshake steps never interleave
//! while different peers proceed in parallel. The initiator runs a single
//! task that owns its [`InitiatorChannel`] and serves both inbound frames
//! and commands from the application.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sipc_crypto::identity::AsymmetricIdentity;

use crate::channel::{
    Disposition, DropReason, InitiatorChannel, RequestHandler, ResponderChannel,
};
use crate::errors::{CoreError, HandshakeError};
use crate::handshake::ChannelState;
use crate::transport::{Address, EventReceiver, Inbound, MessageTransport, TransportEvent};

// ============================================================================
// Dispatch Statistics
// ============================================================================

/// Statistics for message dispatch operations.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Total frames received
    pub received: AtomicU64,
    /// Frames that produced a reply, an installed key or a surfaced response
    pub dispatched: AtomicU64,
    /// Frames dropped for any reason
    pub dropped: AtomicU64,
    /// Frames that failed to decode
    pub decode_failures: AtomicU64,
    /// Frames dropped by RSA or AEAD failures
    pub crypto_failures: AtomicU64,
    /// Frames that arrived in a state that does not accept them
    pub out_of_order: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            crypto_failures: self.crypto_failures.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.dispatched.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.decode_failures.store(0, Ordering::Relaxed);
        self.crypto_failures.store(0, Ordering::Relaxed);
        self.out_of_order.store(0, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for the outcome of one frame.
    pub(crate) fn record(&self, disposition: &Disposition) {
        let reason = match disposition {
            Disposition::Dropped(reason) => *reason,
            _ => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        self.record_drop(reason);
    }

    pub(crate) fn record_drop(&self, reason: DropReason) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        let counter = match reason {
            DropReason::Malformed => &self.decode_failures,
            DropReason::CryptoFailure => &self.crypto_failures,
            DropReason::UnexpectedInState | DropReason::NotEstablished => &self.out_of_order,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of dispatch statistics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub decode_failures: u64,
    pub crypto_failures: u64,
    pub out_of_order: u64,
}

// ============================================================================
// Responder
// ============================================================================

/// Responder runtime serving any number of initiators.
pub struct Responder {
    identity: AsymmetricIdentity,
    transport: Arc<dyn MessageTransport>,
    handler: Arc<dyn RequestHandler>,
    stats: Arc<DispatchStats>,
    local: Option<Address>,
}

impl Responder {
    pub fn new(
        identity: AsymmetricIdentity,
        transport: Arc<dyn MessageTransport>,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            identity,
            transport,
            handler,
            stats: Arc::new(DispatchStats::new()),
            local: None,
        }
    }

    /// Reply address stamped on outgoing frames.
    pub fn with_local_address(mut self, local: Address) -> Self {
        self.local = Some(local);
        self
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// Run the router in a background task.
    pub fn spawn(self, events: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    /// Route events until the transport's event stream ends.
    pub async fn run(self, mut events: EventReceiver) {
        let mut channels: HashMap<Address, mpsc::UnboundedSender<Inbound>> = HashMap::new();
        info!(alias = self.identity.alias(), "responder running");

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Message(inbound) => {
                    let Some(peer) = inbound.reply_to else {
                        warn!("dropping frame without reply address");
                        self.stats.record_received();
                        self.stats.record_drop(DropReason::NoReplyAddress);
                        continue;
                    };
                    let tx = channels
                        .entry(peer)
                        .or_insert_with(|| self.spawn_channel(peer));
                    if tx.send(inbound).is_err() {
                        warn!(%peer, "channel task gone");
                        channels.remove(&peer);
                    }
                }
                TransportEvent::PeerGone(peer) => {
                    if channels.remove(&peer).is_some() {
                        debug!(%peer, "peer gone, channel torn down");
                    }
                }
            }
        }

        info!(open_channels = channels.len(), "responder stopped");
    }

    fn spawn_channel(&self, peer: Address) -> mpsc::UnboundedSender<Inbound> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Inbound>();
        let mut channel = ResponderChannel::new(
            self.identity.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.handler),
            Arc::clone(&self.stats),
        );
        if let Some(local) = self.local {
            channel = channel.with_local_address(local);
        }
        debug!(%peer, "new channel");

        tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                let disposition = channel.on_receive(&inbound.frame, inbound.reply_to).await;
                if let Disposition::Dropped(reason) = disposition {
                    debug!(%peer, ?reason, "frame dropped");
                }
            }
            debug!(%peer, state = %channel.state(), "channel task finished");
        });
        tx
    }
}

// ============================================================================
// Initiator
// ============================================================================

enum Command {
    Connect {
        remote: Address,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Submit {
        text: String,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
}

/// Initiator runtime.
pub struct Initiator;

impl Initiator {
    /// Spawn the initiator task on `transport`, bound to `local`.
    pub fn spawn(
        transport: Arc<dyn MessageTransport>,
        local: Address,
        events: EventReceiver,
    ) -> InitiatorHandle {
        let stats = Arc::new(DispatchStats::new());
        let channel =
            InitiatorChannel::new(transport, Arc::clone(&stats)).with_local_address(local);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ChannelState::Idle);
        let (responses_tx, responses) = watch::channel(Vec::new());

        let task = tokio::spawn(run_initiator(
            channel,
            events,
            command_rx,
            state_tx,
            responses_tx,
        ));

        InitiatorHandle {
            commands,
            state,
            responses,
            stats,
            task,
        }
    }
}

async fn run_initiator(
    mut channel: InitiatorChannel,
    mut events: EventReceiver,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ChannelState>,
    responses: watch::Sender<Vec<String>>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TransportEvent::Message(inbound)) => {
                    match channel.on_receive(&inbound.frame, inbound.reply_to).await {
                        Disposition::Surfaced(text) => responses.send_modify(|log| log.push(text)),
                        Disposition::Dropped(reason) => debug!(?reason, "frame dropped"),
                        _ => {}
                    }
                }
                Some(TransportEvent::PeerGone(peer)) => {
                    if channel.remote() == Some(peer) {
                        channel.disconnect();
                    }
                }
                None => break,
            },
            command = commands.recv() => match command {
                Some(Command::Connect { remote, reply }) => {
                    let _ = reply.send(channel.connect(remote).await);
                }
                Some(Command::Submit { text, reply }) => {
                    let _ = reply.send(channel.submit(&text).await);
                }
                None => break,
            },
        }
        state.send_if_modified(|current| {
            let next = channel.state();
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
    channel.disconnect();
    state.send_replace(ChannelState::Closed);
    debug!("initiator task finished");
}

/// Application-facing handle to a running initiator.
pub struct InitiatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ChannelState>,
    responses: watch::Receiver<Vec<String>>,
    stats: Arc<DispatchStats>,
    task: JoinHandle<()>,
}

impl InitiatorHandle {
    /// Bind to `remote` and start the handshake.
    pub async fn connect(&self, remote: Address) -> Result<(), CoreError> {
        self.request(|reply| Command::Connect { remote, reply }).await
    }

    /// Encrypt and send one application message.
    pub async fn submit(&self, text: impl Into<String>) -> Result<(), CoreError> {
        let text = text.into();
        self.request(|reply| Command::Submit { text, reply }).await
    }

    async fn request<F>(&self, build: F) -> Result<(), CoreError>
    where
        F: FnOnce(oneshot::Sender<Result<(), CoreError>>) -> Command,
    {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| CoreError::Internal("initiator stopped".into()))?;
        rx.await
            .map_err(|_| CoreError::Internal("initiator stopped".into()))?
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Wait until the handshake has completed.
    ///
    /// Fails once the channel is closed, since it can no longer complete.
    pub async fn established(&self) -> Result<(), CoreError> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| matches!(s, ChannelState::Established | ChannelState::Closed))
            .await
            .map(|s| *s)
            .map_err(|_| CoreError::Internal("initiator stopped".into()))?;
        match reached {
            ChannelState::Established => Ok(()),
            _ => Err(HandshakeError::Closed.into()),
        }
    }

    /// Append-only log of decrypted responses, in arrival order.
    pub fn responses(&self) -> watch::Receiver<Vec<String>> {
        self.responses.clone()
    }

    /// Wait until at least `count` responses have arrived and return them all.
    pub async fn wait_for_responses(&self, count: usize) -> Result<Vec<String>, CoreError> {
        let mut responses = self.responses.clone();
        let log = responses
            .wait_for(|log| log.len() >= count)
            .await
            .map_err(|_| CoreError::Internal("initiator stopped".into()))?;
        Ok(log.clone())
    }

    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// Stop the initiator task and drop its session.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_classify_dispositions() {
        let stats = DispatchStats::new();
        for d in [
            Disposition::Installed,
            Disposition::Dropped(DropReason::Malformed),
            Disposition::Dropped(DropReason::CryptoFailure),
            Disposition::Dropped(DropReason::NotEstablished),
            Disposition::Dropped(DropReason::UnexpectedInState),
            Disposition::Dropped(DropReason::WrongRole),
        ] {
            stats.record_received();
            stats.record(&d);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.received, 6);
        assert_eq!(snap.dispatched, 1);
        assert_eq!(snap.dropped, 5);
        assert_eq!(snap.decode_failures, 1);
        assert_eq!(snap.crypto_failures, 1);
        assert_eq!(snap.out_of_order, 2);

        stats.reset();
        assert_eq!(stats.snapshot(), DispatchStatsSnapshot::default());
    }
}
