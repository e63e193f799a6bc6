//! Property tests for the receive path.

use std::sync::Arc;

use proptest::prelude::*;

use crate::channel::{Disposition, DropReason, EchoHandler, ResponderChannel};
use crate::dispatch::DispatchStats;
use crate::handshake::ChannelState;
use crate::harness::shared_identity;
use crate::message::ProtocolMessage;
use crate::transport::LocalBus;

proptest! {
    #[test]
    fn prop_decode_never_panics(raw in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = ProtocolMessage::decode(&raw);
    }

    #[test]
    fn prop_random_bytes_leave_responder_idle(raw in prop::collection::vec(any::<u8>(), 0..128)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let bus = Arc::new(LocalBus::new());
        let (peer, _peer_rx) = bus.bind();
        let mut channel = ResponderChannel::new(
            shared_identity().unwrap(),
            bus.clone(),
            Arc::new(EchoHandler::default()),
            Arc::new(DispatchStats::new()),
        );

        let disposition = rt.block_on(channel.on_receive(&raw, Some(peer)));
        match ProtocolMessage::decode(&raw) {
            // A random frame can be a valid key request; that is the only
            // message allowed to move the state.
            Ok(ProtocolMessage::PublicKeyRequest) => {
                prop_assert_eq!(channel.state(), ChannelState::AwaitingEncryptedKey);
            }
            Ok(_) => {
                prop_assert!(disposition.is_dropped());
                prop_assert_eq!(channel.state(), ChannelState::Idle);
            }
            Err(_) => {
                prop_assert_eq!(disposition, Disposition::Dropped(DropReason::Malformed));
                prop_assert_eq!(channel.state(), ChannelState::Idle);
            }
        }
    }
}
