//! Tests for the correlation layer.
//!
//! Client tests talk to a scripted peer that records requests and answers by hand;
//! server tests go through a real [`RpcClient`].

use super::*;
use parking_lot::Mutex;
use std::sync::Arc;


/// The far end of a channel, recording every packet it receives.
pub(crate) struct ScriptedPeer {
    pub end: Arc<MemoryChannel>,
    pub received: Arc<Mutex<Vec<Packet>>>,
    _subscription: Subscription,
}

impl ScriptedPeer {
    pub fn reply(&self, packet: Packet) {
        self.end.send(packet).unwrap();
    }

    pub fn request_ids(&self) -> Vec<String> {
        self.received.lock().iter().map(|p| p.id.clone()).collect()
    }
}

/// A channel end for a client plus the scripted peer on the other side.
pub(crate) fn scripted_pair() -> (Arc<MemoryChannel>, ScriptedPeer) {
    let (client_end, peer_end) = MemoryChannel::pair();
    let peer_end = Arc::new(peer_end);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let subscription = peer_end.subscribe(Arc::new(move |p| sink.lock().push(p)));

    (
        Arc::new(client_end),
        ScriptedPeer {
            end: peer_end,
            received,
            _subscription: subscription,
        },
    )
}

/// Yield until `condition` holds; panics after a bounded number of rounds.
pub(crate) async fn settle(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held");
}
