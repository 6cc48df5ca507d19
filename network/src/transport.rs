//! Opaque byte-frame transport with source tags. The real substrate lives
//! outside the core; [`InProcNetwork`] provides a channel-backed
//! implementation for tests and single-process deployments.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A frame delivered to an endpoint, tagged with the sender's address.
pub type InboundFrame = (String, Vec<u8>);

#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("no route to {0}")]
    Unroutable(String),
    #[error("endpoint {0} is gone")]
    Closed(String),
    #[error("request timed out")]
    Timeout,
    #[error("undecodable frame: {0}")]
    Decode(#[from] std::io::Error),
}

/// One-way frame delivery; the implementation carries the sender identity.
pub trait Transport: Send + Sync {
    fn send(&self, to: &str, frame: Vec<u8>) -> Result<(), NetError>;
}

/// Channel-backed in-process network: every endpoint registers a name and
/// receives `(from, frame)` pairs.
#[derive(Default)]
pub struct InProcNetwork {
    endpoints: Mutex<HashMap<String, Sender<InboundFrame>>>,
}

impl InProcNetwork {
    pub fn new() -> Arc<InProcNetwork> {
        Arc::new(InProcNetwork::default())
    }

    /// Registers an endpoint and returns its inbound frame channel.
    pub fn bind(self: &Arc<InProcNetwork>, name: &str) -> Receiver<InboundFrame> {
        let (tx, rx) = unbounded();
        self.endpoints.lock().insert(name.to_string(), tx);
        rx
    }

    /// A transport handle sending frames tagged as `from`.
    pub fn transport(self: &Arc<InProcNetwork>, from: &str) -> Arc<dyn Transport> {
        Arc::new(InProcTransport { network: self.clone(), from: from.to_string() })
    }
}

struct InProcTransport {
    network: Arc<InProcNetwork>,
    from: String,
}

impl Transport for InProcTransport {
    fn send(&self, to: &str, frame: Vec<u8>) -> Result<(), NetError> {
        let sender = self
            .network
            .endpoints
            .lock()
            .get(to)
            .cloned()
            .ok_or_else(|| NetError::Unroutable(to.to_string()))?;
        sender
            .send((self.from.clone(), frame))
            .map_err(|_| NetError::Closed(to.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn frames_carry_the_sender_tag() {
        let network = InProcNetwork::new();
        let inbox = network.bind("server");
        let client = network.transport("client-1");
        client.send("server", b"hello".to_vec()).unwrap();
        let (from, frame) = inbox.recv().unwrap();
        assert_eq!(from, "client-1");
        assert_eq!(frame, b"hello");
    }

    #[test]
    fn unknown_destination_errors() {
        let network = InProcNetwork::new();
        let client = network.transport("client-1");
        assert_matches!(
            client.send("nowhere", vec![]),
            Err(NetError::Unroutable(_))
        );
    }
}
