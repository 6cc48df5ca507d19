//! Cluster-facing plumbing around the storage core: borsh wire frames, the
//! hash-range partitioner, the request/response transport abstraction, the
//! worker-side dispatch service and the client-side request handler.
//!
//! The transport substrate itself (sockets, RDMA, message brokers) is an
//! external collaborator; everything here works over opaque byte frames
//! with source tags.

pub mod messages;
pub mod partition;
pub mod service;
pub mod transport;

pub use messages::{MessageType, RequestPayload, ResponsePayload, UMessage, ValuePayload};
pub use partition::{RangeEntry, RangeRouter};
pub use service::{RequestHandler, WorkerService};
pub use transport::{InProcNetwork, NetError, Transport};
