//! GATHER client library: owns the single live connection to the server.
//!
//! The [`manager`] module drives connect / reconnect-with-backoff / teardown
//! as an explicit state machine; inbound push payloads are handed to the
//! [`cache`] router, which marks the affected query results stale so UI
//! consumers re-fetch over REST. Delivery is best-effort on both sides:
//! missed pushes are reconciled by refetching, never replayed.

pub mod backoff;
pub mod cache;
pub mod manager;
pub mod transport;

pub use cache::{CacheKey, CacheRouter, Notice, QueryCache, StaleTracker};
pub use manager::{spawn, ClientHandle, ConnectionState};
pub use transport::{Connector, Transport, TransportError, TransportEvent, WsConnector};
