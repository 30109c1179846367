//! Session Relay Library
//!
//! Core functionality for the session relay - a WebSocket coordination
//! server for real-time multi-party sessions (video calls and collaborative
//! whiteboards):
//!
//! - Session lifecycle: lazy creation on first join, teardown when drained
//! - Admission control: video participants wait for the host to admit them
//! - Host-only authorization for admission, meeting end, mode switches and
//!   whiteboard control transfer
//! - Broadcast and targeted relay of opaque signaling payloads
//! - Append-only whiteboard and chat logs, replayed verbatim to late
//!   joiners
//!
//! # Architecture
//!
//! The relay uses an actor model hierarchy:
//!
//! ```text
//! SessionRegistryActor (singleton per relay instance)
//! └── supervises N SessionActors
//!     └── SessionActor (one per active session)
//! ```
//!
//! Each WebSocket runs its own task ([`connection`]) that forwards frames
//! into the owning session's mailbox and writes outbound frames back to the
//! socket.
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`protocol`] - Wire frame types
//! - [`connection`] - Per-WebSocket task
//! - [`routes`] - HTTP/WebSocket routing
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types
//! - [`ids`] - Session and participant id generation
//! - [`observability`] - Health probes and relay counters

pub mod actors;
pub mod config;
pub mod connection;
pub mod errors;
pub mod ids;
pub mod observability;
pub mod protocol;
pub mod routes;
