//! Actor model implementation.
//!
//! Two-level hierarchy:
//!
//! ```text
//! SessionRegistryActor (singleton)
//! └── supervises N SessionActors
//!     └── SessionActor (one per active session)
//!         └── owns all session state, fans frames out to connections
//! ```
//!
//! All state for a session lives inside its actor, so every operation on a
//! session is serialized through one mailbox and handlers never race each
//! other. Cross-session work runs fully in parallel.

pub mod messages;
pub mod registry;
pub mod session;

pub use messages::{JoinOutcome, JoinRequest, SessionLink, SessionMessage, SessionStatus};
pub use registry::SessionRegistryHandle;
