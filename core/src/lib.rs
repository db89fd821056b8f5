//! Session manager core: the in-memory registry of per-controller sessions,
//! the per-session state machine, concurrent health checking, the
//! per-controller polling scheduler, and restart recovery.
//!
//! ```text
//!                     ┌────────────────────┐
//!   API request ────► │  LifecycleEngine   │ ◄──── RestoreCoordinator
//!                     └─────────┬──────────┘        (on startup)
//!                               │ mutates record + pool atomically per id
//!                               ▼
//!                     ┌────────────────────┐       ┌──────────────┐
//!                     │    SessionPool     │ ◄───► │   Poller     │──► Publisher
//!                     │ id -> live client  │       │ (per-id task)│
//!                     └─────────┬──────────┘       └──────────────┘
//!                               ▼
//!                     ┌────────────────────┐
//!                     │     Connector      │──► NativeClient (opaque, blocking)
//!                     └────────────────────┘
//! ```
//!
//! Everything outside this crate — the HTTP surface, the durable record
//! store, the native controller-protocol library, and the message bus
//! producer — is a port this crate depends on as a trait
//! ([`persistence::Repository`], [`native::NativeClient`],
//! [`publisher::Publisher`]) rather than a concrete type. The daemon binary
//! supplies the implementations.

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod connector;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod native;
pub mod persistence;
pub mod poller;
pub mod pool;
pub mod publisher;
pub mod record;
pub mod restore;

pub use connector::Connector;
pub use error::{CoreError, CoreResult};
pub use lifecycle::{LifecycleEngine, RegisterRequest};
pub use manager::SessionManager;
pub use native::{ConnectParams, MachineState, NativeClient, NativeHandle, Snapshot};
pub use persistence::Repository;
pub use poller::Poller;
pub use pool::SessionPool;
pub use publisher::Publisher;
pub use record::{Mode, SessionRecord, Status, HARD_TIMEOUT_MS};
pub use restore::RestoreCoordinator;
