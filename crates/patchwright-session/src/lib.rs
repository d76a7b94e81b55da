//! Session/run lifecycle — ties the live agent to durable state
//!
//! `SessionController` owns the registries of live runners; each
//! `SessionRunner` drives one session end-to-end: sandbox allocation, the
//! orchestrator loop, event persistence, artifacts, and interruption.

pub mod artifacts;
pub mod bus;
pub mod controller;
pub mod memory;
pub mod runner;
pub mod store;
pub mod telemetry;

pub use artifacts::ArtifactFileStore;
pub use bus::{EventBus, Subscription};
pub use controller::{ControllerError, SessionController};
pub use memory::MemoryStore;
pub use runner::{RunOutcome, SessionRunner};
pub use store::{Store, StoreError};
pub use telemetry::init_tracing;
