//! Chat Controller Library
//!
//! Core functionality for the Duet Chat Controller - a stateful WebSocket
//! signaling server for a two-party chat/voice-video product:
//!
//! - Presence registry: which users are online and how to reach them
//! - Message log and unread counters over a shared key-value store
//! - Call session state machine (offer/answer/ICE, reject/end/missed/busy,
//!   disconnect cleanup) enforcing at most one active call per user
//! - Event dispatcher binding inbound events to the services above
//!
//! # Key Design Decisions
//!
//! - **One ordered log per user pair**: both directions share a canonical
//!   sorted-pair key, so both parties observe an identical transcript with
//!   call-lifecycle system messages interleaved in-line
//! - **Injectable store port**: Redis in production, an in-memory double in
//!   tests; every store operation is a single atomic round trip
//! - **Race-free busy guard**: the call-session map does guard-check plus
//!   pair-set inside one critical section
//! - **Typed offline signal**: relay returns `Delivered | RecipientOffline`
//!   instead of an implicit null-check
//!
//! # Modules
//!
//! - [`app`] - application state and router assembly
//! - [`calls`] - call session state machine
//! - [`config`] - service configuration from environment
//! - [`dispatcher`] - connection-scoped event routing
//! - [`events`] - realtime wire protocol
//! - [`messages`] - message log and unread service
//! - [`presence`] - presence registry and relay primitive
//! - [`routes`] - read-only HTTP views
//! - [`store`] - key-value store port

pub mod app;
pub mod calls;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod messages;
pub mod observability;
pub mod presence;
pub mod routes;
pub mod store;
