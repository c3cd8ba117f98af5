//! Loxone AudioServer protocol bridge.
//!
//! Emulates a Loxone AudioServer appliance in front of third-party media
//! backends (Music Assistant, Sonos, Beolink, or a null placeholder): the
//! MiniServer believes it is talking to a genuine AudioServer, the bridge
//! translates its command URLs into backend RPCs and backend state changes
//! back into the event stream the MiniServer and its client apps expect.

// =============================================================================
// Lints - Enforce code quality and consistency
// =============================================================================

#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Note: clippy::pedantic, clippy::nursery, and clippy::cargo are NOT enabled
// because they have hundreds of existing violations. Enable incrementally.

pub mod alert;
pub mod backend;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fade;
pub mod group;
pub mod heartbeat;
pub mod provider;
pub mod transport;
pub mod zone;
