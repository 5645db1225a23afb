//! # agency-events
//!
//! In-process publish/subscribe for orchestrator notifications.
//!
//! - Delivery is synchronous: [`EventBus::publish`] returns after every
//!   listener registered for the name has run.
//! - Listeners run in subscription order. A listener that returns an error
//!   or panics is logged and skipped; the publisher never sees the failure.
//! - No buffering, no replay, no ordering guarantee across event names.

#![deny(unsafe_code)]

pub mod bus;

pub use bus::{EventBus, Listener, Subscription};
