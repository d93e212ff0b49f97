//! # Event Bus Module
//!
//! Publish/subscribe plumbing between the link layer and its collaborators.
//!
//! ## Overview
//!
//! - Publishers emit typed events without knowing subscribers
//! - Subscribers filter and receive events of interest
//! - Supports both sync handlers and async broadcast receivers
//! - Notifications get their own handler and stream helpers
//!
//! A bus is constructed once per session and passed by reference to
//! every component that needs it; there is no process-wide instance.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use laserdeck_core::event_bus::{EventBus, Notification};
//!
//! let bus = EventBus::new();
//! let toast = bus.on_notification(|n| println!("{}: {}", n.title, n.message));
//! bus.notify(Notification::danger("Command Timeout", "$H"));
//! bus.unsubscribe(toast);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
