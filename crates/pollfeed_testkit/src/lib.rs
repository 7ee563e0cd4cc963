//! # pollfeed Testkit
//!
//! Test utilities for pollfeed.
//!
//! This crate provides:
//! - Recording subscribers and report sinks
//! - A scripted snapshot source for driving the engine poll by poll
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pollfeed_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_first_poll() {
//!     let source = ScriptedSource::new().then_ok(docs(&["0", "1"]));
//!     let recorder = RecordingSubscriber::new();
//!     // ... subscribe and advance time
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod generators;
pub mod recording;
pub mod scripted;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::generators::*;
    pub use crate::recording::*;
    pub use crate::scripted::*;
}

pub use generators::*;
pub use recording::*;
pub use scripted::*;
