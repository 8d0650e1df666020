//! Outbound delivery capabilities for the Herald notification service.
//!
//! The scheduling core treats every outbound path as an opaque capability:
//! - [`channels::PrimaryChannel`] — the in-app push API (always attempted)
//! - [`channels::SecondaryChannel`] — address-based external messaging
//! - [`fanout::RealtimeFanout`] — "emit to all" / "emit to one user" events
//!
//! HTTP and Redis implementations live here; tests inject fakes.

pub mod channels;
pub mod fanout;
pub mod format;
pub mod presence;
