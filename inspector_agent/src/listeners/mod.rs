//! Lifecycle adapters that translate host-framework events into calls
//! against the tracer.
//!
//! Each adapter consumes a small closed event enum, resolved once at the
//! framework boundary, and receives the tracer as an explicit handle. The
//! protocol is the same everywhere: entering a monitored span opens a
//! segment, and leaving it ends that exact segment, on success or failure.

pub mod console;
pub mod kernel;
pub mod messenger;
pub mod templates;
