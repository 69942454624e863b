//! # Core Remoting Components
//!
//! Framing, admission control, correlation, and the invocation engine.
//!
//! This module provides the machinery beneath the public server and client:
//! framing commands over byte streams, bounding concurrent calls in flight,
//! and matching inbound responses to their originating requests.
//!
//! ## Components
//! - **Codec**: Tokio codec framing commands over byte streams
//! - **Admission**: FIFO semaphore gates with release-once permits
//! - **Executor**: Slot-bounded task execution with synchronous rejection
//! - **Response Future**: Exactly-once completion of pending invocations
//! - **Remoting**: The correlation table, dispatch pipeline, and reaper
//!
//! ## Wire Format
//! ```text
//! [Magic(4)] [Length(4)] [Content(N)]
//! ```
//!
//! ## Security
//! - Maximum frame size: 16MB (prevents memory exhaustion)
//! - Magic bytes prevent accidental misinterpretation
//! - Length validation before allocation

pub mod admission;
pub mod codec;
pub mod executor;
pub mod remoting;
pub mod response_future;
