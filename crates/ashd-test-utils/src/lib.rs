//! ashd-test-utils: Test infrastructure for ashd.
//!
//! Provides:
//! - MockPeer / mock_session_channel: In-memory session channels for
//!   driving the server without a network
//! - MockSessionSource: Scripted session source for accept-loop tests
//! - MemorySinkFactory: In-memory audit/transcript sinks with failure
//!   injection

mod memory_sinks;
mod mock_channel;

pub use memory_sinks::MemorySinkFactory;
pub use mock_channel::{mock_session_channel, MockPeer, MockSessionSource};
