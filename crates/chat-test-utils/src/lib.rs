// chat-test-utils: in-memory fakes shared by chat-core and chat-server tests.
//
// Mirrors the pattern of a mock transport pair used for integration testing
// without a real network socket; here the collaborators under test are the
// `MessageStore`/`MembershipOracle` traits and the session's `FrameSource`/
// `FrameSink` transport seam rather than a WebSocket server.

pub mod fake_store;
pub mod fake_transport;

pub use fake_store::{FakeMembershipOracle, FakeMessageStore};
pub use fake_transport::{FakeSink, FakeSource, fake_transport_pair};
