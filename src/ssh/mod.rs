//! Remote Execution over SSH
//!
//! - `session.rs`: session/connector traits and the libssh2 transport
//! - `pool.rs`: one reusable session per connection id
//! - `testing.rs`: network-free transport for tests

mod pool;
mod session;
// Scripted transport for unit and integration tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use pool::{PoolStats, SessionPool};
pub use session::{RemoteSession, SessionConnector, Ssh2Connector, Ssh2Session};
