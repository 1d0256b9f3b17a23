//! Git-side plumbing: remote URLs, scoped working directories, and the
//! mirror transports.

pub mod fake;
pub mod mirror;
pub mod process;
pub mod remote_url;
pub mod workspace;

pub use fake::InMemoryTransport;
pub use mirror::{mirror, GitBinaryTransport, MirrorTransport};
pub use remote_url::Remote;
pub use workspace::{ScopedDir, Workspace};
