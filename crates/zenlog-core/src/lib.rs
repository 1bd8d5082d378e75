//! zenlog-core: shared pieces of the zenlog session logger.
//!
//! Provides the logger/helper wire protocol and line codec, executable
//! signatures and the session context, the per-command log file store and
//! the streaming escape-sequence sanitizer.

pub mod codec;
pub mod error;
pub mod logfiles;
pub mod protocol;
pub mod sanitize;
pub mod session;
pub mod signature;

// Re-export commonly used items at crate root.
pub use error::{ZenlogError, ZenlogResult};
pub use logfiles::{CommandEntry, LogKind, LogPaths, LogStore, OpenCommand};
pub use protocol::{Message, Reply, StartRequest, WireMessage, PROTOCOL_VERSION, RECEIVE_TIMEOUT};
pub use sanitize::Sanitizer;
pub use session::SessionContext;
pub use signature::LocalIdentity;
