//! I/O modules for templates, manifests and session logs

pub mod template;
pub mod manifest;
pub mod session_log;

pub use template::Template;
pub use manifest::{persist_manifest, read_manifest, MANIFEST_NAME};
pub use session_log::{log_invocation, SessionLog};
