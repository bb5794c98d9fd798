//! Core orchestration modules

pub mod process;
pub mod verify;
pub mod serial;
pub mod asfserial;
pub mod download;
pub mod naming;
pub mod runfiles;
pub mod orbits;
pub mod submit;

// Re-export main types
pub use process::{CommandSpec, MonitoredProcess, Pause, ProcessLauncher, SystemLauncher, ThreadPause};
pub use verify::{classify_check_output, CommandCheck, IntegrityCheck, ZipIntegrityCheck};
pub use serial::{DirectoryProbe, DiskUsage, SerialMonitor, SerialOutcome};
pub use asfserial::AsfSerialDownload;
pub use download::DownloadManager;
pub use naming::StackOptions;
pub use runfiles::{find_dem, workflow_stages, RunFileGenerator};
pub use orbits::cache_precise_orbits;
pub use submit::{absolute_path_arguments, forwarded_arguments, pause_seconds, JobRequest, JobSubmitter};
