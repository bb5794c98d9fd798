//! sarstack: download and run-file orchestration for Sentinel-1 InSAR stacks
//!
//! This library drives the external tools of an InSAR processing chain:
//! it downloads SLC archives with a retrying, hang-aware download manager,
//! checks their integrity, and writes the ordered run files of an ISCE
//! topsStack run for execution by a batch scheduler.

pub mod types;
pub mod config;
pub mod io;
pub mod core;
pub mod app;

// Re-export main types and functions for easier access
pub use types::{
    Backend, DownloadAttempt, DownloadSession, FailureReason, RunFile, RunPlan, SessionState,
    StackError, StackResult, VerifyOutcome, Workflow,
};

pub use config::{DownloadHost, DownloadSettings, Environment, Scheduler};
pub use io::{persist_manifest, read_manifest, SessionLog, Template};
pub use core::{DownloadManager, RunFileGenerator, SerialMonitor};
