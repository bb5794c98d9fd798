//! Hang-aware monitor for the serial download backend
//!
//! The serial client is known to stall without exiting. The monitor samples
//! the size of the download directory once per poll interval; two equal
//! consecutive samples mean no progress, so the process is terminated and a
//! new one is started. Kill-signal exit codes are retried the same way.
//! Attempts are bounded by `DownloadSettings::max_serial_attempts`.

use crate::config::DownloadSettings;
use crate::core::process::{CommandSpec, Pause, ProcessLauncher};
use crate::io::SessionLog;
use crate::types::{Backend, DownloadAttempt, StackResult};
use std::path::Path;
use walkdir::WalkDir;

/// Measures how much data a download directory holds
pub trait DirectoryProbe {
    fn size_bytes(&self, directory: &Path) -> StackResult<u64>;
}

/// Sum of regular file sizes below a directory
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskUsage;

impl DirectoryProbe for DiskUsage {
    fn size_bytes(&self, directory: &Path) -> StackResult<u64> {
        let mut total = 0;
        for entry in WalkDir::new(directory) {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if entry.file_type().is_file() {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(total)
    }
}

/// Attempts made by the monitor and the last completion code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialOutcome {
    pub attempts: Vec<DownloadAttempt>,
    pub exit_code: Option<i32>,
}

impl SerialOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub struct SerialMonitor<'a> {
    launcher: &'a dyn ProcessLauncher,
    probe: &'a dyn DirectoryProbe,
    pause: &'a dyn Pause,
    settings: &'a DownloadSettings,
    log: &'a SessionLog,
}

impl<'a> SerialMonitor<'a> {
    pub fn new(
        launcher: &'a dyn ProcessLauncher,
        probe: &'a dyn DirectoryProbe,
        pause: &'a dyn Pause,
        settings: &'a DownloadSettings,
        log: &'a SessionLog,
    ) -> Self {
        Self {
            launcher,
            probe,
            pause,
            settings,
            log,
        }
    }

    /// Run `command` until it completes cleanly or the attempt budget is spent
    pub fn run(&self, command: &CommandSpec, directory: &Path) -> StackResult<SerialOutcome> {
        let max_attempts = self.settings.max_serial_attempts;
        let mut attempts = Vec::new();
        let mut exit_code = None;

        for attempt_number in 1..=max_attempts {
            self.log.info(&format!("RUN NUMBER: {}", attempt_number));

            let run = self.monitor(command, directory, attempt_number)?;
            let attempt = run.attempt;
            exit_code = attempt.exit_code;
            let retry = run.unmeasured
                || attempt.hung
                || attempt
                    .exit_code
                    .is_some_and(|code| self.settings.is_kill_code(code));
            attempts.push(attempt);

            if !retry {
                break;
            }
            if attempt_number < max_attempts {
                self.log.warn("Something went wrong, running again");
            } else {
                self.log.warn(&format!(
                    "Giving up after {} attempts, last completion status {:?}",
                    max_attempts, exit_code
                ));
            }
        }

        Ok(SerialOutcome {
            attempts,
            exit_code,
        })
    }

    /// One spawn, polled until exit or until a stall is detected
    fn monitor(
        &self,
        command: &CommandSpec,
        directory: &Path,
        attempt_number: u32,
    ) -> StackResult<MonitoredRun> {
        let interval = self.settings.poll_interval;
        let mut process = self.launcher.spawn(command)?;
        let mut completion = process.poll()?;
        let mut previous_size: Option<u64> = None;
        let mut size = 0;
        let mut hung = false;
        let mut unmeasured = false;
        let mut polls: u32 = 0;

        while completion.is_none() {
            polls += 1;

            size = match self.probe.size_bytes(directory) {
                Ok(size) => size,
                Err(e) => {
                    self.log.warn(&format!(
                        "Cannot measure {}: {}, terminating",
                        directory.display(),
                        e
                    ));
                    process.terminate()?;
                    unmeasured = true;
                    break;
                }
            };

            if previous_size == Some(size) {
                hung = true;
                self.log.warn("Download hung, terminating");
                process.terminate()?;
                break;
            }

            self.pause.pause(interval);
            previous_size = Some(size);
            completion = process.poll()?;

            let minutes = interval.as_secs_f64() * f64::from(polls) / 60.0;
            self.log.info(&format!(
                "{:.0} minutes: {:.1}GB, completion_status {:?}",
                minutes,
                size as f64 / 1024.0 / 1024.0 / 1024.0,
                completion
            ));
        }

        self.log.info(&format!("EXIT CODE: {:?}", completion));

        Ok(MonitoredRun {
            attempt: DownloadAttempt {
                backend: Backend::AsfSerial,
                attempt_number,
                exit_code: completion,
                directory_size_bytes: size,
                hung,
            },
            unmeasured,
        })
    }
}

/// One monitored spawn; `unmeasured` when the directory could not be sampled
struct MonitoredRun {
    attempt: DownloadAttempt,
    unmeasured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_disk_usage_sums_nested_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.zip"), vec![0u8; 1000]).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("b.zip"), vec![0u8; 24]).unwrap();

        assert_eq!(DiskUsage.size_bytes(dir.path()).unwrap(), 1024);
    }
}
