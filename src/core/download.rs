//! Download manager: backend invocation, integrity checks and the retry policy

use crate::config::{DownloadHost, DownloadSettings, Environment};
use crate::core::process::{CommandSpec, ProcessLauncher};
use crate::core::serial::DirectoryProbe;
use crate::core::verify::{self, IntegrityCheck};
use crate::io::{SessionLog, Template};
use crate::types::{
    Backend, DownloadAttempt, DownloadSession, FailureReason, SessionState, StackError,
    StackResult, VerifyOutcome,
};
use std::path::{Path, PathBuf};

/// Entry script of a download backend
pub fn backend_program(backend: Backend) -> String {
    format!("download_{}_rsmas.py", backend)
}

/// Base name of the `.o`/`.e` files of one download, next to the SLC directory
pub fn output_base(directory: &Path, backend: Backend, attempt_seq: u32) -> PathBuf {
    let parent = directory.parent().unwrap_or(directory);
    parent.join(format!("out_download_{}{}", backend, attempt_seq))
}

pub struct DownloadManager<'a> {
    launcher: &'a dyn ProcessLauncher,
    check: &'a dyn IntegrityCheck,
    probe: &'a dyn DirectoryProbe,
    env: &'a Environment,
    settings: &'a DownloadSettings,
    log: &'a SessionLog,
}

impl<'a> DownloadManager<'a> {
    pub fn new(
        launcher: &'a dyn ProcessLauncher,
        check: &'a dyn IntegrityCheck,
        probe: &'a dyn DirectoryProbe,
        env: &'a Environment,
        settings: &'a DownloadSettings,
        log: &'a SessionLog,
    ) -> Self {
        Self {
            launcher,
            check,
            probe,
            env,
            settings,
            log,
        }
    }

    /// Run one backend download into `directory`
    ///
    /// Unknown backends are logged and skipped. A local run that exits non-zero
    /// is an error; the exit status of a remote run is only logged.
    pub fn download(
        &self,
        backend: &str,
        template: &Path,
        directory: &Path,
        attempt_seq: u32,
    ) -> StackResult<Option<DownloadAttempt>> {
        let backend = match Backend::parse(backend) {
            Ok(backend) => backend,
            Err(e) => {
                self.log.warn(&e.to_string());
                return Ok(None);
            }
        };

        let program = backend_program(backend);
        let command = CommandSpec::new(program.as_str())
            .arg(template.to_string_lossy())
            .current_dir(directory)
            .log_to(output_base(directory, backend, attempt_seq));

        let exit_code = match &self.env.download_host {
            DownloadHost::Local => {
                self.log.info(&format!("Command: {}", command.to_shell()));
                let code = self.launcher.run(&command)?;
                if code != 0 {
                    return Err(StackError::DownloadProcess {
                        backend,
                        code: Some(code),
                    });
                }
                code
            }
            DownloadHost::Remote(host) => {
                let remote = command.on_remote_host(host, self.env.download_prelude.as_deref());
                self.log.info(&format!("Command on {}: {}", host, command.to_shell()));
                let code = self.launcher.run(&remote)?;
                self.log
                    .info(&format!("Exit status from {}: {}", program, code));
                code
            }
        };

        Ok(Some(DownloadAttempt {
            backend,
            attempt_number: attempt_seq,
            exit_code: Some(exit_code),
            directory_size_bytes: self.directory_size(directory),
            hung: false,
        }))
    }

    /// Check the archives in `directory`, deleting the bad ones
    pub fn verify(&self, directory: &Path) -> VerifyOutcome {
        match verify::verify(self.check, directory) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.log
                    .warn(&format!("Integrity check of {} failed: {}", directory.display(), e));
                VerifyOutcome::Failed(FailureReason::Incomplete)
            }
        }
    }

    /// Download, then re-download while the integrity check finds bad files
    ///
    /// Failures never propagate: the session just ends `Exhausted`.
    pub fn run_session(&self, template: &Path, directory: &Path) -> DownloadSession {
        let mut attempts = Vec::new();

        self.attempt(self.settings.backend_for_round(1), template, directory, 1, &mut attempts);

        let mut outcome = None;
        let mut downloaded_since_check = true;
        for &outnum in &self.settings.retry_rounds {
            let checked = self.verify(directory);
            outcome = Some(checked);
            downloaded_since_check = false;
            if checked.is_verified() {
                break;
            }

            self.log
                .warn("check_download: there were bad files, download again");
            let backend = self.settings.backend_for_round(outnum);
            self.attempt(backend, template, directory, outnum, &mut attempts);
            downloaded_since_check = true;
        }

        // The last re-download has not been checked yet; report on it without retrying
        if downloaded_since_check {
            outcome = Some(self.verify(directory));
        }

        let state = match outcome {
            Some(VerifyOutcome::Verified) => SessionState::Verified,
            _ => SessionState::Exhausted,
        };
        match state {
            SessionState::Verified => self.log.info(&format!(
                "Download into {} verified after {} attempts",
                directory.display(),
                attempts.len()
            )),
            SessionState::Exhausted => self.log.warn(&format!(
                "Download into {} still has bad files after {} attempts",
                directory.display(),
                attempts.len()
            )),
        }

        DownloadSession {
            directory: directory.to_path_buf(),
            attempts,
            state,
        }
    }

    /// Query and download in one ssara call; used for non-Sentinel projects
    pub fn download_direct(&self, template: &Template, directory: &Path) -> StackResult<i32> {
        let command = CommandSpec::new("ssara_federated_query.py")
            .args(template.ssara_options()?)
            .arg("--print")
            .arg("--download")
            .current_dir(directory);
        self.log.info(&format!("Command: {}", command.to_shell()));

        let code = self.launcher.run(&command)?;
        self.log
            .info(&format!("ssara_federated_query.py completion status: {}", code));
        Ok(code)
    }

    fn attempt(
        &self,
        backend: Backend,
        template: &Path,
        directory: &Path,
        outnum: u32,
        attempts: &mut Vec<DownloadAttempt>,
    ) {
        match self.download(backend.as_str(), template, directory, outnum) {
            Ok(Some(attempt)) => attempts.push(attempt),
            Ok(None) => {}
            Err(e) => {
                self.log.warn(&e.to_string());
                attempts.push(DownloadAttempt {
                    backend,
                    attempt_number: outnum,
                    exit_code: match e {
                        StackError::DownloadProcess { code, .. } => code,
                        _ => None,
                    },
                    directory_size_bytes: self.directory_size(directory),
                    hung: false,
                });
            }
        }
    }

    fn directory_size(&self, directory: &Path) -> u64 {
        self.probe.size_bytes(directory).unwrap_or_else(|e| {
            log::debug!("Cannot size {}: {}", directory.display(), e);
            0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_base_is_next_to_slc_dir() {
        assert_eq!(
            output_base(Path::new("/scratch/KokoSenAT128/SLC"), Backend::Ssara, 2),
            PathBuf::from("/scratch/KokoSenAT128/out_download_ssara2")
        );
    }

    #[test]
    fn test_backend_program_names() {
        assert_eq!(backend_program(Backend::Ssara), "download_ssara_rsmas.py");
        assert_eq!(backend_program(Backend::AsfSerial), "download_asfserial_rsmas.py");
    }
}
