//! Integrity checks of downloaded SLC archives

use crate::core::process::{CommandSpec, ProcessLauncher};
use crate::types::{FailureReason, StackResult, VerifyOutcome};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Marker the checker prints before corrupt archives
pub const BROKEN_MARKER: &str = "Broken zipfiles";
/// Marker the checker prints before partially transferred files
pub const INCOMPLETE_MARKER: &str = "Files with ";

/// Suffixes download clients leave on unfinished transfers
const PARTIAL_SUFFIXES: [&str; 2] = [".part", ".incomplete"];

/// Something that inspects a download directory and reports in text
pub trait IntegrityCheck {
    fn run(&self, directory: &Path) -> StackResult<String>;
}

/// Classify checker output; only the two markers mean failure
pub fn classify_check_output(output: &str) -> VerifyOutcome {
    let corrupt = output.contains(BROKEN_MARKER);
    let incomplete = output.contains(INCOMPLETE_MARKER);

    match (corrupt, incomplete) {
        (false, false) => VerifyOutcome::Verified,
        (true, false) => VerifyOutcome::Failed(FailureReason::Corrupt),
        (false, true) => VerifyOutcome::Failed(FailureReason::Incomplete),
        (true, true) => VerifyOutcome::Failed(FailureReason::CorruptAndIncomplete),
    }
}

/// Run `check` over `directory` and classify what it printed
pub fn verify(check: &dyn IntegrityCheck, directory: &Path) -> StackResult<VerifyOutcome> {
    let output = check.run(directory)?;
    let outcome = classify_check_output(&output);
    if !outcome.is_verified() {
        log::warn!("Bad downloads found in {}", directory.display());
    }
    Ok(outcome)
}

/// In-process archive check using the `zip` reader
///
/// Every `*.zip` is opened and each entry is read to the end so the CRC is
/// validated. Empty archives and leftover partial transfers count as incomplete.
#[derive(Debug, Clone, Copy)]
pub struct ZipIntegrityCheck {
    pub delete: bool,
}

impl ZipIntegrityCheck {
    pub fn new(delete: bool) -> Self {
        Self { delete }
    }

    fn test_archive(path: &Path) -> StackResult<()> {
        let mut archive = ZipArchive::new(File::open(path)?)?;
        let mut buffer = [0u8; 64 * 1024];
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            while entry.read(&mut buffer)? > 0 {}
        }
        Ok(())
    }

    fn remove(&self, files: &[PathBuf]) {
        if !self.delete {
            return;
        }
        for file in files {
            match std::fs::remove_file(file) {
                Ok(()) => log::info!("Deleted {}", file.display()),
                Err(e) => log::warn!("Could not delete {}: {}", file.display(), e),
            }
        }
    }
}

impl IntegrityCheck for ZipIntegrityCheck {
    fn run(&self, directory: &Path) -> StackResult<String> {
        let mut archives = Vec::new();
        let mut broken = Vec::new();
        let mut incomplete = Vec::new();

        for entry in std::fs::read_dir(directory)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path.to_string_lossy();

            if PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
                incomplete.push(path);
            } else if name.ends_with(".zip") {
                archives.push(path);
            }
        }
        archives.sort();

        for archive in &archives {
            if std::fs::metadata(archive)?.len() == 0 {
                incomplete.push(archive.clone());
                continue;
            }
            if let Err(e) = Self::test_archive(archive) {
                log::debug!("{}: {}", archive.display(), e);
                broken.push(archive.clone());
            }
        }
        incomplete.sort();

        let mut report = String::new();
        if !broken.is_empty() {
            report.push_str(&format!("{}:\n", BROKEN_MARKER));
            for file in &broken {
                report.push_str(&format!("{}\n", file.display()));
            }
        }
        if !incomplete.is_empty() {
            report.push_str(&format!("{}zero size or unfinished transfer:\n", INCOMPLETE_MARKER));
            for file in &incomplete {
                report.push_str(&format!("{}\n", file.display()));
            }
        }
        if broken.is_empty() && incomplete.is_empty() {
            report.push_str(&format!("{} zipfiles checked, all fine\n", archives.len()));
        }

        self.remove(&broken);
        self.remove(&incomplete);

        Ok(report)
    }
}

/// External checker: `check_download.py <directory> --delete`, stdout captured
pub struct CommandCheck<'a> {
    launcher: &'a dyn ProcessLauncher,
    program: String,
}

impl<'a> CommandCheck<'a> {
    pub fn new(launcher: &'a dyn ProcessLauncher, program: impl Into<String>) -> Self {
        Self {
            launcher,
            program: program.into(),
        }
    }
}

impl IntegrityCheck for CommandCheck<'_> {
    fn run(&self, directory: &Path) -> StackResult<String> {
        let command = CommandSpec::new(self.program.as_str())
            .arg(directory.to_string_lossy())
            .arg("--delete");
        let output = self.launcher.capture(&command)?;
        if output.code != 0 {
            log::warn!("{} exited with {}", self.program, output.code);
        }
        Ok(output.stdout)
    }
}
