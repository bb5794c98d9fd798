use crate::types::StackResult;
use chrono::Local;
use log::Level;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the per-project command log in the work directory
pub const INVOCATION_LOG: &str = "log";

/// Append-only, timestamped log file of one download session
///
/// Every record is also forwarded to the `log` facade. A session log without a
/// file only forwards, which is what components get when `OPERATIONS` is unset.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    path: Option<PathBuf>,
}

impl SessionLog {
    /// Log to `path`, creating its parent directory
    pub fn open<P: AsRef<Path>>(path: P) -> StackResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path: Some(path) })
    }

    /// Forward to the `log` facade only
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, message: &str) {
        self.record(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.record(Level::Warn, message);
    }

    pub fn record(&self, level: Level, message: &str) {
        log::log!(level, "{}", message);

        if let Some(path) = &self.path {
            let line = format!(
                "{} * {} * {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level,
                message
            );
            if let Err(e) = append(path, &line) {
                log::warn!("Cannot write session log {}: {}", path.display(), e);
            }
        }
    }
}

/// Record an entry point's command line in `<work_dir>/log`
pub fn log_invocation<P: AsRef<Path>>(work_dir: P, message: &str) -> StackResult<()> {
    let work_dir = work_dir.as_ref();
    std::fs::create_dir_all(work_dir)?;
    let line = format!(
        "{} * {}\n",
        Local::now().format("%Y%m%d:%H-%M"),
        message
    );
    append(&work_dir.join(INVOCATION_LOG), &line)?;
    Ok(())
}

fn append(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
}
