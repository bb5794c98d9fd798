use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// External download clients that can fill an SLC directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// `ssara_federated_query.py` driven download
    Ssara,
    /// `download_ASF_serial.py` driven download
    AsfSerial,
}

impl Backend {
    /// Parse a backend identifier as used on the command line and in log names
    pub fn parse(name: &str) -> StackResult<Self> {
        match name {
            "ssara" => Ok(Backend::Ssara),
            "asfserial" => Ok(Backend::AsfSerial),
            other => Err(StackError::BackendUnsupported(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Ssara => "ssara",
            Backend::AsfSerial => "asfserial",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One spawn of a download backend and what was observed about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadAttempt {
    pub backend: Backend,
    pub attempt_number: u32,
    /// `None` when the process was terminated before reporting a status
    pub exit_code: Option<i32>,
    pub directory_size_bytes: u64,
    pub hung: bool,
}

/// Terminal state of a download session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// The last integrity check found no corrupt or incomplete files
    Verified,
    /// The retry budget was spent with bad files still present
    Exhausted,
}

/// Attempts made for one target directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSession {
    pub directory: PathBuf,
    pub attempts: Vec<DownloadAttempt>,
    pub state: SessionState,
}

/// Why an integrity check rejected a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Archives that could not be read ("Broken zipfiles")
    Corrupt,
    /// Partially transferred files ("Files with ...")
    Incomplete,
    /// Both kinds were reported
    CorruptAndIncomplete,
}

/// Result of an integrity check over a download directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyOutcome {
    Verified,
    Failed(FailureReason),
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerifyOutcome::Verified)
    }
}

/// One stage script of a processing stack run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFile {
    pub name: String,
    pub stage_index: u32,
    pub script_path: PathBuf,
}

/// Ordered run files; the order is the dependency chain consumed by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPlan {
    pub run_files: Vec<RunFile>,
}

impl RunPlan {
    pub fn new(run_files: Vec<RunFile>) -> StackResult<Self> {
        let plan = Self { run_files };
        plan.check_order()?;
        Ok(plan)
    }

    pub fn len(&self) -> usize {
        self.run_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.run_files.is_empty()
    }

    /// Script paths in execution order
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.run_files.iter().map(|run_file| &run_file.script_path)
    }

    /// Stage indices must be strictly increasing, which also makes them unique
    fn check_order(&self) -> StackResult<()> {
        for pair in self.run_files.windows(2) {
            if pair[1].stage_index <= pair[0].stage_index {
                return Err(StackError::Plan(format!(
                    "stage {} ({}) does not follow stage {} ({})",
                    pair[1].stage_index, pair[1].name, pair[0].stage_index, pair[0].name
                )));
            }
        }
        Ok(())
    }
}

/// Processing workflows of the ISCE topsStack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Workflow {
    Slc,
    Correlation,
    Interferogram,
    Offset,
}

impl Workflow {
    pub fn parse(name: &str) -> StackResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "slc" => Ok(Workflow::Slc),
            "correlation" => Ok(Workflow::Correlation),
            "interferogram" => Ok(Workflow::Interferogram),
            "offset" => Ok(Workflow::Offset),
            other => Err(StackError::Template(format!("Unknown workflow: {}", other))),
        }
    }
}

impl std::fmt::Display for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Workflow::Slc => write!(f, "slc"),
            Workflow::Correlation => write!(f, "correlation"),
            Workflow::Interferogram => write!(f, "interferogram"),
            Workflow::Offset => write!(f, "offset"),
        }
    }
}

/// Error types for stack orchestration
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Glob pattern error: {0}")]
    Glob(#[from] globset::Error),

    #[error("DEM does not exist: no file matching DEM/*.wgs84 in {0}")]
    MissingDem(PathBuf),

    #[error("Template key missing: {0}")]
    MissingTemplateKey(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("{0} download not supported")]
    BackendUnsupported(String),

    #[error("ERROR downloading using: download_{backend}_rsmas.py (exit code {code:?})")]
    DownloadProcess { backend: Backend, code: Option<i32> },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Run plan error: {0}")]
    Plan(String),

    #[error("Job submission error: {0}")]
    Submit(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for stack operations
pub type StackResult<T> = Result<T, StackError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn run_file(name: &str, stage_index: u32) -> RunFile {
        RunFile {
            name: name.to_string(),
            stage_index,
            script_path: PathBuf::from(format!("/work/run_files/{}", name)),
        }
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("ssara").unwrap(), Backend::Ssara);
        assert_eq!(Backend::parse("asfserial").unwrap(), Backend::AsfSerial);
        assert!(matches!(
            Backend::parse("wget"),
            Err(StackError::BackendUnsupported(name)) if name == "wget"
        ));
    }

    #[test]
    fn test_plan_rejects_repeated_stage_index() {
        let result = RunPlan::new(vec![run_file("run_01_a", 1), run_file("run_01_b", 1)]);
        assert!(matches!(result, Err(StackError::Plan(_))));
    }

    #[test]
    fn test_plan_rejects_decreasing_stage_index() {
        let result = RunPlan::new(vec![run_file("run_02_b", 2), run_file("run_01_a", 1)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_workflow_parse_is_case_insensitive() {
        assert_eq!(Workflow::parse("Interferogram").unwrap(), Workflow::Interferogram);
        assert!(Workflow::parse("stripmap").is_err());
    }
}
