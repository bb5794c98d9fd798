use crate::types::{RunPlan, StackError, StackResult};
use std::path::{Path, PathBuf};

/// File in the work directory listing run files in execution order
pub const MANIFEST_NAME: &str = "run_files_list";

/// Write the plan's run-file paths, one per line, replacing any previous manifest
pub fn persist_manifest<P: AsRef<Path>>(plan: &RunPlan, work_dir: P) -> StackResult<PathBuf> {
    let manifest_path = work_dir.as_ref().join(MANIFEST_NAME);

    let mut content = String::new();
    for path in plan.paths() {
        let line = path.to_str().ok_or_else(|| {
            StackError::Plan(format!("Run file path is not UTF-8: {}", path.display()))
        })?;
        if line.contains('\n') {
            return Err(StackError::Plan(format!("Run file path contains a newline: {:?}", line)));
        }
        content.push_str(line);
        content.push('\n');
    }

    std::fs::write(&manifest_path, content)?;
    log::info!(
        "Wrote {} run files to {}",
        plan.len(),
        manifest_path.display()
    );

    Ok(manifest_path)
}

/// Read the run-file paths back in manifest order
pub fn read_manifest<P: AsRef<Path>>(work_dir: P) -> StackResult<Vec<PathBuf>> {
    let content = std::fs::read_to_string(work_dir.as_ref().join(MANIFEST_NAME))?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(PathBuf::from)
        .collect())
}
