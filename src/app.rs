//! Entry-point orchestration shared by the `sarstack` subcommands

use crate::config::{DownloadSettings, Environment};
use crate::core::asfserial::AsfSerialDownload;
use crate::core::download::DownloadManager;
use crate::core::process::{Pause, ProcessLauncher};
use crate::core::runfiles::RunFileGenerator;
use crate::core::serial::{DirectoryProbe, SerialOutcome};
use crate::core::submit::{absolute_path_arguments, forwarded_arguments, JobRequest, JobSubmitter};
use crate::core::verify::IntegrityCheck;
use crate::io::{SessionLog, Template};
use crate::types::{DownloadSession, RunPlan, StackResult};
use std::path::{Path, PathBuf};

/// Entry points and their batch job settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Download,
    DownloadAsfSerial,
    CreateRunfiles,
}

impl EntryPoint {
    pub fn job_name(&self) -> &'static str {
        match self {
            EntryPoint::Download => "download_rsmas",
            EntryPoint::DownloadAsfSerial => "download_asfserial_rsmas",
            EntryPoint::CreateRunfiles => "create_runfiles",
        }
    }

    /// Scheduler wall time, `HH:MM`
    pub fn wall_time(&self) -> &'static str {
        match self {
            EntryPoint::DownloadAsfSerial => "24:00",
            EntryPoint::Download | EntryPoint::CreateRunfiles => "02:00",
        }
    }
}

/// Work directory: explicit `--dir`, else `$SCRATCHDIR/<project>`
///
/// A relative `--dir` is resolved against the current directory.
pub fn resolve_work_dir(template: &Template, dir: Option<&Path>, env: &Environment) -> StackResult<PathBuf> {
    match dir {
        Some(dir) if dir.is_relative() => Ok(std::env::current_dir()?.join(dir)),
        Some(dir) => Ok(dir.to_path_buf()),
        None => env.work_dir_for(template.project_name()),
    }
}

/// Download target: `topsStack.slcDir` when set, else `<work_dir>/SLC`
pub fn slc_dir(template: &Template, work_dir: &Path) -> PathBuf {
    template
        .get("topsStack.slcDir")
        .map(PathBuf::from)
        .unwrap_or_else(|| work_dir.join("SLC"))
}

/// Command-line arguments of an invocation to re-run as a batch job
pub struct Invocation<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    /// Path values among `args`, as parsed
    pub paths: &'a [&'a Path],
    /// Directory the invocation was made from
    pub cwd: &'a Path,
}

/// Schedule `program args...` (minus `--submit`) as a batch job
///
/// Relative paths in `args` are made absolute, since the job runs from `work_dir`.
pub fn submit_self(
    entry: EntryPoint,
    invocation: &Invocation<'_>,
    work_dir: &Path,
    launcher: &dyn ProcessLauncher,
    env: &Environment,
) -> StackResult<PathBuf> {
    let mut command = vec![invocation.program.to_string()];
    command.extend(absolute_path_arguments(
        &forwarded_arguments(invocation.args),
        invocation.paths,
        invocation.cwd,
    ));

    let request = JobRequest {
        job_name: entry.job_name().to_string(),
        work_dir: work_dir.to_path_buf(),
        wall_time: entry.wall_time().to_string(),
        command,
    };
    JobSubmitter::new(launcher, env).submit(&request)
}

/// Collaborators of the download entry points
pub struct DownloadDeps<'a> {
    pub launcher: &'a dyn ProcessLauncher,
    pub probe: &'a dyn DirectoryProbe,
    pub pause: &'a dyn Pause,
    pub log: &'a SessionLog,
}

/// `download`: fill the SLC directory, retrying until the archives check out
///
/// Projects that are not Sentinel-1 get a single ssara query-and-download and
/// no session (`None`). `check` decides whether a download needs repeating.
pub fn run_download(
    template: &Template,
    work_dir: &Path,
    env: &Environment,
    settings: &DownloadSettings,
    deps: &DownloadDeps<'_>,
    check: &dyn IntegrityCheck,
) -> StackResult<Option<DownloadSession>> {
    let slc_dir = slc_dir(template, work_dir);
    std::fs::create_dir_all(work_dir)?;
    std::fs::create_dir_all(&slc_dir)?;

    let manager = DownloadManager::new(deps.launcher, check, deps.probe, env, settings, deps.log);

    if !template.is_sentinel() {
        manager.download_direct(template, &slc_dir)?;
        return Ok(None);
    }

    let template_path = std::fs::canonicalize(template.path()).unwrap_or_else(|_| template.path().to_path_buf());
    Ok(Some(manager.run_session(&template_path, &slc_dir)))
}

/// `download-asfserial`: the serial backend with hang monitoring
pub fn run_asfserial(
    template: &Template,
    work_dir: &Path,
    env: &Environment,
    settings: &DownloadSettings,
    deps: &DownloadDeps<'_>,
) -> StackResult<SerialOutcome> {
    let slc_dir = slc_dir(template, work_dir);
    std::fs::create_dir_all(&slc_dir)?;

    AsfSerialDownload::new(deps.launcher, deps.probe, deps.pause, env, settings, deps.log)
        .run(template, &slc_dir)
}

/// `create-runfiles`: DEM check, run files, manifest and orbit caching
pub fn run_create_runfiles(template: &mut Template, work_dir: &Path, env: &Environment) -> StackResult<RunPlan> {
    RunFileGenerator::new(work_dir, env).generate(template)
}
