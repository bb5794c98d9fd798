//! Environment and tunables shared by the entry points

use crate::types::{Backend, StackError, StackResult};
use std::path::PathBuf;
use std::time::Duration;

/// Where download backends are executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadHost {
    Local,
    Remote(String),
}

impl DownloadHost {
    fn from_value(value: Option<String>) -> Self {
        match value {
            Some(host) if !host.trim().is_empty() && host.trim() != "local" => {
                DownloadHost::Remote(host.trim().to_string())
            }
            _ => DownloadHost::Local,
        }
    }
}

/// Batch schedulers jobs can be submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduler {
    Slurm,
    Lsf,
}

impl Scheduler {
    pub fn parse(name: &str) -> StackResult<Self> {
        match name.trim().to_uppercase().as_str() {
            "SLURM" => Ok(Scheduler::Slurm),
            "LSF" => Ok(Scheduler::Lsf),
            other => Err(StackError::Config(format!("Unknown job scheduler: {}", other))),
        }
    }
}

/// Process environment the orchestration depends on
#[derive(Debug, Clone)]
pub struct Environment {
    /// Shared precise-orbit cache (`SENTINEL_ORBITS`)
    pub sentinel_orbits: Option<PathBuf>,
    /// Auxiliary calibration files (`SENTINEL_AUX`)
    pub sentinel_aux: Option<PathBuf>,
    /// `DOWNLOADHOST`
    pub download_host: DownloadHost,
    /// Command run on the download host before the backend, e.g. to load its environment
    pub download_prelude: Option<String>,
    /// Log root (`OPERATIONS`)
    pub operations: Option<PathBuf>,
    /// Root of per-project work directories (`SCRATCHDIR`)
    pub scratch_dir: Option<PathBuf>,
    pub scheduler: Scheduler,
    pub queue: Option<String>,
    pub asf_user: Option<String>,
    pub asf_pass: Option<String>,
}

impl Environment {
    /// Read the environment of the current process
    pub fn from_env() -> StackResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> StackResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        let scheduler = match lookup("JOBSCHEDULER") {
            Some(name) if !name.is_empty() => Scheduler::parse(&name)?,
            _ => Scheduler::Slurm,
        };

        Ok(Self {
            sentinel_orbits: path("SENTINEL_ORBITS"),
            sentinel_aux: path("SENTINEL_AUX"),
            download_host: DownloadHost::from_value(lookup("DOWNLOADHOST")),
            download_prelude: lookup("DOWNLOAD_PRELUDE").filter(|v| !v.is_empty()),
            operations: path("OPERATIONS"),
            scratch_dir: path("SCRATCHDIR"),
            scheduler,
            queue: lookup("QUEUENAME").filter(|v| !v.is_empty()),
            asf_user: lookup("ASF_USER"),
            asf_pass: lookup("ASF_PASS"),
        })
    }

    /// Work directory of a project: `$SCRATCHDIR/<project>`
    pub fn work_dir_for(&self, project_name: &str) -> StackResult<PathBuf> {
        self.scratch_dir
            .as_ref()
            .map(|root| root.join(project_name))
            .ok_or_else(|| {
                StackError::Config("SCRATCHDIR is not set and no --dir was given".to_string())
            })
    }

    /// `$OPERATIONS/LOGS/<name>`
    pub fn operations_log(&self, name: &str) -> Option<PathBuf> {
        self.operations
            .as_ref()
            .map(|root| root.join("LOGS").join(name))
    }

    /// Session log of the serial downloader
    pub fn asfserial_log_path(&self) -> Option<PathBuf> {
        self.operations_log("asfserial_rsmas.log")
    }
}

/// Retry and polling tunables of the download manager
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Backend used for the first download
    pub backend: Backend,
    /// Backend used for re-downloads after a failed check; `None` reuses `backend`
    pub retry_backend: Option<Backend>,
    /// Output sequence numbers of the re-downloads
    pub retry_rounds: Vec<u32>,
    /// Interval between directory-size samples of the serial backend
    pub poll_interval: Duration,
    /// Cap on spawns of the serial backend
    pub max_serial_attempts: u32,
    /// Exit codes meaning the process was killed
    pub kill_codes: Vec<i32>,
    /// Mode applied to downloaded archives
    pub archive_mode: u32,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Ssara,
            retry_backend: None,
            retry_rounds: vec![2, 3],
            poll_interval: Duration::from_secs(6 * 60),
            max_serial_attempts: 10,
            kill_codes: vec![137, -9],
            archive_mode: 0o666,
        }
    }
}

impl DownloadSettings {
    pub fn backend_for_round(&self, outnum: u32) -> Backend {
        if outnum <= 1 {
            self.backend
        } else {
            self.retry_backend.unwrap_or(self.backend)
        }
    }

    pub fn is_kill_code(&self, code: i32) -> bool {
        self.kill_codes.iter().any(|&kill| kill == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_download_host_local_and_remote() {
        let env = Environment::from_lookup(lookup(&[("DOWNLOADHOST", "local")])).unwrap();
        assert_eq!(env.download_host, DownloadHost::Local);

        let env = Environment::from_lookup(lookup(&[])).unwrap();
        assert_eq!(env.download_host, DownloadHost::Local);

        let env = Environment::from_lookup(lookup(&[("DOWNLOADHOST", "login3.hpc")])).unwrap();
        assert_eq!(env.download_host, DownloadHost::Remote("login3.hpc".to_string()));
    }

    #[test]
    fn test_work_dir_and_log_paths() {
        let env = Environment::from_lookup(lookup(&[
            ("SCRATCHDIR", "/scratch"),
            ("OPERATIONS", "/ops"),
        ]))
        .unwrap();
        assert_eq!(
            env.work_dir_for("KokoSenAT124").unwrap(),
            PathBuf::from("/scratch/KokoSenAT124")
        );
        assert_eq!(
            env.asfserial_log_path().unwrap(),
            PathBuf::from("/ops/LOGS/asfserial_rsmas.log")
        );
    }

    #[test]
    fn test_unknown_scheduler_is_rejected() {
        assert!(Environment::from_lookup(lookup(&[("JOBSCHEDULER", "PBS")])).is_err());
        let env = Environment::from_lookup(lookup(&[("JOBSCHEDULER", "lsf")])).unwrap();
        assert_eq!(env.scheduler, Scheduler::Lsf);
    }

    #[test]
    fn test_retry_backend_defaults_to_first_backend() {
        let mut settings = DownloadSettings::default();
        assert_eq!(settings.backend_for_round(3), Backend::Ssara);
        settings.retry_backend = Some(Backend::AsfSerial);
        assert_eq!(settings.backend_for_round(1), Backend::Ssara);
        assert_eq!(settings.backend_for_round(2), Backend::AsfSerial);
    }

    #[test]
    fn test_kill_codes_compare_by_value() {
        let settings = DownloadSettings::default();
        assert!(settings.is_kill_code(137));
        assert!(settings.is_kill_code(-9));
        assert!(!settings.is_kill_code(0));
        assert!(!settings.is_kill_code(9));
    }
}
