//! Re-submission of an entry point as a scheduled batch job

use crate::config::{Environment, Scheduler};
use crate::core::process::{shell_quote, CommandSpec, ProcessLauncher};
use crate::types::{StackError, StackResult};
use std::path::{Path, PathBuf};

pub const SUBMIT_FLAG: &str = "--submit";

/// Arguments to forward to the scheduled job: the originals without `--submit`
pub fn forwarded_arguments(args: &[String]) -> Vec<String> {
    args.iter()
        .filter(|arg| arg.as_str() != SUBMIT_FLAG)
        .cloned()
        .collect()
}

/// Rewrite relative path arguments as absolute paths below `cwd`
///
/// A scheduled job starts in the work directory, where paths relative to the
/// submitting shell no longer resolve. `paths` are the path values parsed
/// from the command line; `--flag value` and `--flag=value` forms are both
/// rewritten.
pub fn absolute_path_arguments(args: &[String], paths: &[&Path], cwd: &Path) -> Vec<String> {
    let absolute = |value: &str| -> Option<String> {
        let path = Path::new(value);
        (path.is_relative() && paths.iter().any(|known| *known == path))
            .then(|| cwd.join(path).to_string_lossy().into_owned())
    };

    args.iter()
        .map(|arg| {
            if let Some(path) = absolute(arg) {
                return path;
            }
            match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => match absolute(value) {
                    Some(path) => format!("{}={}", flag, path),
                    None => arg.clone(),
                },
                _ => arg.clone(),
            }
        })
        .collect()
}

/// Seconds to sleep before starting work: `HH:MM` or plain seconds
pub fn pause_seconds(wait: &str) -> StackResult<u64> {
    let wait = wait.trim();
    let invalid = || StackError::Config(format!("Invalid wait time: {}", wait));

    if let Some((hours, minutes)) = wait.split_once(':') {
        let hours: u64 = hours.parse().map_err(|_| invalid())?;
        let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
        return hours
            .checked_mul(3600)
            .zip(minutes.checked_mul(60))
            .and_then(|(h, m)| h.checked_add(m))
            .ok_or_else(invalid);
    }
    wait.parse().map_err(|_| invalid())
}

/// A job to hand to the batch scheduler
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_name: String,
    pub work_dir: PathBuf,
    /// `HH:MM`
    pub wall_time: String,
    pub command: Vec<String>,
}

pub struct JobSubmitter<'a> {
    launcher: &'a dyn ProcessLauncher,
    env: &'a Environment,
}

impl<'a> JobSubmitter<'a> {
    pub fn new(launcher: &'a dyn ProcessLauncher, env: &'a Environment) -> Self {
        Self { launcher, env }
    }

    pub fn job_file(request: &JobRequest) -> PathBuf {
        request.work_dir.join(format!("{}.job", request.job_name))
    }

    /// Job script text for the configured scheduler
    pub fn job_script(&self, request: &JobRequest) -> String {
        let base = request.work_dir.join(&request.job_name);
        let base = base.display();
        let mut script = String::from("#! /bin/bash\n");

        match self.env.scheduler {
            Scheduler::Slurm => {
                script.push_str(&format!("#SBATCH -J {}\n", request.job_name));
                script.push_str(&format!("#SBATCH -o {}_%j.o\n", base));
                script.push_str(&format!("#SBATCH -e {}_%j.e\n", base));
                script.push_str("#SBATCH -N 1\n");
                script.push_str(&format!("#SBATCH -t {}:00\n", request.wall_time));
                if let Some(queue) = &self.env.queue {
                    script.push_str(&format!("#SBATCH -p {}\n", queue));
                }
            }
            Scheduler::Lsf => {
                script.push_str(&format!("#BSUB -J {}\n", request.job_name));
                script.push_str(&format!("#BSUB -o {}_%J.o\n", base));
                script.push_str(&format!("#BSUB -e {}_%J.e\n", base));
                script.push_str("#BSUB -n 1\n");
                script.push_str(&format!("#BSUB -W {}\n", request.wall_time));
                if let Some(queue) = &self.env.queue {
                    script.push_str(&format!("#BSUB -q {}\n", queue));
                }
            }
        }

        script.push('\n');
        script.push_str(&format!("cd {}\n", shell_quote(&request.work_dir.to_string_lossy())));
        let command: Vec<String> = request.command.iter().map(|word| shell_quote(word)).collect();
        script.push_str(&command.join(" "));
        script.push('\n');
        script
    }

    /// Write the job file and submit it; returns the job file path
    pub fn submit(&self, request: &JobRequest) -> StackResult<PathBuf> {
        std::fs::create_dir_all(&request.work_dir)?;
        let job_file = Self::job_file(request);
        std::fs::write(&job_file, self.job_script(request))?;

        let command = submit_command(self.env.scheduler, &job_file, &request.work_dir);
        let output = self.launcher.capture(&command)?;
        if output.code != 0 {
            return Err(StackError::Submit(format!(
                "{} exited with {}: {}",
                command.program,
                output.code,
                output.stderr.trim()
            )));
        }

        log::info!("Submitted {}: {}", job_file.display(), output.stdout.trim());
        Ok(job_file)
    }
}

fn submit_command(scheduler: Scheduler, job_file: &Path, work_dir: &Path) -> CommandSpec {
    match scheduler {
        Scheduler::Slurm => CommandSpec::new("sbatch")
            .arg(job_file.to_string_lossy())
            .current_dir(work_dir),
        Scheduler::Lsf => CommandSpec::new("sh")
            .arg("-c")
            .arg(format!("bsub < {}", shell_quote(&job_file.to_string_lossy())))
            .current_dir(work_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::SystemLauncher;

    fn env(scheduler: &str, queue: Option<&str>) -> Environment {
        let scheduler = scheduler.to_string();
        let queue = queue.map(str::to_string);
        Environment::from_lookup(move |key| match key {
            "JOBSCHEDULER" => Some(scheduler.clone()),
            "QUEUENAME" => queue.clone(),
            _ => None,
        })
        .unwrap()
    }

    fn request() -> JobRequest {
        JobRequest {
            job_name: "download_rsmas".to_string(),
            work_dir: PathBuf::from("/scratch/KokoSenAT128"),
            wall_time: "02:00".to_string(),
            command: vec![
                "/opt/bin/sarstack".to_string(),
                "download".to_string(),
                "/t/KokoSenAT128.template".to_string(),
            ],
        }
    }

    #[test]
    fn test_forwarded_arguments_strip_submit() {
        let args: Vec<String> = ["download", "--submit", "Koko.template", "--wait", "00:05"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            forwarded_arguments(&args),
            vec!["download", "Koko.template", "--wait", "00:05"]
        );
    }

    #[test]
    fn test_relative_paths_become_absolute() {
        let args: Vec<String> = [
            "create-runfiles",
            "KokoSenAT128.template",
            "--dir=work/KokoSenAT128",
            "--wait",
            "00:05",
            "/abs/KokoSenAT128.template",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let paths = [
            Path::new("KokoSenAT128.template"),
            Path::new("work/KokoSenAT128"),
            Path::new("/abs/KokoSenAT128.template"),
        ];

        assert_eq!(
            absolute_path_arguments(&args, &paths, Path::new("/home/insar/projects")),
            vec![
                "create-runfiles",
                "/home/insar/projects/KokoSenAT128.template",
                "--dir=/home/insar/projects/work/KokoSenAT128",
                "--wait",
                "00:05",
                "/abs/KokoSenAT128.template",
            ]
        );
    }

    #[test]
    fn test_pause_seconds() {
        assert_eq!(pause_seconds("00:00").unwrap(), 0);
        assert_eq!(pause_seconds("01:30").unwrap(), 5400);
        assert_eq!(pause_seconds("45").unwrap(), 45);
        assert!(pause_seconds("soon").is_err());
    }

    #[test]
    fn test_pause_seconds_rejects_overflowing_wait() {
        assert!(matches!(
            pause_seconds("9999999999999999:00"),
            Err(StackError::Config(_))
        ));
        assert!(matches!(
            pause_seconds("00:999999999999999999"),
            Err(StackError::Config(_))
        ));
    }

    #[test]
    fn test_slurm_job_script() {
        let env = env("SLURM", Some("skx-normal"));
        let launcher = SystemLauncher;
        let script = JobSubmitter::new(&launcher, &env).job_script(&request());

        assert!(script.starts_with("#! /bin/bash\n#SBATCH -J download_rsmas\n"));
        assert!(script.contains("#SBATCH -t 02:00:00\n"));
        assert!(script.contains("#SBATCH -p skx-normal\n"));
        assert!(script.ends_with(
            "cd /scratch/KokoSenAT128\n/opt/bin/sarstack download /t/KokoSenAT128.template\n"
        ));
    }

    #[test]
    fn test_lsf_job_script() {
        let env = env("LSF", None);
        let launcher = SystemLauncher;
        let script = JobSubmitter::new(&launcher, &env).job_script(&request());

        assert!(script.contains("#BSUB -W 02:00\n"));
        assert!(!script.contains("#BSUB -q"));
    }
}
