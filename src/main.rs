use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sarstack::app::{self, DownloadDeps, EntryPoint, Invocation};
use sarstack::core::{
    pause_seconds, CommandCheck, DiskUsage, IntegrityCheck, SystemLauncher, ThreadPause,
    ZipIntegrityCheck,
};
use sarstack::io::log_invocation;
use sarstack::{Backend, DownloadSettings, Environment, SessionLog, SessionState, Template};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sarstack", version, about = "Sentinel-1 InSAR stack download and run-file orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Dataset template file
    #[arg(value_name = "FILE")]
    template: PathBuf,

    /// Submit this command as a batch job instead of running it
    #[arg(long)]
    submit: bool,

    /// Pause before starting, HH:MM or seconds
    #[arg(long, default_value = "00:00")]
    wait: String,

    /// Work directory (default: $SCRATCHDIR/<project>)
    #[arg(long)]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download SLC archives and re-download while the integrity check fails
    Download {
        #[command(flatten)]
        common: CommonArgs,

        /// Backend of the first download (ssara, asfserial)
        #[arg(long, default_value = "ssara")]
        backend: String,

        /// Backend of the re-downloads (default: same as --backend)
        #[arg(long)]
        retry_backend: Option<String>,

        /// External checker run as `<PROGRAM> <dir> --delete` instead of the built-in zip test
        #[arg(long, value_name = "PROGRAM")]
        check_command: Option<String>,
    },
    /// Run the serial ASF backend with hang detection
    DownloadAsfserial {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Write run files and the run_files_list manifest
    CreateRunfiles {
        #[command(flatten)]
        common: CommonArgs,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let env = Environment::from_env().context("reading environment")?;

    let (entry, common) = match &cli.command {
        Command::Download { common, .. } => (EntryPoint::Download, common),
        Command::DownloadAsfserial { common } => (EntryPoint::DownloadAsfSerial, common),
        Command::CreateRunfiles { common } => (EntryPoint::CreateRunfiles, common),
    };

    let mut template = Template::read(&common.template)
        .with_context(|| format!("reading template {}", common.template.display()))?;
    let work_dir = app::resolve_work_dir(&template, common.dir.as_deref(), &env)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    log_invocation(&work_dir, &format!("{} {}", entry.job_name(), args.join(" ")))?;

    std::thread::sleep(Duration::from_secs(pause_seconds(&common.wait)?));

    let launcher = SystemLauncher;

    if common.submit {
        let program = std::env::current_exe().context("locating the sarstack executable")?;
        let program = program.to_string_lossy();
        let cwd = std::env::current_dir().context("reading the current directory")?;
        let mut paths = vec![common.template.as_path()];
        paths.extend(common.dir.as_deref());

        let invocation = Invocation {
            program: &program,
            args: &args,
            paths: &paths,
            cwd: &cwd,
        };
        let job_file = app::submit_self(entry, &invocation, &work_dir, &launcher, &env)?;
        log::info!("Job submitted: {}", job_file.display());
        return Ok(());
    }

    match cli.command {
        Command::Download {
            backend,
            retry_backend,
            check_command,
            ..
        } => {
            let settings = DownloadSettings {
                backend: Backend::parse(&backend)?,
                retry_backend: retry_backend.as_deref().map(Backend::parse).transpose()?,
                ..DownloadSettings::default()
            };
            let session_log = open_log(&env, "download_rsmas.log");
            let zip_check = ZipIntegrityCheck::new(true);
            let command_check = check_command
                .as_deref()
                .map(|program| CommandCheck::new(&launcher, program));
            let check: &dyn IntegrityCheck = match &command_check {
                Some(check) => check,
                None => &zip_check,
            };

            let deps = DownloadDeps {
                launcher: &launcher,
                probe: &DiskUsage,
                pause: &ThreadPause,
                log: &session_log,
            };
            if let Some(session) = app::run_download(&template, &work_dir, &env, &settings, &deps, check)? {
                if session.state == SessionState::Exhausted {
                    log::warn!("Download finished with bad files in {}", session.directory.display());
                }
            }
        }
        Command::DownloadAsfserial { .. } => {
            let settings = DownloadSettings {
                backend: Backend::AsfSerial,
                ..DownloadSettings::default()
            };
            let session_log = open_log(&env, "asfserial_rsmas.log");
            let deps = DownloadDeps {
                launcher: &launcher,
                probe: &DiskUsage,
                pause: &ThreadPause,
                log: &session_log,
            };
            app::run_asfserial(&template, &work_dir, &env, &settings, &deps)?;
        }
        Command::CreateRunfiles { .. } => {
            let plan = app::run_create_runfiles(&mut template, &work_dir, &env)?;
            log::info!("{} run files listed in {}", plan.len(), work_dir.display());
        }
    }

    Ok(())
}

fn open_log(env: &Environment, name: &str) -> SessionLog {
    match env.operations_log(name).map(SessionLog::open) {
        Some(Ok(log)) => log,
        Some(Err(e)) => {
            log::warn!("Session log {} unavailable: {}", name, e);
            SessionLog::disabled()
        }
        None => SessionLog::disabled(),
    }
}
