//! Process execution interface for the external download and processing tools

use crate::types::{StackError, StackResult};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

/// An external command with optional working directory and output files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Redirect stdout to `<base>.o` and stderr to `<base>.e`
    pub fn log_to<P: AsRef<Path>>(mut self, base: P) -> Self {
        let base = base.as_ref().to_string_lossy().into_owned();
        self.stdout = Some(PathBuf::from(format!("{}.o", base)));
        self.stderr = Some(PathBuf::from(format!("{}.e", base)));
        self
    }

    /// Shell rendering of the command including its redirections
    pub fn to_shell(&self) -> String {
        let mut words = vec![shell_quote(&self.program)];
        words.extend(self.args.iter().map(|arg| shell_quote(arg)));
        if let Some(stdout) = &self.stdout {
            words.push(format!("> {}", shell_quote(&stdout.to_string_lossy())));
        }
        if let Some(stderr) = &self.stderr {
            words.push(format!("2> {}", shell_quote(&stderr.to_string_lossy())));
        }
        words.join(" ")
    }

    /// Wrap this command into a single `ssh` invocation on `host`
    ///
    /// Working directory and redirections are applied on the remote side;
    /// `prelude` runs first, e.g. to load the download environment.
    pub fn on_remote_host(&self, host: &str, prelude: Option<&str>) -> CommandSpec {
        let mut script = Vec::new();
        if let Some(prelude) = prelude {
            script.push(prelude.to_string());
        }
        match &self.cwd {
            Some(cwd) => script.push(format!(
                "cd {} && {}",
                shell_quote(&cwd.to_string_lossy()),
                self.to_shell()
            )),
            None => script.push(self.to_shell()),
        }

        CommandSpec::new("ssh")
            .arg(host)
            .arg("bash")
            .arg("-lc")
            .arg(shell_quote(&script.join("; ")))
    }
}

/// Quote a word for a POSIX shell
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=,:@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Output of a command run to completion with captured streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A spawned process that can be polled and terminated
pub trait MonitoredProcess {
    /// Exit code once finished, `None` while running
    fn poll(&mut self) -> StackResult<Option<i32>>;

    /// Block until the process exits
    fn wait(&mut self) -> StackResult<i32>;

    /// Forcibly stop the process and reap it
    fn terminate(&mut self) -> StackResult<()>;
}

/// Starts external commands
pub trait ProcessLauncher {
    fn spawn(&self, command: &CommandSpec) -> StackResult<Box<dyn MonitoredProcess>>;

    /// Run to completion with captured stdout and stderr
    fn capture(&self, command: &CommandSpec) -> StackResult<CapturedOutput>;

    /// Run to completion and return the exit code
    fn run(&self, command: &CommandSpec) -> StackResult<i32> {
        self.spawn(command)?.wait()
    }
}

/// Blocking pause between polls
pub trait Pause {
    fn pause(&self, duration: Duration);
}

/// `std::thread::sleep` based pause
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Launches commands as child processes of this one
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl SystemLauncher {
    fn command(spec: &CommandSpec) -> StackResult<Command> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        if let Some(stdout) = &spec.stdout {
            command.stdout(Stdio::from(File::create(stdout)?));
        }
        if let Some(stderr) = &spec.stderr {
            command.stderr(Stdio::from(File::create(stderr)?));
        }
        Ok(command)
    }
}

impl ProcessLauncher for SystemLauncher {
    fn spawn(&self, spec: &CommandSpec) -> StackResult<Box<dyn MonitoredProcess>> {
        log::debug!("Spawning: {}", spec.to_shell());
        let child = Self::command(spec)?.spawn().map_err(|e| {
            StackError::Process(format!("Failed to start {}: {}", spec.program, e))
        })?;
        Ok(Box::new(ChildProcess { child }))
    }

    fn capture(&self, spec: &CommandSpec) -> StackResult<CapturedOutput> {
        log::debug!("Running: {}", spec.to_shell());
        let output = Self::command(spec)?
            .stdin(Stdio::null())
            .output()
            .map_err(|e| StackError::Process(format!("Failed to run {}: {}", spec.program, e)))?;

        Ok(CapturedOutput {
            code: exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

struct ChildProcess {
    child: Child,
}

impl MonitoredProcess for ChildProcess {
    fn poll(&mut self) -> StackResult<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    fn wait(&mut self) -> StackResult<i32> {
        Ok(exit_code(self.child.wait()?))
    }

    fn terminate(&mut self) -> StackResult<()> {
        if self.child.try_wait()?.is_none() {
            self.child.kill()?;
        }
        self.child.wait()?;
        Ok(())
    }
}

/// Exit code, or the negated signal number for signal deaths
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("download_ssara_rsmas.py"), "download_ssara_rsmas.py");
        assert_eq!(shell_quote("--platform=SENTINEL-1A,SENTINEL-1B"), "--platform=SENTINEL-1A,SENTINEL-1B");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_to_shell_includes_redirections() {
        let spec = CommandSpec::new("download_ssara_rsmas.py")
            .arg("/t/Koko.template")
            .log_to("/w/out_download_ssara1");
        assert_eq!(
            spec.to_shell(),
            "download_ssara_rsmas.py /t/Koko.template > /w/out_download_ssara1.o 2> /w/out_download_ssara1.e"
        );
    }

    #[test]
    fn test_remote_command_is_a_single_ssh_invocation() {
        let spec = CommandSpec::new("download_ssara_rsmas.py")
            .arg("/t/Koko.template")
            .current_dir("/w/SLC");
        let remote = spec.on_remote_host("dl.example.org", Some("s.bgood"));

        assert_eq!(remote.program, "ssh");
        assert_eq!(remote.args[0], "dl.example.org");
        assert_eq!(&remote.args[1..3], &["bash".to_string(), "-lc".to_string()]);
        assert_eq!(
            remote.args[3],
            "'s.bgood; cd /w/SLC && download_ssara_rsmas.py /t/Koko.template'"
        );
        assert!(remote.cwd.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_launcher_reports_exit_codes() {
        let launcher = SystemLauncher;
        let code = launcher
            .run(&CommandSpec::new("sh").args(["-c", "exit 3"]))
            .unwrap();
        assert_eq!(code, 3);

        let output = launcher
            .capture(&CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2"]))
            .unwrap();
        assert_eq!(output.code, 0);
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_launcher_terminates_running_process() {
        let launcher = SystemLauncher;
        let mut process = launcher
            .spawn(&CommandSpec::new("sleep").arg("30"))
            .unwrap();
        assert_eq!(process.poll().unwrap(), None);
        process.terminate().unwrap();
    }
}
