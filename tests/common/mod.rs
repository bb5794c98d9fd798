//! Scripted stand-ins for external processes, directory probes and sleeping

#![allow(dead_code)]

use sarstack::core::process::{CapturedOutput, CommandSpec, MonitoredProcess, Pause, ProcessLauncher};
use sarstack::core::serial::DirectoryProbe;
use sarstack::core::verify::IntegrityCheck;
use sarstack::StackResult;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Behaviour of one spawned process
#[derive(Debug, Clone, Copy)]
pub struct ScriptedRun {
    /// Polls answered with "still running" before the exit code is reported
    pub running_polls: usize,
    /// `None` never exits on its own
    pub exit: Option<i32>,
}

impl ScriptedRun {
    pub fn exits(code: i32) -> Self {
        Self { running_polls: 0, exit: Some(code) }
    }

    pub fn exits_after(running_polls: usize, code: i32) -> Self {
        Self { running_polls, exit: Some(code) }
    }

    pub fn hangs() -> Self {
        Self { running_polls: usize::MAX, exit: None }
    }
}

/// Launcher that replays `ScriptedRun`s and records what happened
///
/// Once the script is used up every further spawn exits with 0.
#[derive(Default)]
pub struct FakeLauncher {
    runs: RefCell<VecDeque<ScriptedRun>>,
    pub spawned: RefCell<Vec<CommandSpec>>,
    pub events: Rc<RefCell<Vec<String>>>,
    pub capture_stdout: String,
}

impl FakeLauncher {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            ..Self::default()
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.borrow().len()
    }

    pub fn programs(&self) -> Vec<String> {
        self.spawned.borrow().iter().map(|c| c.program.clone()).collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn spawn(&self, command: &CommandSpec) -> StackResult<Box<dyn MonitoredProcess>> {
        self.spawned.borrow_mut().push(command.clone());
        self.events.borrow_mut().push("spawn".to_string());
        let run = self
            .runs
            .borrow_mut()
            .pop_front()
            .unwrap_or(ScriptedRun::exits(0));

        Ok(Box::new(FakeProcess {
            remaining: run.running_polls,
            exit: run.exit,
            events: Rc::clone(&self.events),
        }))
    }

    fn capture(&self, command: &CommandSpec) -> StackResult<CapturedOutput> {
        self.spawned.borrow_mut().push(command.clone());
        self.events.borrow_mut().push("capture".to_string());
        Ok(CapturedOutput {
            code: 0,
            stdout: self.capture_stdout.clone(),
            stderr: String::new(),
        })
    }
}

struct FakeProcess {
    remaining: usize,
    exit: Option<i32>,
    events: Rc<RefCell<Vec<String>>>,
}

impl MonitoredProcess for FakeProcess {
    fn poll(&mut self) -> StackResult<Option<i32>> {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(None);
        }
        Ok(self.exit)
    }

    fn wait(&mut self) -> StackResult<i32> {
        Ok(self.exit.unwrap_or(-9))
    }

    fn terminate(&mut self) -> StackResult<()> {
        self.events.borrow_mut().push("terminate".to_string());
        self.exit = Some(-9);
        self.remaining = 0;
        Ok(())
    }
}

/// Directory sizes handed out in order; the last one repeats
pub struct FakeProbe {
    sizes: RefCell<VecDeque<u64>>,
    last: RefCell<u64>,
}

impl FakeProbe {
    pub fn new(sizes: Vec<u64>) -> Self {
        Self {
            sizes: RefCell::new(sizes.into()),
            last: RefCell::new(0),
        }
    }

    /// Grows on every sample, so no stall is ever seen
    pub fn growing() -> Self {
        Self::new((1..=1000).map(|i| i * 1024).collect())
    }

    /// Never changes, so the second sample is a stall
    pub fn constant(size: u64) -> Self {
        Self::new(vec![size])
    }
}

impl DirectoryProbe for FakeProbe {
    fn size_bytes(&self, _directory: &Path) -> StackResult<u64> {
        if let Some(size) = self.sizes.borrow_mut().pop_front() {
            *self.last.borrow_mut() = size;
        }
        Ok(*self.last.borrow())
    }
}

/// Counts pauses instead of sleeping
#[derive(Default)]
pub struct NoPause {
    pub pauses: RefCell<Vec<Duration>>,
}

impl Pause for NoPause {
    fn pause(&self, duration: Duration) {
        self.pauses.borrow_mut().push(duration);
    }
}

/// Integrity check replaying canned reports; "all fine" once they run out
#[derive(Default)]
pub struct FakeCheck {
    reports: RefCell<VecDeque<String>>,
    pub calls: RefCell<usize>,
}

impl FakeCheck {
    pub fn new(reports: &[&str]) -> Self {
        Self {
            reports: RefCell::new(reports.iter().map(|r| r.to_string()).collect()),
            calls: RefCell::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.borrow()
    }
}

impl IntegrityCheck for FakeCheck {
    fn run(&self, _directory: &Path) -> StackResult<String> {
        *self.calls.borrow_mut() += 1;
        Ok(self
            .reports
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| "0 zipfiles checked, all fine\n".to_string()))
    }
}
