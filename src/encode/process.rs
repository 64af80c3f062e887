use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Lines of encoder stderr kept for error reports.
pub const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// How a child process ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub success: bool,
    pub code: Option<i32>,
    /// Tail of the process's diagnostic output.
    pub diagnostics: String,
}

/// A running encoder process: writable stdin, readable diagnostics, wait.
pub trait EncoderProcess: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Signals end of input. Idempotent.
    fn close_stdin(&mut self);

    fn wait(&mut self) -> io::Result<ProcessOutcome>;

    /// Best-effort termination; safe to call after the process exited.
    fn kill(&mut self);
}

/// Starts encoder processes. Swapped out in tests.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(
        &self,
        program: &str,
        args: &[String],
        stdin: bool,
    ) -> io::Result<Box<dyn EncoderProcess>>;
}

/// Spawns real OS processes with `std::process::Command`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemSpawner;

impl ProcessSpawner for SystemSpawner {
    fn spawn(
        &self,
        program: &str,
        args: &[String],
        stdin: bool,
    ) -> io::Result<Box<dyn EncoderProcess>> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES)));
        let drain = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&tail);
            std::thread::Builder::new()
                .name(format!("{program}-stderr"))
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        let mut tail = tail.lock().unwrap_or_else(|e| e.into_inner());
                        if tail.len() == DIAGNOSTIC_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                })
        });
        let drain = kill_on_error(&mut child, drain.transpose())?;

        Ok(Box::new(SystemProcess {
            stdin: child.stdin.take(),
            child,
            drain,
            tail,
        }))
    }
}

/// Kills and reaps `child` when a later setup step failed, so no encoder
/// outlives the error.
fn kill_on_error<T>(child: &mut Child, result: io::Result<T>) -> io::Result<T> {
    if result.is_err() {
        log::warn!("killing encoder pid {} after a failed setup step", child.id());
        let _ = child.kill();
        let _ = child.wait();
    }
    result
}

struct SystemProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    drain: Option<JoinHandle<()>>,
    tail: Arc<Mutex<VecDeque<String>>>,
}

impl SystemProcess {
    fn diagnostics(&self) -> String {
        let tail = self.tail.lock().unwrap_or_else(|e| e.into_inner());
        tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

impl EncoderProcess for SystemProcess {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(bytes),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed")),
        }
    }

    fn close_stdin(&mut self) {
        drop(self.stdin.take());
    }

    fn wait(&mut self) -> io::Result<ProcessOutcome> {
        self.close_stdin();
        let status = self.child.wait()?;
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
        Ok(ProcessOutcome {
            success: status.success(),
            code: status.code(),
            diagnostics: self.diagnostics(),
        })
    }

    fn kill(&mut self) {
        self.close_stdin();
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
    }
}
