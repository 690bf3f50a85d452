use buildmaster_common::errors::*;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::cmp;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::select;
use tokio::time;

const SIGKILL_DELAY: Duration = Duration::from_secs(10);

/// Build output, readable by the rpc server while the build is still running.
#[derive(Debug, Clone, Default)]
pub struct SharedLog(Arc<Mutex<Vec<u8>>>);

impl SharedLog {
    pub fn new() -> SharedLog {
        SharedLog::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // a panic while appending leaves the log usable
        self.0.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extend(&self, data: &[u8]) {
        self.lock().extend_from_slice(data);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn tail(&self, limit: usize) -> Vec<u8> {
        buildmaster_common::utils::tail(&self.lock(), limit).to_vec()
    }
}

pub struct Options {
    pub timeout: Duration,
    pub size_limit: Option<usize>,
    pub kill_at_size_limit: bool,
    pub current_dir: Option<PathBuf>,
    pub envs: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Running,
    Terminating { since: Instant },
    Killed,
}

/// Enforces the timeout and output limit of one backend process group.
struct Supervisor {
    pid: Option<u32>,
    log: SharedLog,
    deadline: Instant,
    timeout: Duration,
    size_limit: Option<usize>,
    kill_at_size_limit: bool,
    truncated: bool,
    shutdown: Shutdown,
}

impl Supervisor {
    fn new(pid: Option<u32>, log: SharedLog, opts: &Options) -> Supervisor {
        Supervisor {
            pid,
            log,
            deadline: Instant::now() + opts.timeout,
            timeout: opts.timeout,
            size_limit: opts.size_limit,
            kill_at_size_limit: opts.kill_at_size_limit,
            truncated: false,
            shutdown: Shutdown::Running,
        }
    }

    fn signal_group(&self, sig: Signal) -> Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        // a negative pid addresses the whole process group
        let pgid = Pid::from_raw(-(pid as i32));
        info!("Sending {} to process group {}", sig, pid);
        match signal::kill(pgid, sig) {
            Err(Errno::ESRCH) => debug!("Process group {} is already gone", pid),
            res => res?,
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        if self.shutdown == Shutdown::Running {
            self.signal_group(Signal::SIGTERM)?;
            self.shutdown = Shutdown::Terminating { since: Instant::now() };
        }
        Ok(())
    }

    fn truncate(&mut self, reason: &str) {
        self.log.extend(format!("\n\n{}\n\n", reason).as_bytes());
        self.truncated = true;
    }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        if self.truncated {
            return Ok(());
        }

        let data = match self.size_limit {
            Some(limit) => {
                let room = limit.saturating_sub(self.log.len());
                if room == 0 {
                    warn!("Build output exceeds the limit of {} bytes", limit);
                    self.truncate(&format!("TRUNCATED DUE TO SIZE LIMIT: {} bytes", limit));
                    if self.kill_at_size_limit {
                        self.terminate()?;
                    }
                    return Ok(());
                }
                &data[..cmp::min(room, data.len())]
            }
            None => data,
        };
        self.log.extend(data);
        Ok(())
    }

    /// Escalate timeouts, returns how long to wait for output before checking again.
    fn check(&mut self) -> Result<Duration> {
        let now = Instant::now();

        if let Shutdown::Terminating { since } = self.shutdown {
            if now.duration_since(since) > SIGKILL_DELAY {
                warn!("Backend didn't terminate {:?} after SIGTERM, killing it", SIGKILL_DELAY);
                self.signal_group(Signal::SIGKILL)?;
                self.shutdown = Shutdown::Killed;
            }
        }

        if let Some(remaining) = self.deadline.checked_duration_since(now) {
            return Ok(remaining);
        }
        if self.shutdown == Shutdown::Running {
            warn!("Backend timed out after {:?}", self.timeout);
            self.truncate(&format!("TRUNCATED DUE TO TIMEOUT: {} seconds", self.timeout.as_secs()));
            self.terminate()?;
        }
        Ok(SIGKILL_DELAY)
    }

    fn is_killed(&self) -> bool {
        self.shutdown == Shutdown::Killed
    }
}

/// Run `bin` in its own process group, returns the exit code.
///
/// `None` means the process was terminated by a signal.
pub async fn run<I, S>(bin: &Path, args: I, opts: Options, log: SharedLog) -> Result<Option<i32>>
where
    I: IntoIterator<Item = S> + fmt::Debug,
    S: AsRef<OsStr>,
{
    info!("Running {:?} {:?}", bin, args);
    let mut cmd = Command::new(bin);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(&opts.envs);
    if let Some(dir) = &opts.current_dir {
        cmd.current_dir(dir);
    }

    unsafe {
        cmd.pre_exec(|| {
            let pid = nix::unistd::getpid();
            if let Err(err) = nix::unistd::setpgid(pid, Pid::from_raw(0)) {
                warn!("Failed to create new process group: {:#?}", err);
            }
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .with_context(|| anyhow!("Failed to spawn {:?}", bin))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("Child has no stdout"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("Child has no stderr"))?;

    let mut supervisor = Supervisor::new(child.id(), log.clone(), &opts);
    let mut buf_stdout = [0u8; 4096];
    let mut buf_stderr = [0u8; 4096];
    let mut stdout_open = true;
    let mut stderr_open = true;

    let code = loop {
        let wakeup = supervisor.check()?;
        if supervisor.is_killed() {
            // grand-children may still hold the pipes
            stdout_open = false;
            stderr_open = false;
        }

        if stdout_open || stderr_open {
            select! {
                n = stdout.read(&mut buf_stdout), if stdout_open => match n? {
                    0 => stdout_open = false,
                    n => supervisor.append(&buf_stdout[..n])?,
                },
                n = stderr.read(&mut buf_stderr), if stderr_open => match n? {
                    0 => stderr_open = false,
                    n => supervisor.append(&buf_stderr[..n])?,
                },
                _ = time::sleep(wakeup) => (),
            }
        } else {
            select! {
                status = child.wait() => {
                    let status = status?;
                    info!("{:?} exited with {}, captured {} bytes", bin, status, log.len());
                    break status.code();
                }
                _ = time::sleep(wakeup) => (),
            }
        }
    };

    Ok(code)
}
