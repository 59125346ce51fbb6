use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::language::{CommandSpec, Language};
use crate::sandbox::resources::SandboxCaps;

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const READ_CHUNK: usize = 8 * 1024;

static NETWORK_ISOLATION: Lazy<bool> = Lazy::new(probe_network_isolation);

/// Combined stdout and stderr of one sandboxed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub execution_id: String,
    pub language: Language,
    pub output: Vec<u8>,
    /// Exit code of the last step that ran. Signal deaths are reported as `128 + signal`.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub duration_ms: u64,
    /// Every step ran in a private network namespace.
    pub network_isolated: bool,
}

impl CapturedOutput {
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Runs untrusted source code in a capped child process.
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Whether `language` can run under the default config: its toolchain is on PATH and a
    /// private network namespace can be entered.
    pub fn is_available(language: Language) -> bool {
        find_in_path(language.toolchain()).is_some() && Self::network_isolation_available()
    }

    /// Whether this host lets a child enter a private network namespace. Checked once.
    pub fn network_isolation_available() -> bool {
        *NETWORK_ISOLATION
    }

    pub fn execute(
        &self,
        source: &str,
        language: &str,
        caps: &SandboxCaps,
    ) -> CoreResult<CapturedOutput> {
        let language: Language = language.parse()?;
        if source.trim().is_empty() {
            return Err(CoreError::InvalidArgument("source is empty".to_string()));
        }
        caps.validate().map_err(CoreError::InvalidArgument)?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();

        // Removed on drop, so every early return below cleans up too.
        let scratch = tempfile::Builder::new()
            .prefix("neuro-exec-")
            .tempdir_in(self.config.scratch_root())?;
        let src = scratch.path().join(language.source_file_name(source));
        std::fs::write(&src, source)?;

        let plan = language.command_plan(source, &src, scratch.path());
        let mut sink = OutputSink::new(caps.max_output_bytes, caps.max_output_lines);
        let mut last_status = None;
        let mut network_isolated = true;
        for step in &plan {
            let (status, isolated) = self.run_step(step, scratch.path(), caps, &mut sink)?;
            network_isolated &= isolated;
            let ok = status.success();
            last_status = Some(status);
            if !ok {
                break;
            }
        }

        if let Err(e) = scratch.close() {
            warn!(execution_id = %execution_id, "Failed to remove scratch dir: {}", e);
        }

        let success = last_status.map(|s| s.success()).unwrap_or(false);
        let exit_code = last_status.and_then(exit_code_of);
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            execution_id = %execution_id,
            language = %language,
            success,
            exit_code = ?exit_code,
            duration_ms,
            output_bytes = sink.len(),
            "Sandboxed execution finished"
        );

        Ok(CapturedOutput {
            execution_id,
            language,
            output: sink.into_inner(),
            exit_code,
            success,
            duration_ms,
            network_isolated,
        })
    }

    fn run_step(
        &self,
        step: &CommandSpec,
        workdir: &Path,
        caps: &SandboxCaps,
        sink: &mut OutputSink,
    ) -> CoreResult<(ExitStatus, bool)> {
        let program = step.program.to_string_lossy().into_owned();
        debug!(program = %program, args = ?step.args, "Spawning sandboxed step");

        let (mut reader, writer) = cloexec_pipe()?;
        let (mut isolation_reader, isolation_writer) = cloexec_pipe()?;
        let mut child = {
            let mut cmd =
                self.build_command(step, workdir, caps, writer, isolation_writer.as_raw_fd())?;
            cmd.spawn()
                .map_err(|e| CoreError::SpawnFailed(format!("{}: {}", program, e)))?
            // `cmd` drops here, closing the parent's copies of the write end.
        };
        // The child's copy closed on exec, so this read cannot block.
        drop(isolation_writer);
        let isolated = !isolation_failed(&mut isolation_reader);
        if !isolated {
            warn!(
                program = %program,
                "Sandboxed step runs without a private network namespace"
            );
        }

        let timeout = (self.config.timeout_ms > 0)
            .then(|| Duration::from_millis(self.config.timeout_ms));
        let watchdog = Watchdog::arm(child.id() as libc::pid_t, timeout);

        if let Err(e) = sink.read_from(&mut reader) {
            kill_process_group(&child);
            let _ = child.wait();
            watchdog.disarm();
            return Err(e);
        }
        let status = wait_child(&mut child);
        let fired = watchdog.disarm();
        let status = status?;

        if fired {
            return Err(CoreError::Timeout {
                waited_ms: self.config.timeout_ms,
            });
        }
        Ok((status, isolated))
    }

    fn build_command(
        &self,
        step: &CommandSpec,
        workdir: &Path,
        caps: &SandboxCaps,
        writer: OwnedFd,
        isolation_report: RawFd,
    ) -> CoreResult<Command> {
        let stderr = writer.try_clone()?;
        let path = std::env::var_os("PATH").unwrap_or_else(|| OsString::from(DEFAULT_PATH));

        let mut cmd = Command::new(&step.program);
        cmd.args(&step.args)
            .current_dir(workdir)
            .env_clear()
            .env("PATH", path)
            .env("HOME", workdir)
            .env("TMPDIR", workdir)
            .env("LANG", "C.UTF-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONUNBUFFERED", "1")
            .env("GOCACHE", workdir.join(".gocache"))
            .stdin(Stdio::null())
            .stdout(Stdio::from(writer))
            .stderr(Stdio::from(stderr));

        let limits = ChildLimits::new(caps, &self.config, isolation_report);
        unsafe {
            cmd.pre_exec(move || limits.apply());
        }
        Ok(cmd)
    }
}

/// Limits applied in the child between fork and exec.
#[derive(Debug, Clone, Copy)]
struct ChildLimits {
    memory_bytes: u64,
    disk_bytes: u64,
    open_files: u64,
    cpu_seconds: u64,
    tasks: Option<u64>,
    require_network_isolation: bool,
    /// Write end of a pipe that gets one byte when the network namespace could not be entered.
    isolation_report: RawFd,
}

impl ChildLimits {
    fn new(caps: &SandboxCaps, config: &SandboxConfig, isolation_report: RawFd) -> Self {
        Self {
            memory_bytes: caps.memory_bytes,
            disk_bytes: caps.disk_bytes,
            open_files: u64::from(caps.open_file_limit),
            cpu_seconds: caps.cpu_time().as_secs(),
            tasks: config.enforce_process_limit.then(|| caps.task_limit()),
            require_network_isolation: config.require_network_isolation,
            isolation_report,
        }
    }

    /// Runs in the forked child: only async-signal-safe calls.
    fn apply(&self) -> io::Result<()> {
        unsafe {
            // Own process group, so the whole tree can be killed at once.
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }

            let set = |resource, value: u64| -> io::Result<()> {
                let mut current = libc::rlimit {
                    rlim_cur: 0,
                    rlim_max: 0,
                };
                if libc::getrlimit(resource, &mut current) != 0 {
                    return Err(io::Error::last_os_error());
                }
                let value = (value as libc::rlim_t).min(current.rlim_max);
                let limit = libc::rlimit {
                    rlim_cur: value,
                    rlim_max: value,
                };
                if libc::setrlimit(resource, &limit) != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            };

            // RLIMIT_AS would also count the address space runtimes reserve up front.
            set(libc::RLIMIT_DATA, self.memory_bytes)?;
            set(libc::RLIMIT_FSIZE, self.disk_bytes)?;
            set(libc::RLIMIT_NOFILE, self.open_files)?;
            set(libc::RLIMIT_CPU, self.cpu_seconds)?;
            if let Some(tasks) = self.tasks {
                set(libc::RLIMIT_NPROC, tasks)?;
            }

            if let Err(e) = enter_network_namespace() {
                if self.require_network_isolation {
                    return Err(e);
                }
                let flag = [1u8];
                libc::write(self.isolation_report, flag.as_ptr().cast(), 1);
            }
        }
        Ok(())
    }
}

/// Moves the calling process into a fresh network namespace holding only a downed loopback.
/// Unprivileged callers need a user namespace alongside it.
fn enter_network_namespace() -> io::Result<()> {
    unsafe {
        if libc::unshare(libc::CLONE_NEWNET) == 0
            || libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) == 0
        {
            return Ok(());
        }
    }
    Err(io::Error::last_os_error())
}

fn probe_network_isolation() -> bool {
    let Some(program) = find_in_path("true") else {
        return false;
    };
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    unsafe {
        cmd.pre_exec(enter_network_namespace);
    }
    let available = cmd.status().map(|s| s.success()).unwrap_or(false);
    if !available {
        warn!("Network namespaces are unavailable; sandboxed code cannot be isolated");
    }
    available
}

/// True when the child reported a failed isolation attempt.
fn isolation_failed(reader: &mut File) -> bool {
    let mut flag = [0u8; 1];
    loop {
        match reader.read(&mut flag) {
            Ok(n) => return n > 0,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return true,
        }
    }
}

/// Growable capture buffer with a hard ceiling.
struct OutputSink {
    buf: Vec<u8>,
    max_bytes: usize,
    max_lines: usize,
    lines: usize,
}

impl OutputSink {
    fn new(max_bytes: usize, max_lines: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_bytes,
            max_lines,
            lines: 0,
        }
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    fn push(&mut self, bytes: &[u8]) -> CoreResult<()> {
        if self.buf.len() + bytes.len() > self.max_bytes {
            return Err(CoreError::OutputTooLarge(format!(
                "more than {} bytes",
                self.max_bytes
            )));
        }
        self.lines += bytes.iter().filter(|b| **b == b'\n').count();
        if self.max_lines > 0 && self.lines > self.max_lines {
            return Err(CoreError::OutputTooLarge(format!(
                "more than {} lines",
                self.max_lines
            )));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Reads until EOF or until the ceiling is crossed.
    fn read_from<R: Read>(&mut self, reader: &mut R) -> CoreResult<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => self.push(&chunk[..n])?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Kills the child's process group once the deadline passes, unless disarmed first.
struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<bool>>,
}

impl Watchdog {
    fn arm(pgid: libc::pid_t, timeout: Option<Duration>) -> Self {
        let Some(limit) = timeout else {
            return Self {
                cancel: None,
                handle: None,
            };
        };
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || match rx.recv_timeout(limit) {
            Err(RecvTimeoutError::Timeout) => {
                unsafe {
                    libc::kill(-pgid, libc::SIGKILL);
                }
                true
            }
            _ => false,
        });
        Self {
            cancel: Some(tx),
            handle: Some(handle),
        }
    }

    /// Stops the timer and reports whether it had already fired.
    fn disarm(mut self) -> bool {
        drop(self.cancel.take());
        self.handle
            .take()
            .map(|h| h.join().unwrap_or(false))
            .unwrap_or(false)
    }
}

fn cloexec_pipe() -> CoreResult<(File, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(CoreError::SpawnFailed(format!(
            "pipe: {}",
            io::Error::last_os_error()
        )));
    }
    // Both descriptors are fresh and owned by nothing else.
    let reader = unsafe { File::from_raw_fd(fds[0]) };
    let writer = unsafe { OwnedFd::from_raw_fd(fds[1]) };
    Ok((reader, writer))
}

fn kill_process_group(child: &Child) {
    unsafe {
        libc::kill(-(child.id() as libc::pid_t), libc::SIGKILL);
    }
}

fn wait_child(child: &mut Child) -> CoreResult<ExitStatus> {
    loop {
        match child.wait() {
            Ok(status) => return Ok(status),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn exit_code_of(status: ExitStatus) -> Option<i32> {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
}

fn find_in_path(executable: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(executable))
        .find(|candidate| candidate.is_file())
}
