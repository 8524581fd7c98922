use std::{
    ffi::CString,
    fmt,
    ptr,
    fs::File,
    os::{fd::AsRawFd, unix::ffi::OsStrExt},
    path::PathBuf,
};

use anyhow::{anyhow, bail, Result};
use log::debug;
use nix::{
    sys::{
        signal::{kill, raise, Signal},
        wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus},
    },
    unistd::{fork, setgid, setuid, ForkResult, Pid, User},
};

/// Describes how to run the traced process.
#[derive(Debug, Default, Clone)]
pub(crate) struct LaunchConfig {
    /// Path to the target binary.
    pub(crate) exec: PathBuf,
    /// Arguments, not including the binary itself.
    pub(crate) args: Vec<String>,
    /// User the process runs as.
    pub(crate) user: Option<String>,
    /// Redirections of the standard streams.
    pub(crate) stdin: Option<PathBuf>,
    pub(crate) stdout: Option<PathBuf>,
    pub(crate) stderr: Option<PathBuf>,
}

/// How the traced process ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    Exited(i32),
    Signaled(Signal),
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessExit::Exited(code) => write!(f, "exited with status {code}"),
            ProcessExit::Signaled(sig) => write!(f, "killed by {sig}"),
        }
    }
}

/// A process started in a stopped state, see `TracedProcess::spawn_stopped`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TracedProcess {
    pid: Pid,
}

/// Exit code of the child when the target could not be executed.
const EXEC_FAILED: i32 = 127;

impl TracedProcess {
    /// Fork a child which stops itself right before executing the target.
    /// Returns once the child is stopped.
    pub(crate) fn spawn_stopped(config: &LaunchConfig) -> Result<TracedProcess> {
        if !config.exec.is_file() {
            bail!("{} is not a file", config.exec.display());
        }

        // Prepare everything before forking, the child should only do what is
        // strictly needed.
        let path = CString::new(config.exec.as_os_str().as_bytes())?;
        let mut argv = vec![path.clone()];
        for arg in config.args.iter() {
            argv.push(CString::new(arg.as_str())?);
        }
        // The parent is multi-threaded, the child must not allocate. The
        // pointers stay valid as `argv` outlives the fork.
        let mut argv_ptrs = argv.iter().map(|arg| arg.as_ptr()).collect::<Vec<_>>();
        argv_ptrs.push(ptr::null());

        let user = match &config.user {
            Some(name) => Some(
                User::from_name(name)?.ok_or_else(|| anyhow!("Unknown user {name}"))?,
            ),
            None => None,
        };

        let open = |path: &Option<PathBuf>, write: bool| -> Result<Option<File>> {
            path.as_ref()
                .map(|p| {
                    match write {
                        true => File::create(p),
                        false => File::open(p),
                    }
                    .map_err(|e| anyhow!("Could not open {}: {e}", p.display()))
                })
                .transpose()
        };
        let redirections = [
            (open(&config.stdin, false)?, libc::STDIN_FILENO),
            (open(&config.stdout, true)?, libc::STDOUT_FILENO),
            (open(&config.stderr, true)?, libc::STDERR_FILENO),
        ];

        match unsafe { fork() }? {
            ForkResult::Child => {
                for (file, target) in redirections.iter() {
                    if let Some(file) = file {
                        if unsafe { libc::dup2(file.as_raw_fd(), *target) } < 0 {
                            unsafe { libc::_exit(EXEC_FAILED) };
                        }
                    }
                }
                if let Some(user) = &user {
                    if setgid(user.gid).is_err() || setuid(user.uid).is_err() {
                        unsafe { libc::_exit(EXEC_FAILED) };
                    }
                }

                // Wait to be resumed, once probes are attached.
                if raise(Signal::SIGSTOP).is_ok() {
                    unsafe { libc::execv(path.as_ptr(), argv_ptrs.as_ptr()) };
                }
                unsafe { libc::_exit(EXEC_FAILED) };
            }
            ForkResult::Parent { child } => {
                match waitpid(child, Some(WaitPidFlag::WUNTRACED))? {
                    WaitStatus::Stopped(_, Signal::SIGSTOP) => (),
                    status => bail!("Traced process did not stop as expected ({status:?})"),
                }

                debug!("Traced process {child} started and stopped");
                Ok(TracedProcess { pid: child })
            }
        }
    }

    pub(crate) fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Resume a stopped process.
    pub(crate) fn resume(&self) -> Result<()> {
        kill(self.pid, Signal::SIGCONT)?;
        Ok(())
    }

    /// Kill the process. It still has to be reaped using `wait`.
    pub(crate) fn kill(&self) -> Result<()> {
        kill(self.pid, Signal::SIGKILL)?;
        Ok(())
    }

    /// Wait for the process to terminate, without reaping it: its pid stays
    /// reserved until `wait` is called.
    pub(crate) fn wait_exit(&self) -> Result<()> {
        waitid(
            Id::Pid(self.pid),
            WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT,
        )?;
        Ok(())
    }

    /// Wait for the process to terminate and reap it.
    pub(crate) fn wait(&self) -> Result<ProcessExit> {
        loop {
            match waitpid(self.pid, None)? {
                WaitStatus::Exited(_, code) => return Ok(ProcessExit::Exited(code)),
                WaitStatus::Signaled(_, sig, _) => return Ok(ProcessExit::Signaled(sig)),
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serial_test::serial;

    use super::*;

    fn config(exec: &str, args: &[&str]) -> LaunchConfig {
        LaunchConfig {
            exec: PathBuf::from(exec),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    #[serial(process)]
    fn run_to_completion() {
        let process = TracedProcess::spawn_stopped(&config("/bin/true", &[])).unwrap();
        assert!(process.pid() > 0);

        process.resume().unwrap();
        assert_eq!(process.wait().unwrap(), ProcessExit::Exited(0));

        let process = TracedProcess::spawn_stopped(&config("/bin/false", &[])).unwrap();
        process.resume().unwrap();
        assert_eq!(process.wait().unwrap(), ProcessExit::Exited(1));
    }

    #[test]
    #[serial(process)]
    fn arguments() {
        let process =
            TracedProcess::spawn_stopped(&config("/bin/sh", &["-c", "exit $#", "sh", "a", "b"]))
                .unwrap();
        process.resume().unwrap();
        assert_eq!(process.wait().unwrap(), ProcessExit::Exited(2));
    }

    #[test]
    #[serial(process)]
    fn exit_without_reaping() {
        let process = TracedProcess::spawn_stopped(&config("/bin/true", &[])).unwrap();
        process.resume().unwrap();

        process.wait_exit().unwrap();
        // Not reaped yet, signals still target the exited process.
        assert!(process.kill().is_ok());
        assert_eq!(process.wait().unwrap(), ProcessExit::Exited(0));
    }

    #[test]
    #[serial(process)]
    fn kill_stopped() {
        let process = TracedProcess::spawn_stopped(&config("/bin/sleep", &["10"])).unwrap();

        process.kill().unwrap();
        assert_eq!(
            process.wait().unwrap(),
            ProcessExit::Signaled(Signal::SIGKILL)
        );
    }

    #[test]
    #[serial(process)]
    fn redirect_stdout() {
        let out = tempfile::NamedTempFile::new().unwrap();
        let mut config = config("/bin/echo", &["hello", "world"]);
        config.stdout = Some(out.path().to_path_buf());

        let process = TracedProcess::spawn_stopped(&config).unwrap();
        process.resume().unwrap();
        assert_eq!(process.wait().unwrap(), ProcessExit::Exited(0));
        assert_eq!(fs::read_to_string(out.path()).unwrap(), "hello world\n");
    }

    #[test]
    fn invalid_configs() {
        assert!(TracedProcess::spawn_stopped(&config("/does/not/exist", &[])).is_err());

        let mut config = config("/bin/true", &[]);
        config.stdin = Some(PathBuf::from("/does/not/exist"));
        assert!(TracedProcess::spawn_stopped(&config).is_err());

        config.stdin = None;
        config.user = Some("no-such-user-hopefully".to_string());
        assert!(TracedProcess::spawn_stopped(&config).is_err());
    }

    #[test]
    fn exit_display() {
        assert_eq!(ProcessExit::Exited(3).to_string(), "exited with status 3");
        assert_eq!(
            ProcessExit::Signaled(Signal::SIGKILL).to_string(),
            "killed by SIGKILL"
        );
    }
}
