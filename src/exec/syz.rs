//! Run progs with syz-executor style binaries.
//!
//! Each prog is executed by a fresh `<executor> [args..] exec <env> <flags> <pid>`
//! process, the textual prog is written to its stdin.
use super::{ExecConfig, ExecError, ExecInfo, ExecOpt, Execution, Executor};
use crate::{
    model::{Prog, Target},
    utils::io::{read_background, write_background, BackgroundReader},
};
use bytes::Bytes;
use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::{setsid, Pid},
};
use std::{
    os::unix::process::{CommandExt, ExitStatusExt},
    process::{Child, Command, Stdio},
    thread::sleep,
    time::{Duration, Instant},
};

pub struct SyzExecutor {
    config: ExecConfig,
    pid: u64,
}

impl SyzExecutor {
    pub fn new(config: ExecConfig, pid: u64) -> Result<Self, ExecError> {
        if !config.executor.is_file() {
            return Err(ExecError::Env(format!(
                "executor '{}' not found",
                config.executor.display()
            )));
        }
        Ok(Self { config, pid })
    }

    #[inline]
    pub fn pid(&self) -> u64 {
        self.pid
    }

    fn cmd(&self, opt: &ExecOpt) -> Command {
        let mut cmd = Command::new(&self.config.executor);
        cmd.args(&self.config.args)
            .arg("exec")
            .arg(format!("{:#x}", self.config.env))
            .arg(format!("{:#x}", opt.flags))
            .arg(self.pid.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // executor and everything it forks share one process group
        unsafe {
            cmd.pre_exec(|| {
                let _ = setsid();
                Ok(())
            });
        }
        cmd
    }

    /// Kill the whole process group of `child`.
    fn kill_group(&self, child: &Child) {
        match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
            Ok(()) | Err(nix::Error::Sys(Errno::ESRCH)) => (),
            Err(e) => log::debug!("failed to kill executor-{}: {}", self.pid, e),
        }
    }

    fn kill(&self, child: &mut Child) {
        self.kill_group(child);
        if let Err(e) = child.wait() {
            log::debug!("failed to wait executor-{}: {}", self.pid, e);
        }
    }
}

impl Executor for SyzExecutor {
    fn exec(&mut self, opt: &ExecOpt, target: &Target, p: &Prog) -> Result<Execution, ExecError> {
        let start = Instant::now();
        let deadline = start + self.config.timeout;
        let mut child = self.cmd(opt).spawn()?;
        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (read_background(stdout), read_background(stderr)),
            _ => {
                self.kill(&mut child);
                return Err(ExecError::Env("failed to capture executor output".to_string()));
            }
        };
        if let Some(stdin) = child.stdin.take() {
            // executor may exit without reading the prog
            write_background(stdin, p.display(target).to_string().into_bytes());
        }

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                self.kill(&mut child);
                return Ok(hanged(start, &stdout, &stderr));
            }
            sleep(Duration::from_millis(1));
        };

        // descendants may still hold the output pipes
        if !(stdout.wait_finish_until(deadline) && stderr.wait_finish_until(deadline)) {
            self.kill_group(&child);
            return Ok(hanged(start, &stdout, &stderr));
        }
        self.kill_group(&child);
        let elapsed = start.elapsed();

        let output = collect(stdout.current_data(), stderr.current_data());
        if status.success() {
            Ok(Execution {
                output,
                info: ExecInfo {
                    status: status.code(),
                    elapsed,
                },
                hanged: false,
            })
        } else if let Some(code) = status.code() {
            Err(ExecError::ExitStatus { code, output })
        } else {
            Err(ExecError::Signal {
                signal: status.signal().unwrap_or(0),
                output,
            })
        }
    }
}

/// Killed on timeout, take what was written so far.
fn hanged(start: Instant, stdout: &BackgroundReader, stderr: &BackgroundReader) -> Execution {
    Execution {
        output: collect(stdout.current_data(), stderr.current_data()),
        info: ExecInfo {
            status: None,
            elapsed: start.elapsed(),
        },
        hanged: true,
    }
}

fn collect(mut stdout: Vec<u8>, stderr: Vec<u8>) -> Bytes {
    stdout.extend(stderr);
    Bytes::from(stdout)
}
