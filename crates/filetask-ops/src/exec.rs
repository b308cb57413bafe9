//! External command execution.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use filetask_core::{ExecCommand, TaskError};

use crate::control::{Signal, TaskShared};
use crate::executor::{Context, Halt, Step};

/// How often the child is polled for exit and control requests.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Displayed while the command runs; its progress cannot be measured.
const RUNNING_PERCENT: u8 = 50;

/// Run the task's command to completion, capturing its output in the task log.
pub(crate) fn run(ctx: &mut Context) -> Step {
    let Some(command) = ctx.spec().command.clone() else {
        return Ok(());
    };
    let cwd = command.cwd.clone().unwrap_or_default();
    ctx.begin_unit(&cwd, None)?;
    ctx.task.log(format!("$ {command}"));

    let mut child = match spawn(&command) {
        Ok(child) => child,
        Err(e) => {
            let error = TaskError::ExecFailed {
                command: command.to_string(),
                message: e.to_string(),
            };
            return ctx.record(error, &cwd);
        }
    };
    debug!(target: "filetask", task = %ctx.task.id, pid = child.id(), "command spawned");

    ctx.task.set_manual_percent(Some(RUNNING_PERCENT));
    let readers = [
        child.stdout.take().map(|out| capture(Arc::clone(&ctx.task), out)),
        child.stderr.take().map(|err| capture(Arc::clone(&ctx.task), err)),
    ];

    let status = supervise(&ctx.task, &mut child);
    ctx.task.set_manual_percent(None);

    // After a kill, descendants outside the group may still hold the pipes;
    // the readers are left to finish on their own.
    let status = match status {
        Ok(status) => {
            for reader in readers.into_iter().flatten() {
                let _ = reader.join();
            }
            status
        }
        Err(Halt::Aborted) => {
            ctx.task.log("command killed");
            return Err(Halt::Aborted);
        }
        Err(halt) => return Err(halt),
    };

    match status {
        Ok(status) if status.success() => {
            ctx.add_items(1);
            ctx.complete_root();
            Ok(())
        }
        Ok(status) => {
            let error = TaskError::ExecFailed {
                command: command.to_string(),
                message: format!("exited with {status}"),
            };
            ctx.add_items(1);
            ctx.complete_root();
            ctx.record(error, &cwd)
        }
        Err(e) => ctx.record(
            TaskError::ExecFailed {
                command: command.to_string(),
                message: e.to_string(),
            },
            &cwd,
        ),
    }
}

fn spawn(command: &ExecCommand) -> std::io::Result<Child> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &command.cwd {
        cmd.current_dir(cwd);
    }
    // Own process group, so job control reaches everything the command starts.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd.spawn()
}

/// Forward each output line into the task log.
fn capture<R: Read + Send + 'static>(task: Arc<TaskShared>, stream: R) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines().map_while(Result::ok) {
            task.log(line);
        }
    })
}

/// Wait for the child, stopping its process group while the task is held
/// and killing the group on abort.
fn supervise(
    task: &TaskShared,
    child: &mut Child,
) -> Step<std::io::Result<std::process::ExitStatus>> {
    let mut stopped = false;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Ok(status)),
            Ok(None) => {}
            Err(e) => return Ok(Err(e)),
        }

        match task.signal(POLL_INTERVAL) {
            Signal::Abort => {
                if stopped {
                    send_signal(child, JobControl::Resume);
                }
                send_signal(child, JobControl::Kill);
                let _ = child.kill();
                let _ = child.wait();
                return Err(Halt::Aborted);
            }
            Signal::Hold if !stopped => {
                send_signal(child, JobControl::Stop);
                stopped = true;
            }
            Signal::Run if stopped => {
                send_signal(child, JobControl::Resume);
                stopped = false;
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum JobControl {
    Stop,
    Resume,
    Kill,
}

#[cfg(unix)]
fn send_signal(child: &Child, control: JobControl) {
    let signal = match control {
        JobControl::Stop => libc::SIGSTOP,
        JobControl::Resume => libc::SIGCONT,
        JobControl::Kill => libc::SIGKILL,
    };
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: kill() has no memory-safety preconditions. The child leads its
    // own process group and has not been reaped, so -pid names that group.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        debug!(target: "filetask", pid, ?control, "job control signal failed");
    }
}

#[cfg(not(unix))]
fn send_signal(_child: &Child, control: JobControl) {
    debug!(target: "filetask", ?control, "job control is not available on this platform");
}
