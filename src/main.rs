//! ftask - run file operations with progress, queueing and overwrite control.
//!
//! Usage:
//!   ftask copy SRC... DEST       Copy files and directories into DEST
//!   ftask move SRC... DEST       Move files and directories into DEST
//!   ftask link SRC... DEST       Create symbolic links in DEST
//!   ftask delete PATH...         Delete permanently
//!   ftask trash PATH...          Move to the system trash
//!   ftask chmod --mode 755 PATH  Change permissions or ownership
//!   ftask exec -- CMD ARGS...    Run an external command as a task

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tracing_subscriber::EnvFilter;

use filetask_core::{
    Conflict, EngineConfig, ErrorPolicy, ExecCommand, ModeEdit, OverwriteDecision,
    OverwritePolicy, PermissionChange, ProgressSnapshot, TaskEvent, TaskOutcome, TaskSpec,
    TaskState,
};
use filetask_ops::{TaskHandle, TaskRegistry};

/// How often the progress line is redrawn.
const REFRESH: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(
    name = "ftask",
    version,
    about = "Run file operations with progress and overwrite control",
    long_about = "ftask runs one file operation as a background task and reports its \
                  progress.\n\nSet RUST_LOG (e.g. `RUST_LOG=filetask=debug`) to see \
                  engine logs."
)]
struct Cli {
    #[command(flatten)]
    options: TaskOptions,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct TaskOptions {
    /// What to do when a destination already exists
    #[arg(short, long, global = true, default_value = "ask")]
    overwrite: OverwriteArg,

    /// How errors on individual items affect the task
    #[arg(short, long, global = true, default_value = "continue")]
    errors: ErrorsArg,

    /// Do not descend into directories
    #[arg(long, global = true)]
    no_recursive: bool,

    /// Follow symbolic links instead of copying them as links
    #[arg(short = 'L', long, global = true)]
    follow_symlinks: bool,

    /// Seconds to spend measuring the total size before starting
    #[arg(long, global = true, default_value = "5")]
    discovery_timeout: u64,

    /// Print the final progress snapshot as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Copy files and directories
    Copy {
        /// Files or directories to copy
        #[arg(required = true, num_args = 1..)]
        sources: Vec<PathBuf>,

        /// Directory to copy into
        destination: PathBuf,
    },

    /// Move files and directories
    Move {
        /// Files or directories to move
        #[arg(required = true, num_args = 1..)]
        sources: Vec<PathBuf>,

        /// Directory to move into
        destination: PathBuf,
    },

    /// Create symbolic links to the sources
    Link {
        /// Link targets
        #[arg(required = true, num_args = 1..)]
        sources: Vec<PathBuf>,

        /// Directory to create the links in
        destination: PathBuf,
    },

    /// Delete files and directories permanently
    Delete {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Move files and directories to the trash
    Trash {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Change permissions and ownership
    Chmod {
        /// Octal mode: "755" sets, "+044" adds, "-022" removes bits
        #[arg(short, long, allow_hyphen_values = true)]
        mode: Option<String>,

        /// New owner uid
        #[arg(long)]
        uid: Option<u32>,

        /// New group gid
        #[arg(long)]
        gid: Option<u32>,

        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Run an external command
    Exec {
        /// Working directory
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Program and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OverwriteArg {
    Ask,
    Overwrite,
    Skip,
    Rename,
}

impl From<OverwriteArg> for OverwritePolicy {
    fn from(arg: OverwriteArg) -> Self {
        match arg {
            OverwriteArg::Ask => OverwritePolicy::Ask,
            OverwriteArg::Overwrite => OverwritePolicy::Overwrite,
            OverwriteArg::Skip => OverwritePolicy::Skip,
            OverwriteArg::Rename => OverwritePolicy::AutoRename,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ErrorsArg {
    /// Record errors and keep going
    Continue,
    /// Stop at the first error
    First,
    /// Keep going, but fail the task if anything failed
    Any,
}

impl From<ErrorsArg> for ErrorPolicy {
    fn from(arg: ErrorsArg) -> Self {
        match arg {
            ErrorsArg::Continue => ErrorPolicy::ContinueOnError,
            ErrorsArg::First => ErrorPolicy::FirstErrorStops,
            ErrorsArg::Any => ErrorPolicy::AnyErrorStops,
        }
    }
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let options = &cli.options;

    let spec = build_spec(cli.command)?
        .with_overwrite(options.overwrite.into())
        .with_error_policy(options.errors.into())
        .with_recursive(!options.no_recursive);

    let config = EngineConfig::builder()
        .follow_symlinks(options.follow_symlinks)
        .size_discovery_timeout(Duration::from_secs(options.discovery_timeout))
        .build()
        .map_err(|e| eyre!("Invalid configuration: {e}"))?;

    let registry = TaskRegistry::new(config);
    let task = registry.new_task(spec).context("Invalid task")?;
    let snapshot = drive(&task, options.json)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_report(&snapshot);
    }

    Ok(match snapshot.outcome {
        Some(TaskOutcome::Completed) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn build_spec(command: Command) -> Result<TaskSpec> {
    let spec = match command {
        Command::Copy {
            sources,
            destination,
        } => TaskSpec::copy(absolute_all(&sources)?, absolute(&destination)?),
        Command::Move {
            sources,
            destination,
        } => TaskSpec::move_to(absolute_all(&sources)?, absolute(&destination)?),
        Command::Link {
            sources,
            destination,
        } => TaskSpec::link(absolute_all(&sources)?, absolute(&destination)?),
        Command::Delete { paths } => TaskSpec::delete(absolute_all(&paths)?),
        Command::Trash { paths } => TaskSpec::trash(absolute_all(&paths)?),
        Command::Chmod {
            mode,
            uid,
            gid,
            paths,
        } => {
            let change = PermissionChange {
                mode: mode.as_deref().map(parse_mode).transpose()?,
                uid,
                gid,
            };
            if change.is_empty() {
                bail!("Nothing to change: pass --mode, --uid or --gid");
            }
            TaskSpec::chmod(absolute_all(&paths)?, change)
        }
        Command::Exec { cwd, command } => {
            let mut parts = command.into_iter();
            let program = parts.next().ok_or_else(|| eyre!("Missing program"))?;
            let mut exec = parts.fold(ExecCommand::new(program), ExecCommand::arg);
            if let Some(cwd) = cwd {
                exec = exec.current_dir(absolute(&cwd)?);
            }
            TaskSpec::exec(exec)
        }
    };
    Ok(spec)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Invalid path: {}", path.display()))
}

fn absolute_all(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    paths.iter().map(|p| absolute(p)).collect()
}

/// Parse "755", "+044" or "-022" (octal).
fn parse_mode(s: &str) -> Result<ModeEdit> {
    let (digits, make): (&str, fn(u32) -> ModeEdit) = match s.as_bytes().first() {
        Some(b'+') => (&s[1..], ModeEdit::add),
        Some(b'-') => (&s[1..], ModeEdit::remove),
        _ => (s, ModeEdit::exact),
    };
    let bits = u32::from_str_radix(digits, 8).map_err(|_| eyre!("Invalid mode: {s}"))?;
    if bits > 0o7777 {
        bail!("Invalid mode: {s}");
    }
    Ok(make(bits))
}

/// Run the task to completion, drawing progress and answering overwrite
/// queries from the terminal.
fn drive(task: &TaskHandle, quiet: bool) -> Result<ProgressSnapshot> {
    let mut events = task.subscribe();
    let interactive = !quiet && io::stderr().is_terminal();
    task.run()?;

    loop {
        while let Ok(event) = events.try_recv() {
            if let TaskEvent::ErrorRecorded { record, .. } = event {
                if !quiet {
                    clear_line(interactive);
                    eprintln!("error: {record}");
                }
            }
        }

        let snapshot = task.snapshot();
        match snapshot.state {
            TaskState::Finished => break,
            TaskState::QueryOverwrite => {
                if let Some(conflict) = &snapshot.pending_conflict {
                    clear_line(interactive);
                    let decision = ask(conflict)?;
                    // The worker may have been aborted meanwhile
                    let _ = task.resolve_overwrite(decision);
                    continue;
                }
            }
            _ => {}
        }

        if interactive {
            eprint!("\r{}", progress_line(&snapshot));
            let _ = io::stderr().flush();
        }
        thread::sleep(REFRESH);
    }

    clear_line(interactive);
    Ok(task.wait())
}

fn ask(conflict: &Conflict) -> Result<OverwriteDecision> {
    eprintln!(
        "{}: {} ({} -> {})",
        conflict.kind,
        conflict.destination.display(),
        format_size(conflict.source_size),
        format_size(conflict.destination_size),
    );

    let stdin = io::stdin();
    loop {
        eprint!("[o]verwrite, overwrite [a]ll, [s]kip, skip al[l], [r]ename, [n]ew name, a[b]ort? ");
        io::stderr().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(OverwriteDecision::Abort);
        }
        let decision = match line.trim() {
            "o" => OverwriteDecision::OverwriteOnce,
            "a" => OverwriteDecision::OverwriteAll,
            "s" => OverwriteDecision::SkipOnce,
            "l" => OverwriteDecision::SkipAll,
            "r" => OverwriteDecision::AutoRename,
            "b" => OverwriteDecision::Abort,
            "n" => {
                eprint!("new name: ");
                io::stderr().flush()?;
                let mut name = String::new();
                stdin.lock().read_line(&mut name)?;
                OverwriteDecision::RenameTo(name.trim().to_string())
            }
            _ => continue,
        };
        return Ok(decision);
    }
}

fn progress_line(snapshot: &ProgressSnapshot) -> String {
    let percent = snapshot
        .percent
        .map_or_else(|| "--".to_string(), |p| format!("{p:>3}%"));
    let done = match snapshot.total_bytes {
        Some(total) if total > 0 => {
            format!("{} / {}", format_size(snapshot.bytes_done), format_size(total))
        }
        _ => format!(
            "{} / {} items",
            snapshot.items_done,
            snapshot
                .total_items
                .map_or_else(|| "?".to_string(), |t| t.to_string())
        ),
    };
    let eta = snapshot
        .remaining_average
        .map(|d| format!(" eta {}", format_duration(d)))
        .unwrap_or_default();

    format!(
        "{:<15} {percent} {done} {}/s{eta}    ",
        snapshot.state.to_string(),
        format_size(snapshot.current_speed as u64),
    )
}

fn print_report(snapshot: &ProgressSnapshot) {
    let outcome = snapshot
        .outcome
        .map_or_else(|| "Unknown".to_string(), |o| o.to_string());
    println!("{outcome}: {}", snapshot.summary());
    if snapshot.total_bytes.is_some_and(|t| t > 0) {
        println!(
            " {} in {}",
            format_size(snapshot.bytes_done),
            format_duration(snapshot.elapsed)
        );
    }
    if snapshot.has_errors() {
        println!();
        println!("{} error(s):", snapshot.error_count);
        for record in &snapshot.errors {
            println!("  {record}");
        }
    }
}

fn clear_line(interactive: bool) {
    if interactive {
        eprint!("\r\x1b[2K");
    }
}

/// Format bytes as human-readable size.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
