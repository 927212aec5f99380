//! cxref CLI — client and daemon in one binary.
//!
//! Usage:
//!   cxref daemon                 # run the daemon (foreground)
//!   cxref daemon start|stop|status
//!   cxref add <file>             # index a source file
//!   cxref makefile <listing>     # index every compile command in a listing
//!   cxref files [--regexp <rx>]  # list indexed files
//!   cxref lookup [patterns...]   # find symbols
//!   cxref lookupline <file> <line> <column>
//!   cxref dumpast <file>         # dump a unit cursor by cursor
//!   cxref checkincludes <file>   # audit the include graph
//!
//! Every non-daemon subcommand talks to the daemon over the Unix socket,
//! starting it in the background first when necessary.

use std::path::PathBuf;
use std::process::{Command as Process, Stdio};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use cxref::daemon::{is_daemon_running, send_request, start_daemon, Request};

#[derive(Parser)]
#[command(name = "cxref")]
#[command(about = "Persistent cross-reference daemon for C/C++", long_about = None)]
struct Cli {
    /// Project root directory (default: current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the daemon
    Daemon {
        #[command(subcommand)]
        action: Option<DaemonAction>,
    },

    /// Show the command syntax
    Syntax,

    /// Index a source file
    Add {
        file: PathBuf,
    },

    /// Drop indexed files matching a pattern
    Remove {
        pattern: String,
        /// Treat the pattern as a regular expression
        #[arg(long)]
        regexp: bool,
    },

    /// Index every compile command in a listing
    Makefile {
        makefile: PathBuf,
        /// Only sources matching this regexp
        #[arg(long)]
        accept: Option<String>,
        /// Skip sources matching this regexp
        #[arg(long)]
        reject: Option<String>,
    },

    /// List indexed files
    Files {
        #[arg(long)]
        regexp: Option<String>,
        #[arg(long = "match")]
        substring: Option<String>,
    },

    /// Find symbols by name
    Lookup {
        patterns: Vec<String>,
        /// Comma-separated kind filter, e.g. MethodDefinition,Class
        #[arg(long)]
        types: Option<String>,
        /// Treat patterns as regular expressions
        #[arg(long)]
        regexp: bool,
    },

    /// Resolve the declaration under file:line:column
    Lookupline {
        file: PathBuf,
        line: u32,
        column: u32,
    },

    /// Dump the symbol forest
    Printtree,

    /// Load a previously saved unit
    Load {
        file: PathBuf,
    },

    /// Dump a unit cursor by cursor
    Dumpast {
        file: PathBuf,
        /// Dump included headers too
        #[arg(long)]
        include_headers: bool,
    },

    /// Audit a unit's include graph
    Checkincludes {
        file: PathBuf,
    },

    /// Stop the daemon
    Quit,
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon in the background
    Start,
    /// Stop a running daemon
    Stop,
    /// Report whether the daemon is running
    Status,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = cli.root.canonicalize().unwrap_or(cli.root);

    if let Commands::Daemon { action } = &cli.command {
        return handle_daemon_command(&root, action.as_ref());
    }

    if !is_daemon_running(&root) {
        start_daemon_background(&root)?;
        wait_for_daemon(&root)?;
    }

    let request = to_request(&cli.command);
    let response = send_request(&root, &request)?;
    if !response.result.is_empty() {
        println!("{}", response.result);
    }
    Ok(())
}

fn to_request(command: &Commands) -> Request {
    match command {
        Commands::Syntax => Request::new("syntax"),
        Commands::Quit => Request::new("quit"),
        Commands::Printtree => Request::new("printtree"),
        Commands::Add { file } => {
            Request::new("add").with_arg("file", file.to_string_lossy())
        }
        Commands::Remove { pattern, regexp } => {
            let mut request = Request::new("remove").with_free(pattern.clone());
            if *regexp {
                request = request.with_arg("regexp", "");
            }
            request
        }
        Commands::Makefile {
            makefile,
            accept,
            reject,
        } => {
            let mut request = Request::new("makefile").with_free(makefile.to_string_lossy());
            if let Some(accept) = accept {
                request = request.with_arg("accept", accept.clone());
            }
            if let Some(reject) = reject {
                request = request.with_arg("reject", reject.clone());
            }
            request
        }
        Commands::Files { regexp, substring } => {
            let mut request = Request::new("files");
            if let Some(regexp) = regexp {
                request = request.with_arg("regexp", regexp.clone());
            }
            if let Some(substring) = substring {
                request = request.with_arg("match", substring.clone());
            }
            request
        }
        Commands::Lookup {
            patterns,
            types,
            regexp,
        } => {
            let mut request = Request::new("lookup");
            for pattern in patterns {
                request = request.with_free(pattern.clone());
            }
            if let Some(types) = types {
                request = request.with_arg("types", types.clone());
            }
            if *regexp {
                request = request.with_arg("regexp", "");
            }
            request
        }
        Commands::Lookupline { file, line, column } => Request::new("lookupline")
            .with_arg("file", file.to_string_lossy())
            .with_arg("line", line.to_string())
            .with_arg("column", column.to_string()),
        Commands::Load { file } => Request::new("load").with_free(file.to_string_lossy()),
        Commands::Dumpast {
            file,
            include_headers,
        } => {
            let mut request = Request::new("dumpast").with_arg("file", file.to_string_lossy());
            if *include_headers {
                request = request.with_arg("includeheaders", "");
            }
            request
        }
        Commands::Checkincludes { file } => {
            Request::new("checkincludes").with_arg("file", file.to_string_lossy())
        }
        Commands::Daemon { .. } => unreachable!("handled before dispatch"),
    }
}

fn handle_daemon_command(root: &PathBuf, action: Option<&DaemonAction>) -> Result<()> {
    match action {
        None => {
            // foreground, with logging
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .init();
            start_daemon(root)
        }
        Some(DaemonAction::Start) => {
            if is_daemon_running(root) {
                println!("Daemon is already running.");
                return Ok(());
            }
            start_daemon_background(root)?;
            wait_for_daemon(root)?;
            println!("Daemon started.");
            Ok(())
        }
        Some(DaemonAction::Stop) => {
            if !is_daemon_running(root) {
                println!("Daemon is not running.");
                return Ok(());
            }
            let response = send_request(root, &Request::new("quit"))?;
            println!("{}", response.result);
            Ok(())
        }
        Some(DaemonAction::Status) => {
            if is_daemon_running(root) {
                println!("Daemon is running.");
            } else {
                println!("Daemon is not running.");
            }
            Ok(())
        }
    }
}

/// Re-exec ourselves detached as the daemon.
fn start_daemon_background(root: &PathBuf) -> Result<()> {
    let exe = std::env::current_exe()?;
    Process::new(exe)
        .arg("--root")
        .arg(root)
        .arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

/// Wait for the freshly started daemon to answer, up to ten seconds.
fn wait_for_daemon(root: &PathBuf) -> Result<()> {
    for _ in 0..50 {
        std::thread::sleep(Duration::from_millis(200));
        if is_daemon_running(root) && send_request(root, &Request::new("syntax")).is_ok() {
            return Ok(());
        }
    }
    bail!("daemon did not come up");
}
