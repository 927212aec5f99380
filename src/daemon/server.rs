//! Daemon server: owns the workers and the translation-unit cache, maps
//! commands onto them, and speaks the JSON line protocol over a Unix
//! socket under `<root>/.cxref/`.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::frontend::{CompileCommand, CursorKind, TranslationUnit};
use crate::inspect::{self, InspectJob, InspectKind};
use crate::location;
use crate::parse_worker::ParseWorker;
use crate::symbols::SymbolKind;
use crate::visit_worker::{LookupFlags, VisitWorker};
use crate::watcher::{start_watching, WatcherHandle};

use super::protocol::{Request, Response};

/// Socket path inside the project's `.cxref` directory.
pub fn socket_path(root: &Path) -> PathBuf {
    root.join(".cxref").join("cxref.sock")
}

/// PID file path.
pub fn pid_path(root: &Path) -> PathBuf {
    root.join(".cxref").join("daemon.pid")
}

/// Scratch directory for saved units.
pub fn ast_dir(root: &Path) -> PathBuf {
    root.join(".cxref").join("ast")
}

/// The query facade: dispatches one command at a time on the IPC thread.
/// The unit cache is only touched here, so its ownership stays
/// single-threaded; parse results migrate in through the sink channel.
pub struct Daemon {
    parse: ParseWorker,
    visit: VisitWorker,
    units: HashMap<PathBuf, Option<TranslationUnit>>,
    completed: crate::visit_worker::UnitSink,
    /// Everything ever added, with its last-known compile arguments; shared
    /// with the file watcher for re-indexing.
    indexed: Arc<Mutex<HashMap<PathBuf, CompileCommand>>>,
    inspect_aborted: Arc<AtomicBool>,
    shutdown: bool,
}

impl Daemon {
    pub fn new(root: &Path) -> Daemon {
        let (parse, events) = ParseWorker::spawn(Some(ast_dir(root)));
        let (visit, completed) = VisitWorker::spawn(events);
        Daemon {
            parse,
            visit,
            units: HashMap::new(),
            completed,
            indexed: Arc::new(Mutex::new(HashMap::new())),
            inspect_aborted: Arc::new(AtomicBool::new(false)),
            shutdown: false,
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    pub fn indexed_map(&self) -> Arc<Mutex<HashMap<PathBuf, CompileCommand>>> {
        self.indexed.clone()
    }

    pub fn parse_handle(&self) -> crate::parse_worker::ParseHandle {
        self.parse.handle()
    }

    /// Move finished units from the visit worker into the cache. Keeps
    /// cache mutation on this thread and the at-most-one-unit-per-path
    /// invariant: replacing an entry drops the previous handle.
    fn drain_completed(&mut self) {
        while let Ok((path, unit)) = self.completed.try_recv() {
            self.units.insert(path, unit);
        }
    }

    pub fn run_command(&mut self, request: &Request) -> Response {
        debug!(command = %request.command, "dispatch");
        self.drain_completed();
        match request.command.as_str() {
            "syntax" => syntax(),
            "quit" => self.quit(),
            "add" => self.add_source_file(request),
            "remove" => self.remove_source_file(request),
            "makefile" => self.add_makefile(request),
            "files" => self.file_list(request),
            "lookup" => self.lookup(request),
            "lookupline" => self.lookup_line(request),
            "printtree" => self.print_tree(),
            "load" => self.load(request),
            "dumpast" => self.inspect(request, None),
            "checkincludes" => self.inspect(request, Some(InspectKind::CheckIncludes)),
            _ => Response::new("Unknown command"),
        }
    }

    fn quit(&mut self) -> Response {
        self.inspect_aborted.store(true, Ordering::Relaxed);
        self.parse.abort();
        self.visit.quit();
        self.parse.join();
        self.visit.join();
        self.shutdown = true;
        Response::new("quitting")
    }

    fn add_source_file(&mut self, request: &Request) -> Response {
        let Some(file) = request.arg("file").filter(|f| !f.is_empty()) else {
            return Response::new("No file to add (use --file=<file>)");
        };
        let path = match location::resolve_path(Path::new(file)) {
            Ok(path) => path,
            Err(_) => return Response::new(format!("{file} doesn't exist")),
        };
        let args = CompileCommand::default();
        if let Ok(mut indexed) = self.indexed.lock() {
            indexed.insert(path.clone(), args.clone());
        }
        self.parse.add_file(path, args);
        Response::new("File added")
    }

    fn remove_source_file(&mut self, request: &Request) -> Response {
        let use_regexp = request.has("regexp") || request.has("r");
        let Some(pattern) = request.free.first().filter(|p| !p.is_empty()) else {
            return Response::new("Invalid arguments. I need exactly one free arg");
        };
        if request.free.len() != 1 {
            return Response::new("Invalid arguments. I need exactly one free arg");
        }
        let regex = if use_regexp {
            match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(_) => return Response::new("Invalid arguments. Bad regexp"),
            }
        } else {
            None
        };

        // collect the matching keys first, then erase
        let matched: Vec<PathBuf> = self
            .units
            .keys()
            .filter(|path| {
                let text = path.to_string_lossy();
                match &regex {
                    Some(regex) => regex.is_match(&text),
                    None => text.contains(pattern.as_str()),
                }
            })
            .cloned()
            .collect();
        if matched.is_empty() {
            return Response::new(format!("No matches for {pattern}"));
        }

        let mut removed = Vec::with_capacity(matched.len());
        for path in matched {
            self.units.remove(&path); // dropping the entry releases the unit
            if let Ok(mut indexed) = self.indexed.lock() {
                indexed.remove(&path);
            }
            self.parse.invalidate(path.clone());
            removed.push(path.to_string_lossy().into_owned());
        }
        Response::new(format!("Removed {}", removed.join("\n")))
    }

    fn add_makefile(&mut self, request: &Request) -> Response {
        let Some(makefile) = request.free.first() else {
            return Response::new("No Makefile passed");
        };
        let path = match location::resolve_path(Path::new(makefile)) {
            Ok(path) if path.is_file() => path,
            _ => return Response::new(format!("Makefile does not exist: {makefile}")),
        };
        let accept = match compile_optional(request.arg("accept")) {
            Ok(regex) => regex,
            Err(response) => return response,
        };
        let reject = match compile_optional(request.arg("reject")) {
            Ok(regex) => regex,
            Err(response) => return response,
        };
        self.parse.add_makefile(path, accept, reject);
        Response::new("Added makefile")
    }

    fn file_list(&mut self, request: &Request) -> Response {
        let files = match self.visit.files() {
            Ok(files) => files,
            Err(err) => return Response::new(err.to_string()),
        };
        let filtered: Vec<String> = if let Some(pattern) = request.arg("regexp") {
            let Ok(regex) = Regex::new(pattern) else {
                return Response::new("Invalid arguments. Bad regexp");
            };
            files
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .filter(|p| regex.is_match(p))
                .collect()
        } else if let Some(pattern) = request.arg("match") {
            files
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .filter(|p| p.contains(pattern))
                .collect()
        } else {
            files
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect()
        };
        Response::joined(filtered)
    }

    fn lookup(&mut self, request: &Request) -> Response {
        let mut mask = SymbolKind::empty();
        for name in request
            .arg("types")
            .unwrap_or_default()
            .split(',')
            .filter(|t| !t.is_empty())
        {
            match SymbolKind::parse(name) {
                Some(kind) => mask |= kind,
                None => return Response::new(format!("Can't parse type {name}")),
            }
        }
        if mask.is_empty() {
            mask = SymbolKind::all() & !SymbolKind::ROOT;
        }
        let flags = if request.has("regexp") {
            LookupFlags::REG_EXP
        } else {
            LookupFlags::empty()
        };

        match self.visit.lookup(&request.free, flags, mask) {
            Ok(hits) => Response::joined(
                hits.iter()
                    .map(|hit| {
                        format!(
                            "{} {} \"{}:{}:{}\"",
                            hit.kind.name(),
                            hit.qualified,
                            hit.location.path().display(),
                            hit.location.line,
                            hit.location.column
                        )
                    })
                    .collect(),
            ),
            Err(err) => Response::new(err.to_string()),
        }
    }

    fn lookup_line(&mut self, request: &Request) -> Response {
        let (Some(file), Some(line), Some(column)) = (
            request.arg("file"),
            request.arg("line"),
            request.arg("column"),
        ) else {
            return Response::new("Invalid argument count");
        };
        let (Ok(line), Ok(column)) = (line.parse::<u32>(), column.parse::<u32>()) else {
            return Response::new("Invalid argument type");
        };
        let mut path = PathBuf::from(file);
        if !location::is_resolved(&path) {
            match location::resolve_path(&path) {
                Ok(resolved) => path = resolved,
                Err(_) => return Response::new("Invalid argument type"),
            }
        }
        if !path.is_file() || line == 0 || column == 0 {
            return Response::new("Invalid argument type");
        }

        let Some(Some(unit)) = self.units.get(&path) else {
            return Response::new("Translation unit not found");
        };
        let Some(cursor) = unit.cursor_at(&path, line, column) else {
            return Response::new("Unable to get cursor for location");
        };
        // the cursor under a location is the name token itself; resolve it
        // first, and send method names to their canonical declaration
        let referenced = match cursor.referenced() {
            Some(decl)
                if matches!(
                    decl.kind(),
                    CursorKind::FunctionDecl | CursorKind::FunctionDef
                ) =>
            {
                cursor.canonical()
            }
            other => other,
        };
        let Some(referenced) = referenced else {
            return Response::new("No referenced cursor");
        };
        let target = referenced.location();
        Response::new(format!(
            "Symbol (decl) at {}, line {} column {}",
            target.path().display(),
            target.line,
            target.column
        ))
    }

    fn print_tree(&mut self) -> Response {
        match self.visit.print_tree() {
            Ok(tree) => Response::new(tree),
            Err(err) => Response::new(err.to_string()),
        }
    }

    fn load(&mut self, request: &Request) -> Response {
        let Some(file) = request.free.first() else {
            return Response::new("No filename specified");
        };
        let mut path = PathBuf::from(file);
        if !location::is_resolved(&path) {
            if let Ok(resolved) = location::resolve_path(&path) {
                path = resolved;
            }
        }
        if !path.is_file() {
            return Response::new("No filename specified");
        }
        if let Some(unit) = self.units.get(&path) {
            if unit.is_none() {
                return Response::new(format!("File already loading {}", path.display()));
            }
            self.units.remove(&path);
        }
        // sentinel: present in the cache, no unit yet
        self.units.insert(path.clone(), None);
        self.parse.load(path);
        Response::new("Loading")
    }

    /// One-shot inspection queries: `dumpast` and `checkincludes`.
    fn inspect(&mut self, request: &Request, kind: Option<InspectKind>) -> Response {
        let file = request
            .arg("file")
            .map(str::to_string)
            .or_else(|| request.free.first().cloned());
        let Some(file) = file else {
            return Response::new("No file to inspect (use --file=<file>)");
        };
        let path = match location::resolve_path(Path::new(&file)) {
            Ok(path) => path,
            Err(_) => return Response::new(format!("{file} doesn't exist")),
        };
        let args = self
            .indexed
            .lock()
            .ok()
            .and_then(|indexed| indexed.get(&path).cloned())
            .unwrap_or_default();
        let kind = kind.unwrap_or(InspectKind::DumpAst {
            include_headers: request.has("includeheaders"),
        });
        let lines = inspect::spawn(
            InspectJob { path, args, kind },
            Arc::clone(&self.inspect_aborted),
        );
        Response::joined(lines.iter().collect())
    }
}

fn syntax() -> Response {
    Response::new(
        "Syntax: cxref <command> [--argument1, --argument2=foo, ...]\n\
         commands: syntax|quit|add|remove|makefile|files|lookup|lookupline|\
         printtree|load|dumpast|checkincludes",
    )
}

fn compile_optional(pattern: Option<&str>) -> std::result::Result<Option<Regex>, Response> {
    match pattern {
        None | Some("") => Ok(None),
        Some(pattern) => Regex::new(pattern)
            .map(Some)
            .map_err(|_| Response::new("Invalid arguments. Bad regexp")),
    }
}

/// Run the daemon until a `quit` command arrives. Returns an error only
/// when the socket cannot be set up.
pub fn start_daemon(root: &Path) -> Result<()> {
    let root = root.canonicalize()?;
    let sock_path = socket_path(&root);
    let pid_file = pid_path(&root);
    std::fs::create_dir_all(sock_path.parent().expect(".cxref has a parent"))?;
    if sock_path.exists() {
        std::fs::remove_file(&sock_path)?;
    }
    std::fs::write(&pid_file, std::process::id().to_string())?;

    let mut daemon = Daemon::new(&root);

    let _watcher: Option<WatcherHandle> =
        match start_watching(&root, daemon.indexed_map(), daemon.parse_handle()) {
            Ok(handle) => {
                info!("file watcher started");
                Some(handle)
            }
            Err(err) => {
                warn!(error = %err, "file watcher failed to start");
                None
            }
        };

    let listener = UnixListener::bind(&sock_path)?;
    info!(socket = %sock_path.display(), "daemon listening");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(err) = handle_client(&mut daemon, stream) {
                    debug!(error = %err, "client handler error");
                }
            }
            Err(err) => {
                error!(error = %err, "accept error");
            }
        }
        if daemon.shutdown_requested() {
            break;
        }
    }

    info!("daemon shutting down");
    let _ = std::fs::remove_file(&sock_path);
    let _ = std::fs::remove_file(&pid_file);
    Ok(())
}

/// Commands run on this thread, one client at a time: the cache and the
/// dispatch state are single-threaded by design, and every command either
/// answers from memory or delegates to a worker.
fn handle_client(daemon: &mut Daemon, stream: UnixStream) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    let mut line = String::new();
    reader.read_line(&mut line)?;

    let response = match serde_json::from_str::<Request>(&line) {
        Ok(request) => daemon.run_command(&request),
        Err(err) => {
            debug!(error = %err, "malformed request");
            Response::new("Invalid request")
        }
    };
    let json = serde_json::to_string(&response)?;
    writeln!(writer, "{json}")?;
    Ok(())
}

/// Check the PID file and probe the process.
pub fn is_daemon_running(root: &Path) -> bool {
    let pid_file = pid_path(root);
    if !pid_file.exists() {
        return false;
    }
    if let Ok(pid_text) = std::fs::read_to_string(&pid_file) {
        if let Ok(pid) = pid_text.trim().parse::<i32>() {
            // signal 0 = existence check
            unsafe {
                return libc::kill(pid, 0) == 0;
            }
        }
    }
    false
}

/// Send one request to a running daemon and wait for the reply.
pub fn send_request(root: &Path, request: &Request) -> Result<Response> {
    let mut stream = UnixStream::connect(socket_path(root))?;
    let json = serde_json::to_string(request)?;
    writeln!(stream, "{json}")?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(serde_json::from_str(&line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unknown_commands_are_reported() {
        let dir = tempdir().unwrap();
        let mut daemon = Daemon::new(dir.path());
        let response = daemon.run_command(&Request::new("frobnicate"));
        assert_eq!(response.result, "Unknown command");
    }

    #[test]
    fn syntax_lists_the_commands() {
        let dir = tempdir().unwrap();
        let mut daemon = Daemon::new(dir.path());
        let response = daemon.run_command(&Request::new("syntax"));
        assert!(response.result.contains("lookupline"));
        assert!(response.result.contains("checkincludes"));
    }

    #[test]
    fn add_requires_an_existing_file() {
        let dir = tempdir().unwrap();
        let mut daemon = Daemon::new(dir.path());
        let response = daemon.run_command(&Request::new("add"));
        assert!(response.result.contains("--file"));

        let response = daemon
            .run_command(&Request::new("add").with_arg("file", "/no/such/source.cpp"));
        assert!(response.result.ends_with("doesn't exist"));
    }

    #[test]
    fn remove_validates_its_arguments() {
        let dir = tempdir().unwrap();
        let mut daemon = Daemon::new(dir.path());
        let response = daemon.run_command(&Request::new("remove"));
        assert!(response.result.starts_with("Invalid arguments"));

        let response = daemon.run_command(
            &Request::new("remove")
                .with_arg("regexp", "")
                .with_free("("),
        );
        assert_eq!(response.result, "Invalid arguments. Bad regexp");

        let response = daemon.run_command(&Request::new("remove").with_free("nothing-indexed"));
        assert_eq!(response.result, "No matches for nothing-indexed");
    }

    #[test]
    fn lookup_rejects_unknown_types() {
        let dir = tempdir().unwrap();
        let mut daemon = Daemon::new(dir.path());
        let response =
            daemon.run_command(&Request::new("lookup").with_arg("types", "Gizmo"));
        assert_eq!(response.result, "Can't parse type Gizmo");
    }

    #[test]
    fn lookupline_validates_arguments() {
        let dir = tempdir().unwrap();
        let mut daemon = Daemon::new(dir.path());
        let response = daemon.run_command(&Request::new("lookupline"));
        assert_eq!(response.result, "Invalid argument count");

        let response = daemon.run_command(
            &Request::new("lookupline")
                .with_arg("file", "/no/such/file.cpp")
                .with_arg("line", "1")
                .with_arg("column", "1"),
        );
        assert_eq!(response.result, "Invalid argument type");
    }

    #[test]
    fn quit_drains_both_workers() {
        let dir = tempdir().unwrap();
        let mut daemon = Daemon::new(dir.path());
        assert!(!daemon.shutdown_requested());
        let response = daemon.run_command(&Request::new("quit"));
        assert_eq!(response.result, "quitting");
        assert!(daemon.shutdown_requested());
    }
}
