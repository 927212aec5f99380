//! The parse worker: a dedicated thread that drains a queue of parse jobs,
//! drives the front-end, and publishes the outcomes as a FIFO event stream.
//!
//! Events for the same path are ordered: a reparse of a previously parsed
//! path is always preceded by an `Invalidated` event, so consumers pass
//! through an "empty for P" state between parses.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::frontend::{self, CompileCommand, ParseOptions, TranslationUnit};
use crate::makefile;

/// Depth of the parse-to-visit event channel.
const EVENT_QUEUE_DEPTH: usize = 256;

/// What the parse worker tells the world.
pub enum ParseEvent {
    /// A job finished. `None` means the front-end produced no unit; the
    /// file is still part of the indexed set.
    Parsed(PathBuf, Option<TranslationUnit>),
    /// Everything previously derived from this path is stale.
    Invalidated(PathBuf),
}

enum JobKind {
    Parse(CompileCommand),
    LoadSaved,
}

enum Command {
    Add { path: PathBuf, kind: JobKind },
    AddMakefile {
        path: PathBuf,
        accept: Option<Regex>,
        reject: Option<Regex>,
    },
    Invalidate(PathBuf),
    Shutdown,
}

/// Cloneable handle for enqueueing work from other threads.
#[derive(Clone)]
pub struct ParseHandle {
    commands: Sender<Command>,
    aborted: Arc<AtomicBool>,
}

impl ParseHandle {
    /// Enqueue a parse. If the path already has a queued job its arguments
    /// are replaced; if it was parsed before, `Invalidated` is emitted
    /// before the new `Parsed`.
    pub fn add_file(&self, path: PathBuf, args: CompileCommand) {
        let _ = self.commands.send(Command::Add {
            path,
            kind: JobKind::Parse(args),
        });
    }

    /// Ingest a compiled-command listing and enqueue every accepted source.
    pub fn add_makefile(&self, path: PathBuf, accept: Option<Regex>, reject: Option<Regex>) {
        let _ = self.commands.send(Command::AddMakefile {
            path,
            accept,
            reject,
        });
    }

    /// Enqueue a job that reads a previously saved unit instead of parsing.
    pub fn load(&self, path: PathBuf) {
        let _ = self.commands.send(Command::Add {
            path,
            kind: JobKind::LoadSaved,
        });
    }

    /// Flow an invalidation through the event stream, dropping any queued
    /// job for the path first.
    pub fn invalidate(&self, path: PathBuf) {
        let _ = self.commands.send(Command::Invalidate(path));
    }

    /// Drop pending jobs and stop the worker at the next safe point.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
        let _ = self.commands.send(Command::Shutdown);
    }
}

pub struct ParseWorker {
    handle: ParseHandle,
    thread: Option<JoinHandle<()>>,
}

impl ParseWorker {
    /// Spawn the worker. Successful parses are saved under `ast_dir` when
    /// one is configured; `load` jobs read from the same place.
    pub fn spawn(ast_dir: Option<PathBuf>) -> (ParseWorker, Receiver<ParseEvent>) {
        let (commands_tx, commands_rx) = unbounded();
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_DEPTH);
        let aborted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&aborted);
        let thread = thread::Builder::new()
            .name("cxref-parse".into())
            .spawn(move || run(commands_rx, events_tx, flag, ast_dir))
            .expect("spawn parse worker");
        (
            ParseWorker {
                handle: ParseHandle {
                    commands: commands_tx,
                    aborted,
                },
                thread: Some(thread),
            },
            events_rx,
        )
    }

    pub fn handle(&self) -> ParseHandle {
        self.handle.clone()
    }

    pub fn add_file(&self, path: PathBuf, args: CompileCommand) {
        self.handle.add_file(path, args);
    }

    pub fn add_makefile(&self, path: PathBuf, accept: Option<Regex>, reject: Option<Regex>) {
        self.handle.add_makefile(path, accept, reject);
    }

    pub fn load(&self, path: PathBuf) {
        self.handle.load(path);
    }

    pub fn invalidate(&self, path: PathBuf) {
        self.handle.invalidate(path);
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the worker to exit. Call `abort` first.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ParseWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.abort();
            self.join();
        }
    }
}

/// Location of the saved-unit artefact for a source path.
pub fn ast_artefact_path(ast_dir: &Path, source: &Path) -> PathBuf {
    let relative = source.strip_prefix("/").unwrap_or(source);
    ast_dir.join(relative)
}

struct WorkerState {
    queue: VecDeque<PathBuf>,
    jobs: HashMap<PathBuf, JobKind>,
    /// Paths a `Parsed` event has been emitted for (failures included).
    parsed: HashSet<PathBuf>,
    events: Sender<ParseEvent>,
    aborted: Arc<AtomicBool>,
    ast_dir: Option<PathBuf>,
}

fn run(
    commands: Receiver<Command>,
    events: Sender<ParseEvent>,
    aborted: Arc<AtomicBool>,
    ast_dir: Option<PathBuf>,
) {
    let mut state = WorkerState {
        queue: VecDeque::new(),
        jobs: HashMap::new(),
        parsed: HashSet::new(),
        events,
        aborted,
        ast_dir,
    };

    loop {
        // handle every pending command before touching the queue
        let command = if state.queue.is_empty() {
            match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            }
        } else {
            match commands.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        };

        if let Some(command) = command {
            match command {
                Command::Add { path, kind } => state.enqueue(path, kind),
                Command::AddMakefile {
                    path,
                    accept,
                    reject,
                } => state.enqueue_makefile(&path, accept.as_ref(), reject.as_ref()),
                Command::Invalidate(path) => state.invalidate(path),
                Command::Shutdown => break,
            }
            continue;
        }

        if state.aborted.load(Ordering::Relaxed) {
            break;
        }
        if let Some(path) = state.queue.pop_front() {
            if let Some(kind) = state.jobs.remove(&path) {
                state.run_job(path, kind);
            }
        }
    }

    let dropped = state.queue.len();
    if dropped > 0 {
        debug!(dropped, "parse queue abandoned");
    }
    info!("parse worker stopped");
}

impl WorkerState {
    fn enqueue(&mut self, path: PathBuf, kind: JobKind) {
        if self.aborted.load(Ordering::Relaxed) {
            return;
        }
        if self.parsed.remove(&path) {
            // the live unit for this path is about to be replaced
            let _ = self.events.send(ParseEvent::Invalidated(path.clone()));
        }
        if self.jobs.insert(path.clone(), kind).is_none() {
            self.queue.push_back(path);
        }
    }

    fn enqueue_makefile(&mut self, path: &Path, accept: Option<&Regex>, reject: Option<&Regex>) {
        let jobs = match makefile::ingest(path) {
            Ok(jobs) => jobs,
            Err(err) => {
                warn!(makefile = %path.display(), error = %err, "makefile ingestion failed");
                return;
            }
        };
        let mut accepted = 0usize;
        for job in jobs {
            let source = job.source.to_string_lossy();
            if let Some(accept) = accept {
                if !accept.is_match(&source) {
                    continue;
                }
            }
            if let Some(reject) = reject {
                if reject.is_match(&source) {
                    continue;
                }
            }
            accepted += 1;
            self.enqueue(job.source, JobKind::Parse(job.command));
        }
        info!(makefile = %path.display(), accepted, "makefile ingested");
    }

    fn invalidate(&mut self, path: PathBuf) {
        if self.jobs.remove(&path).is_some() {
            self.queue.retain(|queued| *queued != path);
        }
        if self.parsed.remove(&path) {
            let _ = self.events.send(ParseEvent::Invalidated(path));
        }
    }

    fn run_job(&mut self, path: PathBuf, kind: JobKind) {
        if self.aborted.load(Ordering::Relaxed) {
            return;
        }
        let unit = match kind {
            JobKind::Parse(args) => {
                match frontend::parse(&path, &args, ParseOptions::default()) {
                    Ok(unit) => {
                        if let Some(ast_dir) = &self.ast_dir {
                            let artefact = ast_artefact_path(ast_dir, &path);
                            if let Err(err) = unit.save(&artefact) {
                                warn!(file = %path.display(), error = %err, "saving unit failed");
                            }
                        }
                        Some(unit)
                    }
                    Err(err) => {
                        warn!(file = %path.display(), error = %err, "parse failed");
                        None
                    }
                }
            }
            JobKind::LoadSaved => {
                let artefact = self
                    .ast_dir
                    .as_ref()
                    .map(|dir| ast_artefact_path(dir, &path));
                match artefact
                    .ok_or_else(|| crate::error::CxrefError::NotFound("no ast directory".into()))
                    .and_then(|artefact| TranslationUnit::load(&artefact))
                {
                    Ok(unit) => Some(unit),
                    Err(err) => {
                        warn!(file = %path.display(), error = %err, "loading saved unit failed");
                        None
                    }
                }
            }
        };
        debug!(file = %path.display(), parsed = unit.is_some(), "job finished");
        self.parsed.insert(path.clone());
        let _ = self.events.send(ParseEvent::Parsed(path, unit));
    }
}
