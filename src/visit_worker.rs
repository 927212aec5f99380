//! The visit worker: consumes parse events in FIFO order, owns the symbol
//! forest, and serves lookups on its own thread.
//!
//! After walking a unit the worker hands it off to the translation-unit
//! cache through the sink channel; the worker never keeps a unit alive.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bitflags::bitflags;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use regex::Regex;
use tracing::{debug, info};

use crate::error::{CxrefError, Result};
use crate::frontend::{visit_children, Cursor, CursorKind, Declaration, TranslationUnit, Visit};
use crate::location::{intern, Location};
use crate::parse_worker::ParseEvent;
use crate::symbols::{NodeId, SymbolForest, SymbolKind};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LookupFlags: u32 {
        /// Treat patterns as regular expressions instead of substrings.
        const REG_EXP = 1 << 0;
    }
}

/// One lookup result, delivered in deterministic pre-order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupHit {
    pub kind: SymbolKind,
    pub qualified: String,
    pub location: Location,
}

enum Matcher {
    Substring(String),
    Pattern(Regex),
}

enum Command {
    Lookup {
        matchers: Vec<Matcher>,
        mask: SymbolKind,
        reply: Sender<Vec<LookupHit>>,
    },
    Files {
        reply: Sender<Vec<PathBuf>>,
    },
    PrintTree {
        reply: Sender<String>,
    },
    Quit,
}

pub struct VisitWorker {
    commands: Sender<Command>,
    aborted: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Units flow out of the worker once their walk is done.
pub type UnitSink = Receiver<(PathBuf, Option<TranslationUnit>)>;

impl VisitWorker {
    pub fn spawn(events: Receiver<ParseEvent>) -> (VisitWorker, UnitSink) {
        let (commands_tx, commands_rx) = unbounded();
        let (sink_tx, sink_rx) = unbounded();
        let aborted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&aborted);
        let thread = thread::Builder::new()
            .name("cxref-visit".into())
            .spawn(move || run(events, commands_rx, sink_tx, flag))
            .expect("spawn visit worker");
        (
            VisitWorker {
                commands: commands_tx,
                aborted,
                thread: Some(thread),
            },
            sink_rx,
        )
    }

    /// Kind-masked pattern lookup over the forest. An empty pattern list
    /// matches everything; with `REG_EXP` the patterns must be valid
    /// regular expressions.
    pub fn lookup(
        &self,
        patterns: &[String],
        flags: LookupFlags,
        mask: SymbolKind,
    ) -> Result<Vec<LookupHit>> {
        let mut matchers = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            if flags.contains(LookupFlags::REG_EXP) {
                let regex = Regex::new(pattern)
                    .map_err(|_| CxrefError::InvalidArgument(format!("bad regexp {pattern}")))?;
                matchers.push(Matcher::Pattern(regex));
            } else {
                matchers.push(Matcher::Substring(pattern.clone()));
            }
        }
        let (reply_tx, reply_rx) = unbounded();
        self.commands
            .send(Command::Lookup {
                matchers,
                mask,
                reply: reply_tx,
            })
            .map_err(|_| CxrefError::Internal("visit worker gone".into()))?;
        reply_rx
            .recv()
            .map_err(|_| CxrefError::Internal("visit worker gone".into()))
    }

    /// Paths currently represented in the index, failed parses included.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let (reply_tx, reply_rx) = unbounded();
        self.commands
            .send(Command::Files { reply: reply_tx })
            .map_err(|_| CxrefError::Internal("visit worker gone".into()))?;
        reply_rx
            .recv()
            .map_err(|_| CxrefError::Internal("visit worker gone".into()))
    }

    pub fn print_tree(&self) -> Result<String> {
        let (reply_tx, reply_rx) = unbounded();
        self.commands
            .send(Command::PrintTree { reply: reply_tx })
            .map_err(|_| CxrefError::Internal("visit worker gone".into()))?;
        reply_rx
            .recv()
            .map_err(|_| CxrefError::Internal("visit worker gone".into()))
    }

    /// Stop the worker; any in-flight walk returns at the next node.
    pub fn quit(&self) {
        self.aborted.store(true, Ordering::Relaxed);
        let _ = self.commands.send(Command::Quit);
    }

    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for VisitWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.quit();
            self.join();
        }
    }
}

struct WorkerState {
    forest: SymbolForest,
    files: HashSet<PathBuf>,
    sink: Sender<(PathBuf, Option<TranslationUnit>)>,
    aborted: Arc<AtomicBool>,
}

fn run(
    events: Receiver<ParseEvent>,
    commands: Receiver<Command>,
    sink: Sender<(PathBuf, Option<TranslationUnit>)>,
    aborted: Arc<AtomicBool>,
) {
    let mut state = WorkerState {
        forest: SymbolForest::new(),
        files: HashSet::new(),
        sink,
        aborted,
    };
    let mut events_open = true;

    loop {
        if events_open {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => state.on_event(event),
                    Err(_) => events_open = false,
                },
                recv(commands) -> command => match command {
                    Ok(Command::Quit) | Err(_) => break,
                    Ok(command) => {
                        // events sent before this command are already in the
                        // channel; apply them so queries see current state
                        while let Ok(event) = events.try_recv() {
                            state.on_event(event);
                        }
                        state.on_command(command);
                    }
                },
            }
        } else {
            match commands.recv() {
                Ok(Command::Quit) | Err(_) => break,
                Ok(command) => state.on_command(command),
            }
        }
    }
    info!("visit worker stopped");
}

impl WorkerState {
    fn on_event(&mut self, event: ParseEvent) {
        match event {
            ParseEvent::Parsed(path, unit) => {
                let file = intern(&path);
                let dropped = self.forest.remove_file(file);
                self.files.insert(path.clone());
                if let Some(unit) = &unit {
                    self.index_unit(unit);
                }
                debug!(file = %path.display(), dropped, nodes = self.forest.len(), "unit visited");
                let _ = self.sink.send((path, unit));
            }
            ParseEvent::Invalidated(path) => {
                let file = intern(&path);
                let dropped = self.forest.remove_file(file);
                self.files.remove(&path);
                debug!(file = %path.display(), dropped, "file invalidated");
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Lookup {
                matchers,
                mask,
                reply,
            } => {
                let mut hits = Vec::new();
                let aborted = &self.aborted;
                self.forest.lookup(
                    mask,
                    |qualified| {
                        matchers.is_empty()
                            || matchers.iter().any(|matcher| match matcher {
                                Matcher::Substring(text) => qualified.contains(text.as_str()),
                                Matcher::Pattern(regex) => regex.is_match(qualified),
                            })
                    },
                    &mut |node, qualified| {
                        hits.push(LookupHit {
                            kind: node.kind,
                            qualified: qualified.to_string(),
                            location: node.location,
                        });
                        !aborted.load(Ordering::Relaxed)
                    },
                );
                let _ = reply.send(hits);
            }
            Command::Files { reply } => {
                let mut files: Vec<PathBuf> = self.files.iter().cloned().collect();
                files.sort();
                let _ = reply.send(files);
            }
            Command::PrintTree { reply } => {
                let _ = reply.send(self.forest.print_tree());
            }
            Command::Quit => unreachable!("handled by the loop"),
        }
    }

    /// Walk a unit's own file and rebuild its part of the forest: one node
    /// per declaration under its semantic parent, one reference node per
    /// resolved identifier, with non-owning edges to the referents.
    fn index_unit(&mut self, tu: &TranslationUnit) {
        let aborted = Arc::clone(&self.aborted);
        let forest = &mut self.forest;
        visit_children(&tu.root_cursor(), &mut |cursor: &Cursor<'_>| {
            if aborted.load(Ordering::Relaxed) {
                return Visit::Break;
            }
            let location = cursor.location();
            if location.is_null() {
                return Visit::Recurse;
            }
            let kind = cursor.kind();
            if kind.is_declaration() {
                add_declaration(forest, tu, cursor);
            } else if kind == CursorKind::Reference {
                add_reference(forest, tu, cursor, location);
            }
            Visit::Recurse
        });
    }
}

fn symbol_kind(kind: CursorKind) -> Option<SymbolKind> {
    match kind {
        CursorKind::FunctionDecl => Some(SymbolKind::METHOD_DECLARATION),
        CursorKind::FunctionDef => Some(SymbolKind::METHOD_DEFINITION),
        CursorKind::Class => Some(SymbolKind::CLASS),
        CursorKind::Struct => Some(SymbolKind::STRUCT),
        CursorKind::Namespace => Some(SymbolKind::NAMESPACE),
        CursorKind::VarDecl => Some(SymbolKind::VARIABLE_DECLARATION),
        CursorKind::EnumDecl => Some(SymbolKind::ENUM_DECLARATION),
        CursorKind::EnumConstant => Some(SymbolKind::ENUM_VALUE),
        _ => None,
    }
}

/// Find or create the forest node for a declaration, materializing its
/// semantic ancestors on demand. Ancestors that cannot be resolved in the
/// unit become location-less namespace nodes.
fn node_for_declaration(
    forest: &mut SymbolForest,
    tu: &TranslationUnit,
    decl: &Declaration,
) -> Option<NodeId> {
    let mut parent = NodeId::ROOT;
    if let Some(container) = &decl.container {
        let mut prefix = String::new();
        for part in container.split("::") {
            prefix = if prefix.is_empty() {
                part.to_string()
            } else {
                format!("{prefix}::{part}")
            };
            parent = match tu
                .resolve_qualified(&prefix)
                .and_then(|ancestor| symbol_kind(ancestor.kind).map(|kind| (ancestor, kind)))
            {
                Some((ancestor, kind)) => {
                    forest.insert_child(parent, kind, &ancestor.name, ancestor.location)
                }
                None => forest.insert_child(parent, SymbolKind::NAMESPACE, part, Location::NULL),
            };
        }
    }
    let kind = symbol_kind(decl.kind)?;
    Some(forest.insert_child(parent, kind, &decl.name, decl.location))
}

fn add_declaration(forest: &mut SymbolForest, tu: &TranslationUnit, cursor: &Cursor<'_>) {
    let primary = cursor.declaration();
    for decl in cursor.declarations() {
        let Some(id) = node_for_declaration(forest, tu, &decl) else {
            continue;
        };
        if primary.as_ref() != Some(&decl) {
            continue;
        }
        // non-owning edges, only when they point somewhere else
        let canonical = cursor
            .canonical()
            .and_then(|c| c.declaration())
            .filter(|c| c.location != decl.location)
            .and_then(|c| node_for_declaration(forest, tu, &c));
        let definition = cursor
            .definition()
            .and_then(|c| c.declaration())
            .filter(|d| d.location != decl.location)
            .and_then(|d| node_for_declaration(forest, tu, &d));
        let overridden: Vec<NodeId> = cursor
            .overridden()
            .iter()
            .filter_map(|c| c.declaration())
            .filter_map(|d| node_for_declaration(forest, tu, &d))
            .collect();
        if let Some(node) = forest.get_mut(id) {
            node.refs.canonical = canonical;
            node.refs.definition = definition;
            node.refs.overridden = overridden;
        }
    }
}

fn add_reference(
    forest: &mut SymbolForest,
    tu: &TranslationUnit,
    cursor: &Cursor<'_>,
    location: Location,
) {
    let Some(target) = cursor.referenced().and_then(|c| c.declaration()) else {
        return;
    };
    if target.location == location {
        // the name token of a declaration refers to itself
        return;
    }
    let target_id = node_for_declaration(forest, tu, &target);
    let parent = cursor
        .semantic_parent()
        .and_then(|p| p.declaration())
        .and_then(|d| node_for_declaration(forest, tu, &d))
        .unwrap_or(NodeId::ROOT);
    let spelling = cursor.spelling();
    let id = forest.insert_child(parent, SymbolKind::REFERENCE, &spelling, location);
    if let Some(node) = forest.get_mut(id) {
        node.refs.referenced = target_id;
    }
}
