//! One-shot inspection worker.
//!
//! Some queries want a fresh walk over a unit rather than the shared index:
//! dumping the AST line by line, or auditing the include graph. Each such
//! query gets its own short-lived thread that owns its unit, streams result
//! lines through a channel, and honors the caller's abort flag at every
//! node.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::audit;
use crate::frontend::{self, visit_children, CompileCommand, Cursor, ParseOptions, Visit};

#[derive(Debug, Clone)]
pub enum InspectKind {
    /// One line per cursor: location, extent columns, depth, kind, display
    /// name, and the referenced/canonical cursors when they differ.
    DumpAst { include_headers: bool },
    /// Build the dependency graph and report unneeded/missing includes.
    CheckIncludes,
}

#[derive(Debug, Clone)]
pub struct InspectJob {
    pub path: PathBuf,
    pub args: CompileCommand,
    pub kind: InspectKind,
}

/// Run the job on its own thread. Lines arrive on the returned channel; the
/// channel closes when the walk finishes, fails, or is aborted.
pub fn spawn(job: InspectJob, aborted: Arc<AtomicBool>) -> Receiver<String> {
    let (lines_tx, lines_rx) = unbounded();
    let _ = thread::Builder::new()
        .name("cxref-inspect".into())
        .spawn(move || run(job, lines_tx, aborted));
    lines_rx
}

fn run(job: InspectJob, lines: Sender<String>, aborted: Arc<AtomicBool>) {
    let options = match job.kind {
        InspectKind::DumpAst { .. } => ParseOptions::default(),
        InspectKind::CheckIncludes => ParseOptions::for_audit(),
    };
    let unit = match frontend::parse(&job.path, &job.args, options) {
        Ok(unit) => unit,
        Err(err) => {
            debug!(file = %job.path.display(), error = %err, "inspection parse failed");
            let _ = lines.send(format!("Indexed: {} => failure", job.path.display()));
            return;
        }
    };

    match job.kind {
        InspectKind::DumpAst { include_headers } => {
            let _ = lines.send(format!("Indexed: {} => success", job.path.display()));
            let files: Vec<_> = if include_headers {
                unit.file_ids().to_vec()
            } else {
                vec![unit.root_file()]
            };
            for file in files {
                let Some(root) = unit.file_cursor(file) else {
                    continue;
                };
                if !dump(&root, 0, &lines, &aborted) {
                    return;
                }
            }
        }
        InspectKind::CheckIncludes => match audit::audit_unit(&unit, &aborted) {
            Ok(report) => {
                for line in report {
                    if lines.send(line).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                debug!(file = %job.path.display(), error = %err, "include audit aborted");
            }
        },
    }
}

fn dump(cursor: &Cursor<'_>, depth: usize, lines: &Sender<String>, aborted: &AtomicBool) -> bool {
    visit_children(cursor, &mut |child: &Cursor<'_>| {
        if aborted.load(Ordering::Relaxed) {
            return Visit::Break;
        }
        let location = child.location();
        if !location.is_null() && lines.send(render(child, depth)).is_err() {
            return Visit::Break;
        }
        if !dump(child, depth + 1, lines, aborted) {
            return Visit::Break;
        }
        Visit::Continue
    })
}

fn render(cursor: &Cursor<'_>, depth: usize) -> String {
    let location = cursor.location();
    let (start, end) = cursor.extent();
    let mut line = if end.line == location.line {
        format!(
            "{location} // {}-{}, {}: {}",
            start.column,
            end.column,
            depth,
            cursor.kind().spelling()
        )
    } else {
        format!(
            "{location} // {}-{}:{}, {}: {}",
            start.column,
            end.line,
            end.column,
            depth,
            cursor.kind().spelling()
        )
    };
    let display = cursor.display_name();
    if !display.is_empty() {
        line.push(' ');
        line.push_str(&display);
    }
    if let Some(referenced) = cursor.referenced() {
        if referenced.location() == location {
            line.push_str(" refs self");
        } else {
            line.push_str(&format!(" refs {}", referenced.location()));
        }
    }
    if let Some(canonical) = cursor.canonical() {
        if canonical.location() != location {
            line.push_str(&format!(" canonical {}", canonical.location()));
        }
    }
    if let Some(specialized) = cursor.specialized_template() {
        if specialized.location() != location {
            line.push_str(&format!(" specialized {}", specialized.location()));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        fs::canonicalize(&path).unwrap()
    }

    fn collect(lines: Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = lines.recv_timeout(Duration::from_secs(10)) {
            out.push(line);
        }
        out
    }

    #[test]
    fn dump_renders_kinds_and_references() {
        let dir = tempdir().unwrap();
        let source = write(
            dir.path(),
            "a.cpp",
            "int foo() { return 0; }\nint bar() { return foo(); }\n",
        );
        let lines = collect(spawn(
            InspectJob {
                path: source,
                args: CompileCommand::default(),
                kind: InspectKind::DumpAst {
                    include_headers: false,
                },
            },
            Arc::new(AtomicBool::new(false)),
        ));
        assert!(lines[0].starts_with("Indexed:"));
        assert!(lines[0].ends_with("success"));
        assert!(lines.iter().any(|l| l.contains("FunctionDef foo()")));
        assert!(
            lines
                .iter()
                .any(|l| l.contains("Reference foo") && l.contains("refs ")),
            "lines: {lines:#?}"
        );
    }

    #[test]
    fn dump_with_headers_covers_included_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "h.h", "int from_header();\n");
        let source = write(dir.path(), "b.cpp", "#include \"h.h\"\n");
        let job = |include_headers| InspectJob {
            path: source.clone(),
            args: CompileCommand::default(),
            kind: InspectKind::DumpAst { include_headers },
        };
        let without = collect(spawn(job(false), Arc::new(AtomicBool::new(false))));
        let with = collect(spawn(job(true), Arc::new(AtomicBool::new(false))));
        assert!(!without.iter().any(|l| l.contains("from_header")));
        assert!(with.iter().any(|l| l.contains("from_header")));
    }

    #[test]
    fn check_includes_streams_the_report() {
        let dir = tempdir().unwrap();
        write(dir.path(), "unused.h", "int unused();\n");
        let source = write(dir.path(), "c.cpp", "#include \"unused.h\"\nint main() { return 0; }\n");
        let lines = collect(spawn(
            InspectJob {
                path: source,
                args: CompileCommand::default(),
                kind: InspectKind::CheckIncludes,
            },
            Arc::new(AtomicBool::new(false)),
        ));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("for no reason"));
    }

    #[test]
    fn missing_file_reports_failure() {
        let lines = collect(spawn(
            InspectJob {
                path: PathBuf::from("/no/such/file.cpp"),
                args: CompileCommand::default(),
                kind: InspectKind::DumpAst {
                    include_headers: false,
                },
            },
            Arc::new(AtomicBool::new(false)),
        ));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("failure"));
    }

    #[test]
    fn abort_stops_the_stream() {
        let dir = tempdir().unwrap();
        let source = write(dir.path(), "d.cpp", "int d() { return 0; }\n");
        let aborted = Arc::new(AtomicBool::new(true));
        let lines = collect(spawn(
            InspectJob {
                path: source,
                args: CompileCommand::default(),
                kind: InspectKind::DumpAst {
                    include_headers: false,
                },
            },
            aborted,
        ));
        // only the banner makes it out before the first node poll
        assert!(lines.len() <= 1, "lines: {lines:?}");
    }
}
