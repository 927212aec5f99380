//! # cxref
//!
//! A persistent background indexer for C/C++ source trees.
//!
//! A daemon owns two long-lived workers: a parse worker that turns source
//! files plus compiler flags into translation units, and a visit worker
//! that walks each unit into a cross-reference forest. Clients send short
//! commands over a Unix socket and get back a single result string:
//! jump-to-declaration, file listings, symbol lookups, AST dumps, and
//! include-graph audits.
//!
//! ## Pipeline
//!
//! ```text
//! add/makefile ──▶ ParseWorker ──parsed/invalidated──▶ VisitWorker
//!                      │                                   │
//!                      └── saved units (.cxref/ast)         ├── symbol forest
//!                                                          └──▶ unit cache (daemon)
//! ```
//!
//! Events flow FIFO: a reparse of a path is always preceded by its
//! invalidation, so consumers pass through an "empty for P" state between
//! parses. Units are owned by exactly one place at a time: the parse queue,
//! the visit walk, then the daemon's cache.

pub mod audit;
pub mod daemon;
pub mod error;
pub mod frontend;
pub mod inspect;
pub mod location;
pub mod makefile;
pub mod parse_worker;
pub mod symbols;
pub mod visit_worker;
pub mod watcher;

pub use error::{CxrefError, Result};
pub use frontend::{CompileCommand, CursorKind, ParseOptions, TranslationUnit};
pub use location::{FileId, Location};
pub use parse_worker::{ParseEvent, ParseWorker};
pub use symbols::{SymbolForest, SymbolKind};
pub use visit_worker::{LookupFlags, LookupHit, VisitWorker};

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        fs::canonicalize(&path).unwrap()
    }

    /// Poll until the worker pair reports the condition, or fail loudly.
    fn wait_until<F: FnMut() -> bool>(what: &str, mut condition: F) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while Instant::now() < deadline {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn full_pipeline_parses_and_indexes() {
        let dir = tempdir().unwrap();
        let source = write(dir.path(), "a.cpp", "int foo() { return 0; }\n");

        let (parse, events) = ParseWorker::spawn(None);
        let (visit, units) = VisitWorker::spawn(events);

        parse.add_file(source.clone(), CompileCommand::default());
        wait_until("file indexed", || {
            visit.files().unwrap().contains(&source)
        });

        let hits = visit
            .lookup(
                &["foo".to_string()],
                LookupFlags::empty(),
                SymbolKind::METHOD_DEFINITION,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].location.column, 5);

        // the unit ends up on the cache side of the sink
        let (path, unit) = units.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(path, source);
        assert!(unit.is_some());
    }

    #[test]
    fn headers_resolve_across_the_unit() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "engine.h",
            "namespace app {\nclass Engine {\npublic:\n  void run();\n};\n}\n",
        );
        let source = write(
            dir.path(),
            "engine.cpp",
            "#include \"engine.h\"\nnamespace app {\nvoid Engine::run() {}\n}\n",
        );

        let (parse, events) = ParseWorker::spawn(None);
        let (visit, _units) = VisitWorker::spawn(events);
        parse.add_file(source.clone(), CompileCommand::default());
        wait_until("file indexed", || {
            visit.files().unwrap().contains(&source)
        });

        let hits = visit
            .lookup(
                &["Engine.run".to_string()],
                LookupFlags::empty(),
                SymbolKind::METHOD_DEFINITION,
            )
            .unwrap();
        assert_eq!(hits.len(), 1, "hits: {hits:?}");
        assert_eq!(hits[0].qualified, "app.Engine.run");
    }

    #[test]
    fn idempotent_add_keeps_the_forest_identical() {
        let dir = tempdir().unwrap();
        let source = write(
            dir.path(),
            "twice.cpp",
            "struct Gadget { int id; };\nint count() { return 0; }\n",
        );

        let (parse, events) = ParseWorker::spawn(None);
        let (visit, _units) = VisitWorker::spawn(events);

        parse.add_file(source.clone(), CompileCommand::default());
        wait_until("first parse", || visit.files().unwrap().contains(&source));
        let first = visit
            .lookup(&[], LookupFlags::empty(), SymbolKind::all() & !SymbolKind::ROOT)
            .unwrap();
        assert!(!first.is_empty());

        parse.add_file(source.clone(), CompileCommand::default());
        wait_until("second parse", || {
            visit
                .lookup(&[], LookupFlags::empty(), SymbolKind::all() & !SymbolKind::ROOT)
                .unwrap()
                == first
        });
    }

    #[test]
    fn makefile_ingestion_respects_filters() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.cpp", "int a() { return 0; }\n");
        write(dir.path(), "b.cpp", "int b() { return 0; }\n");
        write(dir.path(), "test_c.cpp", "int c() { return 0; }\n");
        let listing = dir.path().join("build.log");
        fs::write(
            &listing,
            "g++ -c a.cpp\ng++ -c b.cpp\ng++ -c test_c.cpp\n",
        )
        .unwrap();

        let (parse, events) = ParseWorker::spawn(None);
        let (visit, _units) = VisitWorker::spawn(events);
        parse.add_makefile(
            listing,
            Some(regex::Regex::new(r"\.cpp$").unwrap()),
            Some(regex::Regex::new("test_").unwrap()),
        );

        wait_until("two files indexed", || visit.files().unwrap().len() == 2);
        let files = visit.files().unwrap();
        assert!(files.iter().any(|f| f.ends_with("a.cpp")));
        assert!(files.iter().any(|f| f.ends_with("b.cpp")));
        assert!(!files.iter().any(|f| f.ends_with("test_c.cpp")));
    }

    #[test]
    fn abort_stops_cleanly_mid_queue() {
        let dir = tempdir().unwrap();
        let (mut parse, events) = ParseWorker::spawn(None);
        let (visit, _units) = VisitWorker::spawn(events);
        for i in 0..20 {
            let source = write(dir.path(), &format!("f{i}.cpp"), "int f() { return 0; }\n");
            parse.add_file(source, CompileCommand::default());
        }
        parse.abort();
        parse.join();
        // whatever made it through is fine; the worker exited cleanly and
        // the visit side stays consistent
        let files = visit.files().unwrap();
        assert!(files.len() <= 20);
    }
}
