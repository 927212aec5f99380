//! Command-level tests against the daemon dispatch, driving the same
//! pipeline the socket server uses.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::tempdir;

use cxref::daemon::{Daemon, Request, Response};

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    fs::canonicalize(&path).unwrap()
}

/// Indexing is asynchronous; re-issue the probe until its reply satisfies
/// the predicate.
fn retry<F>(daemon: &mut Daemon, probe: Request, mut accept: F) -> Response
where
    F: FnMut(&Response) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let response = daemon.run_command(&probe);
        if accept(&response) {
            return response;
        }
        if Instant::now() > deadline {
            panic!("timed out; last reply: {}", response.result);
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn add_then_lookup_finds_the_definition() {
    let dir = tempdir().unwrap();
    let source = write(dir.path(), "a.cpp", "int foo() { return 0; }\n");
    let mut daemon = Daemon::new(dir.path());

    let reply = daemon.run_command(
        &Request::new("add").with_arg("file", source.to_string_lossy()),
    );
    assert_eq!(reply.result, "File added");

    let files = retry(&mut daemon, Request::new("files"), |r| {
        !r.result.is_empty()
    });
    assert!(files.result.contains("a.cpp"));

    let lookup = retry(
        &mut daemon,
        Request::new("lookup")
            .with_arg("types", "MethodDefinition")
            .with_free("foo"),
        |r| !r.result.is_empty(),
    );
    let lines: Vec<&str> = lookup.result.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("MethodDefinition foo"));
    assert!(lines[0].ends_with(":1:5\""), "line: {}", lines[0]);
}

#[test]
fn lookupline_resolves_to_the_declaration() {
    let dir = tempdir().unwrap();
    let source = write(dir.path(), "b.cpp", "int foo() { return 0; }\nint x = foo();\n");
    let mut daemon = Daemon::new(dir.path());
    daemon.run_command(&Request::new("add").with_arg("file", source.to_string_lossy()));

    // wait until the unit lands in the cache
    let probe = Request::new("lookupline")
        .with_arg("file", source.to_string_lossy())
        .with_arg("line", "2")
        .with_arg("column", "9");
    let reply = retry(&mut daemon, probe, |r| {
        r.result != "Translation unit not found"
    });
    assert_eq!(
        reply.result,
        format!("Symbol (decl) at {}, line 1 column 5", source.display())
    );
}

#[test]
fn lookupline_on_a_method_goes_to_the_canonical_declaration() {
    let dir = tempdir().unwrap();
    let source = write(
        dir.path(),
        "h.cpp",
        "int twice();\nint twice() { return 2; }\nint y = twice();\n",
    );
    let mut daemon = Daemon::new(dir.path());
    daemon.run_command(&Request::new("add").with_arg("file", source.to_string_lossy()));

    // a call site on a function resolves to the first declaration, not the
    // definition
    let probe = Request::new("lookupline")
        .with_arg("file", source.to_string_lossy())
        .with_arg("line", "3")
        .with_arg("column", "9");
    let reply = retry(&mut daemon, probe, |r| {
        r.result != "Translation unit not found"
    });
    assert_eq!(
        reply.result,
        format!("Symbol (decl) at {}, line 1 column 5", source.display())
    );

    // the definition's own name token also lands on the prototype
    let probe = Request::new("lookupline")
        .with_arg("file", source.to_string_lossy())
        .with_arg("line", "2")
        .with_arg("column", "5");
    let reply = retry(&mut daemon, probe, |r| {
        r.result != "Translation unit not found"
    });
    assert_eq!(
        reply.result,
        format!("Symbol (decl) at {}, line 1 column 5", source.display())
    );
}

#[test]
fn remove_clears_both_the_cache_and_the_index() {
    let dir = tempdir().unwrap();
    let source = write(dir.path(), "c.cpp", "int gone() { return 0; }\n");
    let mut daemon = Daemon::new(dir.path());
    daemon.run_command(&Request::new("add").with_arg("file", source.to_string_lossy()));
    retry(&mut daemon, Request::new("files"), |r| !r.result.is_empty());

    // the cache fills when the unit flows back; wait through lookupline
    retry(
        &mut daemon,
        Request::new("lookupline")
            .with_arg("file", source.to_string_lossy())
            .with_arg("line", "1")
            .with_arg("column", "5"),
        |r| r.result != "Translation unit not found",
    );

    let reply = daemon.run_command(&Request::new("remove").with_free("c.cpp"));
    assert!(reply.result.starts_with("Removed"));
    assert!(reply.result.contains("c.cpp"));

    retry(&mut daemon, Request::new("files"), |r| r.result.is_empty());
    let reply = daemon.run_command(
        &Request::new("lookupline")
            .with_arg("file", source.to_string_lossy())
            .with_arg("line", "1")
            .with_arg("column", "5"),
    );
    assert_eq!(reply.result, "Translation unit not found");
}

#[test]
fn checkincludes_flags_unused_and_missing() {
    let dir = tempdir().unwrap();
    write(dir.path(), "useful.h", "int helper();\n");
    write(dir.path(), "useless.h", "int never_used();\n");
    let source = write(
        dir.path(),
        "d.cpp",
        "#include \"useful.h\"\n#include \"useless.h\"\nint main() { return helper(); }\n",
    );
    let mut daemon = Daemon::new(dir.path());

    let reply = daemon.run_command(
        &Request::new("checkincludes").with_arg("file", source.to_string_lossy()),
    );
    assert!(reply.result.contains("useless.h for no reason"));
    assert!(!reply.result.contains("useful.h for no reason"));
}

#[test]
fn dumpast_reports_cursors() {
    let dir = tempdir().unwrap();
    let source = write(dir.path(), "e.cpp", "int alpha() { return 0; }\n");
    let mut daemon = Daemon::new(dir.path());

    let reply = daemon.run_command(
        &Request::new("dumpast").with_arg("file", source.to_string_lossy()),
    );
    assert!(reply.result.starts_with("Indexed:"));
    assert!(reply.result.contains("FunctionDef alpha()"));
}

#[test]
fn load_installs_a_sentinel_and_restores_the_unit() {
    let dir = tempdir().unwrap();
    let source = write(dir.path(), "f.cpp", "int saved() { return 3; }\n");
    let mut daemon = Daemon::new(dir.path());
    daemon.run_command(&Request::new("add").with_arg("file", source.to_string_lossy()));
    retry(
        &mut daemon,
        Request::new("lookupline")
            .with_arg("file", source.to_string_lossy())
            .with_arg("line", "1")
            .with_arg("column", "5"),
        |r| r.result != "Translation unit not found",
    );

    let reply = daemon.run_command(&Request::new("load").with_free(source.to_string_lossy()));
    assert_eq!(reply.result, "Loading");

    // the loaded unit replaces the sentinel and answers queries again
    retry(
        &mut daemon,
        Request::new("lookupline")
            .with_arg("file", source.to_string_lossy())
            .with_arg("line", "1")
            .with_arg("column", "5"),
        |r| r.result.starts_with("Symbol (decl)"),
    );
}

#[test]
fn quit_replies_before_shutdown() {
    let dir = tempdir().unwrap();
    let source = write(dir.path(), "g.cpp", "int last() { return 0; }\n");
    let mut daemon = Daemon::new(dir.path());
    daemon.run_command(&Request::new("add").with_arg("file", source.to_string_lossy()));

    let reply = daemon.run_command(&Request::new("quit"));
    assert_eq!(reply.result, "quitting");
    assert!(daemon.shutdown_requested());
}
