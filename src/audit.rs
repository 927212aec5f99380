//! Include auditing: build a per-unit dependency graph while walking the
//! cursors, then decide which direct includes pull their weight and which
//! referenced files are not reachable through the include graph at all.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CxrefError, Result};
use crate::frontend::{visit_children, Cursor, CursorKind, TranslationUnit, Visit};
use crate::location::{self, FileId, Location};

/// Headers that exist only as splitting artifacts of the platform SDK;
/// never worth an explicit include.
const EXEMPT_PREFIXES: &[&str] = &["/usr/include/sys/_types/_", "/usr/include/_types/_"];

#[derive(Default)]
struct DependencyNode {
    includes: BTreeSet<FileId>,
    /// target file -> (referring location -> referenced location)
    references: BTreeMap<FileId, BTreeMap<Location, Location>>,
}

/// One audit run. The run owns its dependency nodes; they are released when
/// the auditor is dropped, on every exit path.
#[derive(Default)]
pub struct IncludeAuditor {
    deps: BTreeMap<FileId, DependencyNode>,
}

impl IncludeAuditor {
    pub fn new() -> Self {
        IncludeAuditor::default()
    }

    /// Route one visited cursor: inclusion directives become include edges,
    /// cursors referring outside their own file become reference edges.
    pub fn record(&mut self, location: Location, cursor: &Cursor<'_>) {
        if cursor.kind() == CursorKind::InclusionDirective {
            self.handle_include(location, cursor);
        } else if let Some(referenced) = cursor.referenced() {
            if referenced.location() != location {
                self.handle_reference(location, &referenced);
            }
        }
    }

    fn handle_include(&mut self, from: Location, cursor: &Cursor<'_>) {
        let Some(included) = cursor.included_file() else {
            return;
        };
        let target = location::intern(&included);
        self.deps.entry(from.file).or_default().includes.insert(target);
        self.deps.entry(target).or_default();
    }

    fn handle_reference(&mut self, from: Location, referenced: &Cursor<'_>) {
        if referenced.kind() == CursorKind::Namespace {
            return;
        }
        let target = referenced.location();
        if target.is_null() || target.file == from.file {
            return;
        }
        self.deps.entry(target.file).or_default();
        self.deps
            .entry(from.file)
            .or_default()
            .references
            .entry(target.file)
            .or_default()
            .insert(from, target);
    }

    /// Validate the graph and consume the run. For every non-system file:
    /// a directly included header nobody transitively needs is reported as
    /// useless; a referenced file not reachable through the include graph
    /// is reported as missing, with the recorded reference pairs as the
    /// reason list.
    pub fn report(self) -> Vec<String> {
        let mut out = Vec::new();
        for (&file, node) in &self.deps {
            let path = location::file_path(file);
            if location::is_system_path(&path) {
                continue;
            }

            for &header in &node.includes {
                let mut seen = HashSet::new();
                if !self.needs_include(node, header, &mut seen) {
                    out.push(format!(
                        "{} includes {} for no reason",
                        path.display(),
                        location::file_path(header).display()
                    ));
                }
            }

            for (&target, reasons) in &node.references {
                let target_path = location::file_path(target);
                if EXEMPT_PREFIXES
                    .iter()
                    .any(|prefix| target_path.starts_with(prefix))
                {
                    continue;
                }
                let mut seen = HashSet::new();
                if !self.reachable(file, target, &mut seen) {
                    let reasons: Vec<String> = reasons
                        .iter()
                        .map(|(from, to)| format!("{from} => {to}"))
                        .collect();
                    out.push(format!(
                        "{} should include {} ({})",
                        path.display(),
                        target_path.display(),
                        reasons.join(" ")
                    ));
                }
            }
        }
        out
    }

    /// Does anything transitively reachable from `header` satisfy one of
    /// `source`'s references? Seen-set bounded for cyclic include graphs.
    fn needs_include(
        &self,
        source: &DependencyNode,
        header: FileId,
        seen: &mut HashSet<FileId>,
    ) -> bool {
        if !seen.insert(header) {
            return false;
        }
        if source.references.contains_key(&header) {
            return true;
        }
        let Some(node) = self.deps.get(&header) else {
            return false;
        };
        node.includes
            .iter()
            .any(|&child| self.needs_include(source, child, seen))
    }

    /// Is `target` reachable from `from` through include edges?
    fn reachable(&self, from: FileId, target: FileId, seen: &mut HashSet<FileId>) -> bool {
        let Some(node) = self.deps.get(&from) else {
            return false;
        };
        if node.includes.contains(&target) {
            return true;
        }
        node.includes
            .iter()
            .any(|&child| seen.insert(child) && self.reachable(child, target, seen))
    }
}

/// Walk every file of a unit through an auditor and return the report.
/// The abort flag is polled at each node; aborting yields `Cancelled`.
pub fn audit_unit(tu: &TranslationUnit, aborted: &AtomicBool) -> Result<Vec<String>> {
    let mut auditor = IncludeAuditor::new();
    for &file in tu.file_ids() {
        let Some(root) = tu.file_cursor(file) else {
            continue;
        };
        let completed = visit_children(&root, &mut |cursor: &Cursor<'_>| {
            if aborted.load(Ordering::Relaxed) {
                return Visit::Break;
            }
            let location = cursor.location();
            if !location.is_null() {
                auditor.record(location, cursor);
            }
            Visit::Recurse
        });
        if !completed {
            return Err(CxrefError::Cancelled);
        }
    }
    Ok(auditor.report())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{parse, CompileCommand, ParseOptions};
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        fs::canonicalize(&path).unwrap()
    }

    fn audit(main: &Path) -> Vec<String> {
        let tu = parse(main, &CompileCommand::default(), ParseOptions::for_audit()).unwrap();
        audit_unit(&tu, &AtomicBool::new(false)).unwrap()
    }

    #[test]
    fn unused_include_is_reported() {
        let dir = tempdir().unwrap();
        write(dir.path(), "used.h", "int helper();\n");
        write(dir.path(), "unused.h", "int nobody_calls_this();\n");
        let main = write(
            dir.path(),
            "a.cpp",
            "#include \"used.h\"\n#include \"unused.h\"\nint main() { return helper(); }\n",
        );
        let report = audit(&main);
        assert_eq!(report.len(), 1, "report: {report:?}");
        assert!(report[0].contains("unused.h for no reason"));
    }

    #[test]
    fn directly_referenced_include_is_not_reported() {
        let dir = tempdir().unwrap();
        write(dir.path(), "used.h", "int helper();\n");
        let main = write(
            dir.path(),
            "b.cpp",
            "#include \"used.h\"\nint main() { return helper(); }\n",
        );
        assert!(audit(&main).is_empty());
    }

    #[test]
    fn transitively_needed_include_is_kept() {
        let dir = tempdir().unwrap();
        write(dir.path(), "deep.h", "int gadget();\n");
        write(dir.path(), "mid.h", "#include \"deep.h\"\n");
        let main = write(
            dir.path(),
            "c.cpp",
            "#include \"mid.h\"\nint main() { return gadget(); }\n",
        );
        // the source's include of mid.h earns its keep by pulling in
        // deep.h, and deep.h is reachable through it; only the shell
        // header's own edge gets flagged
        let report = audit(&main);
        assert!(
            report.iter().all(|l| !l.contains("c.cpp")),
            "report: {report:?}"
        );
        assert_eq!(report.len(), 1);
        assert!(report[0].contains("mid.h includes"));
    }

    #[test]
    fn missing_include_is_reported_with_reasons() {
        let dir = tempdir().unwrap();
        write(dir.path(), "x.h", "struct Gear { int teeth; };\n");
        write(dir.path(), "y.h", "Gear spare();\n");
        let main = write(dir.path(), "d.cpp", "#include \"x.h\"\n#include \"y.h\"\n");
        let report = audit(&main);
        let missing: Vec<&String> = report
            .iter()
            .filter(|line| line.contains("should include"))
            .collect();
        assert_eq!(missing.len(), 1, "report: {report:?}");
        assert!(missing[0].contains("y.h"));
        assert!(missing[0].contains("x.h"));
        assert!(missing[0].contains("=>"));
    }

    #[test]
    fn include_cycles_terminate() {
        let dir = tempdir().unwrap();
        write(dir.path(), "self.h", "#include \"self.h\"\nint s();\n");
        write(dir.path(), "m1.h", "#include \"m2.h\"\nint m1();\n");
        write(dir.path(), "m2.h", "#include \"m1.h\"\nint m2();\n");
        let main = write(
            dir.path(),
            "e.cpp",
            "#include \"self.h\"\n#include \"m1.h\"\nint main() { return s() + m1() + m2(); }\n",
        );
        // must terminate on the self-loop and the mutual pair; the source
        // file references every header it includes, so it stays clean
        let report = audit(&main);
        assert!(
            report.iter().all(|l| !l.contains("e.cpp")),
            "report: {report:?}"
        );
    }

    #[test]
    fn abort_cancels_the_walk() {
        let dir = tempdir().unwrap();
        let main = write(dir.path(), "f.cpp", "int f() { return 0; }\n");
        let tu = parse(&main, &CompileCommand::default(), ParseOptions::for_audit()).unwrap();
        let err = audit_unit(&tu, &AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, CxrefError::Cancelled));
    }
}
