//! Compiled-command listing ingestion.
//!
//! The input is a line-oriented listing of compiler invocations (the output
//! of a verbose build, typically). Each recognized invocation yields a
//! source path plus the compiler arguments worth keeping for a reparse;
//! everything else is skipped with a warning.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::frontend::CompileCommand;

/// One parse job produced from a listing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedJob {
    pub source: PathBuf,
    pub command: CompileCommand,
}

const COMPILERS: &[&str] = &["cc", "c++", "gcc", "g++", "clang", "clang++"];

fn is_compiler(token: &str) -> bool {
    let base = Path::new(token)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(token);
    COMPILERS.iter().any(|c| {
        base == *c
            || base
                .strip_prefix(c)
                .is_some_and(|rest| rest.starts_with('-') && rest[1..].chars().all(|ch| ch.is_ascii_digit()))
    })
}

/// Parse a listing into jobs. Relative paths in the listing (the source and
/// `-I` directories) are resolved against the listing's own directory.
pub fn ingest(listing: &Path) -> Result<Vec<IngestedJob>> {
    let text = fs::read_to_string(listing)?;
    let base = listing.parent().unwrap_or_else(|| Path::new("."));
    let mut jobs = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_invocation(trimmed, base) {
            Some(job) => {
                debug!(source = %job.source.display(), line = number + 1, "ingested compile command");
                jobs.push(job);
            }
            None => {
                warn!(line = number + 1, text = trimmed, "skipping unrecognized listing line");
            }
        }
    }
    Ok(jobs)
}

/// Recognize one compiler invocation: the executable, its flags, and the
/// last positional non-flag argument as the source path.
fn parse_invocation(line: &str, base: &Path) -> Option<IngestedJob> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let start = tokens.iter().position(|t| is_compiler(t))?;

    let mut args: Vec<String> = Vec::new();
    let mut source: Option<&str> = None;
    let mut iter = tokens[start + 1..].iter().peekable();
    while let Some(&token) = iter.next() {
        match token {
            "-c" => {}
            "-o" => {
                iter.next();
            }
            "-I" => {
                if let Some(&dir) = iter.next() {
                    args.push(format!("-I{}", absolutize(dir, base).display()));
                }
            }
            _ if token.starts_with("-I") => {
                let dir = &token[2..];
                args.push(format!("-I{}", absolutize(dir, base).display()));
            }
            _ if token.starts_with('-') => args.push(token.to_string()),
            _ => source = Some(token),
        }
    }

    let source = source?;
    let resolved = match fs::canonicalize(absolutize(source, base)) {
        Ok(path) => path,
        Err(_) => {
            warn!(source, "listing names a source that does not exist");
            return None;
        }
    };
    Some(IngestedJob {
        source: resolved,
        command: CompileCommand::new(args),
    })
}

fn absolutize(path: &str, base: &Path) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
