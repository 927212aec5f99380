//! Paths, file ids, and source locations.
//!
//! File paths are interned into a process-wide table so a location fits in
//! 64 bits: a `u32` file id plus line and column. The table is append-only
//! for the life of the process and guarded by a single mutex.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{CxrefError, Result};

/// Interned file identifier. Id 0 is reserved for "no file".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FileId(pub u32);

impl FileId {
    pub const NONE: FileId = FileId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

struct FileTable {
    by_path: HashMap<PathBuf, FileId>,
    paths: Vec<PathBuf>,
}

static FILES: Lazy<Mutex<FileTable>> = Lazy::new(|| {
    Mutex::new(FileTable {
        by_path: HashMap::new(),
        // slot 0 is the "no file" sentinel
        paths: vec![PathBuf::new()],
    })
});

/// Intern a path, returning its stable id. The same path always returns the
/// same id for the life of the process.
pub fn intern(path: &Path) -> FileId {
    let mut table = FILES.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(&id) = table.by_path.get(path) {
        return id;
    }
    let id = FileId(table.paths.len() as u32);
    table.paths.push(path.to_path_buf());
    table.by_path.insert(path.to_path_buf(), id);
    id
}

/// Look up the path for an interned id. `FileId::NONE` and unknown ids
/// return an empty path.
pub fn file_path(id: FileId) -> PathBuf {
    let table = FILES.lock().unwrap_or_else(|e| e.into_inner());
    table.paths.get(id.0 as usize).cloned().unwrap_or_default()
}

/// Canonicalize a path, mapping failure to `ResolutionFailure`.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|_| CxrefError::ResolutionFailure(path.to_path_buf()))
}

/// True if the path is already in canonical absolute form.
pub fn is_resolved(path: &Path) -> bool {
    match std::fs::canonicalize(path) {
        Ok(canonical) => canonical.as_path() == path,
        Err(_) => false,
    }
}

/// True for headers owned by the toolchain or the OS rather than the project.
pub fn is_system_path(path: &Path) -> bool {
    path.starts_with("/usr/include")
        || path.starts_with("/usr/local/include")
        || path.starts_with("/usr/lib")
        || path.starts_with("/System/Library")
}

/// A point in a source file. Null iff line or column is zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Location {
    pub file: FileId,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub const NULL: Location = Location {
        file: FileId::NONE,
        line: 0,
        column: 0,
    };

    pub fn new(file: FileId, line: u32, column: u32) -> Self {
        Location { file, line, column }
    }

    pub fn is_null(self) -> bool {
        self.line == 0 || self.column == 0
    }

    pub fn path(self) -> PathBuf {
        file_path(self.file)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "<null>")
        } else {
            write!(f, "{}:{}:{}", self.path().display(), self.line, self.column)
        }
    }
}
