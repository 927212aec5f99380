//! The parsing front-end facade.
//!
//! Everything the indexer needs from the C/C++ parser goes through this
//! module: parsing a source file (and its includes) into a
//! [`TranslationUnit`], walking cursors, resolving references, and saving
//! units to disk. No tree-sitter vocabulary escapes from here; the rest of
//! the crate sees cursors, kinds, and locations only.

mod cursor;
mod unit;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use cursor::{visit_children, Cursor};
pub use unit::{SourceFile, TranslationUnit};

use crate::error::Result;

/// A source file plus the ordered compiler arguments it is parsed with.
/// An empty argument list means "front-end defaults".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    pub args: Vec<String>,
}

impl CompileCommand {
    pub fn new(args: Vec<String>) -> Self {
        CompileCommand { args }
    }

    /// Include search directories from `-I<dir>` / `-I <dir>` arguments,
    /// in the order given.
    pub fn include_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let mut iter = self.args.iter().peekable();
        while let Some(arg) = iter.next() {
            if let Some(rest) = arg.strip_prefix("-I") {
                if rest.is_empty() {
                    if let Some(dir) = iter.next() {
                        dirs.push(PathBuf::from(dir));
                    }
                } else {
                    dirs.push(PathBuf::from(rest));
                }
            }
        }
        dirs
    }

    /// Preprocessor definitions from `-D` arguments.
    pub fn defines(&self) -> Vec<String> {
        self.args
            .iter()
            .filter_map(|a| a.strip_prefix("-D"))
            .filter(|d| !d.is_empty())
            .map(|d| d.to_string())
            .collect()
    }
}

/// Parse-time options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Report inclusion-directive cursors during visits. Required by the
    /// include auditor.
    pub detailed_preprocessing_record: bool,
    /// Resolve `#include` targets and parse them transitively into the unit.
    pub follow_includes: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            detailed_preprocessing_record: false,
            follow_includes: true,
        }
    }
}

impl ParseOptions {
    /// Options for an include-audit parse.
    pub fn for_audit() -> Self {
        ParseOptions {
            detailed_preprocessing_record: true,
            follow_includes: true,
        }
    }
}

/// What the depth-first child visitor should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Skip this cursor's children, keep visiting siblings.
    Continue,
    /// Descend into this cursor's children.
    Recurse,
    /// Abort the entire walk.
    Break,
}

/// Cursor classification, independent of the underlying grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorKind {
    /// The root of a parsed file.
    TranslationUnit,
    /// A function or method prototype.
    FunctionDecl,
    /// A function or method definition (has a body).
    FunctionDef,
    Class,
    Struct,
    Namespace,
    VarDecl,
    EnumDecl,
    EnumConstant,
    /// A `#include` directive. Only reported when the unit was parsed with
    /// a detailed preprocessing record.
    InclusionDirective,
    /// An identifier-like cursor that may resolve to a declaration.
    Reference,
    /// Anything the indexer has no use for.
    Other,
}

impl CursorKind {
    pub fn is_declaration(self) -> bool {
        matches!(
            self,
            CursorKind::FunctionDecl
                | CursorKind::FunctionDef
                | CursorKind::Class
                | CursorKind::Struct
                | CursorKind::Namespace
                | CursorKind::VarDecl
                | CursorKind::EnumDecl
                | CursorKind::EnumConstant
        )
    }

    pub fn spelling(self) -> &'static str {
        match self {
            CursorKind::TranslationUnit => "TranslationUnit",
            CursorKind::FunctionDecl => "FunctionDecl",
            CursorKind::FunctionDef => "FunctionDef",
            CursorKind::Class => "Class",
            CursorKind::Struct => "Struct",
            CursorKind::Namespace => "Namespace",
            CursorKind::VarDecl => "VarDecl",
            CursorKind::EnumDecl => "EnumDecl",
            CursorKind::EnumConstant => "EnumConstant",
            CursorKind::InclusionDirective => "InclusionDirective",
            CursorKind::Reference => "Reference",
            CursorKind::Other => "Other",
        }
    }
}

/// A declaration as a plain value, detached from any cursor lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: CursorKind,
    pub name: String,
    pub qualified: String,
    pub location: crate::location::Location,
    pub container: Option<String>,
    pub is_definition: bool,
}

/// Parse `path` with the given arguments into a translation unit.
pub fn parse(path: &Path, args: &CompileCommand, options: ParseOptions) -> Result<TranslationUnit> {
    TranslationUnit::parse(path, args, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_dirs_both_spellings() {
        let cmd = CompileCommand::new(vec![
            "-I/opt/inc".into(),
            "-I".into(),
            "/usr/local/proj".into(),
            "-DNDEBUG".into(),
        ]);
        assert_eq!(
            cmd.include_dirs(),
            vec![PathBuf::from("/opt/inc"), PathBuf::from("/usr/local/proj")]
        );
        assert_eq!(cmd.defines(), vec!["NDEBUG".to_string()]);
    }

    #[test]
    fn empty_command_is_defaults() {
        let cmd = CompileCommand::default();
        assert!(cmd.args.is_empty());
        assert!(cmd.include_dirs().is_empty());
    }
}
