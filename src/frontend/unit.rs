//! Translation units: a root source file plus every header transitively
//! resolved from it, each with its own syntax tree, the include edges
//! between them, and a declaration index used for reference resolution.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tree_sitter::{Language, Node, Parser, Point, Tree};

use crate::error::{CxrefError, Result};
use crate::location::{intern, FileId, Location};

use super::cursor::Cursor;
use super::{CompileCommand, CursorKind, Declaration, ParseOptions};

/// Directories searched for `<...>` includes after `-I` dirs.
const SYSTEM_INCLUDE_DIRS: &[&str] = &["/usr/local/include", "/usr/include"];

/// One parsed file of a unit.
#[derive(Debug)]
pub struct SourceFile {
    pub id: FileId,
    pub path: PathBuf,
    pub text: String,
    pub(crate) tree: Tree,
}

/// A resolved (or unresolved) `#include` directive.
#[derive(Debug, Clone)]
pub(crate) struct IncludeEdge {
    pub from: FileId,
    pub location: Location,
    pub spelling: String,
    pub target: Option<FileId>,
}

/// One declaration found while indexing the unit.
#[derive(Debug, Clone)]
pub(crate) struct DeclEntry {
    pub name: String,
    pub qualified: String,
    pub kind: CursorKind,
    pub location: Location,
    pub extent_start: Location,
    pub extent_end: Location,
    pub file: FileId,
    pub is_definition: bool,
    pub container: Option<String>,
    pub display: String,
}

#[derive(Default, Debug)]
pub(crate) struct DeclIndex {
    pub entries: Vec<DeclEntry>,
    by_qualified: HashMap<String, Vec<usize>>,
    by_name: HashMap<String, Vec<usize>>,
    by_location: HashMap<Location, usize>,
    by_extent_start: HashMap<Location, Vec<usize>>,
    /// Qualified class name -> spelled base class names.
    bases: HashMap<String, Vec<String>>,
}

/// Declarations of the same symbol may differ in kind (prototype vs
/// definition); class them together for canonical/definition resolution.
fn kind_class(kind: CursorKind) -> u8 {
    match kind {
        CursorKind::FunctionDecl | CursorKind::FunctionDef => 1,
        CursorKind::Class | CursorKind::Struct => 2,
        CursorKind::Namespace => 3,
        CursorKind::VarDecl => 4,
        CursorKind::EnumDecl => 5,
        CursorKind::EnumConstant => 6,
        _ => 0,
    }
}

impl DeclIndex {
    fn push(&mut self, entry: DeclEntry) {
        let idx = self.entries.len();
        self.by_qualified
            .entry(entry.qualified.clone())
            .or_default()
            .push(idx);
        self.by_name.entry(entry.name.clone()).or_default().push(idx);
        self.by_location.entry(entry.location).or_insert(idx);
        self.by_extent_start
            .entry(entry.extent_start)
            .or_default()
            .push(idx);
        self.entries.push(entry);
    }

    pub fn at_location(&self, location: Location) -> Option<usize> {
        self.by_location.get(&location).copied()
    }

    /// Every declaration whose extent starts at `location` (a declaration
    /// statement can declare several symbols).
    pub fn at_extent_start(&self, location: Location) -> &[usize] {
        self.by_extent_start
            .get(&location)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn base_classes(&self, qualified: &str) -> &[String] {
        self.bases
            .get(qualified)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolve an identifier spelling to a declaration. Exact qualified
    /// match first, then the unqualified name preferring the referring
    /// file, then the first match in file order.
    pub fn resolve(&self, spelling: &str, from: FileId) -> Option<usize> {
        let text = spelling.trim().trim_start_matches("::");
        if text.contains("::") {
            if let Some(hits) = self.by_qualified.get(text) {
                return hits.first().copied();
            }
        }
        let name = text.rsplit("::").next()?;
        let hits = self.by_name.get(name)?;
        hits.iter()
            .copied()
            .find(|&i| self.entries[i].file == from)
            .or_else(|| hits.first().copied())
    }

    /// First declaration of the same symbol, in unit order.
    pub fn canonical(&self, idx: usize) -> usize {
        let entry = &self.entries[idx];
        self.by_qualified
            .get(&entry.qualified)
            .and_then(|hits| {
                hits.iter()
                    .copied()
                    .find(|&i| kind_class(self.entries[i].kind) == kind_class(entry.kind))
            })
            .unwrap_or(idx)
    }

    /// The defining declaration of the same symbol, if the unit has one.
    pub fn definition(&self, idx: usize) -> Option<usize> {
        let entry = &self.entries[idx];
        self.by_qualified.get(&entry.qualified).and_then(|hits| {
            hits.iter().copied().find(|&i| {
                self.entries[i].is_definition
                    && kind_class(self.entries[i].kind) == kind_class(entry.kind)
            })
        })
    }
}

impl From<&DeclEntry> for Declaration {
    fn from(entry: &DeclEntry) -> Self {
        Declaration {
            kind: entry.kind,
            name: entry.name.clone(),
            qualified: entry.qualified.clone(),
            location: entry.location,
            container: entry.container.clone(),
            is_definition: entry.is_definition,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SavedUnit {
    root: PathBuf,
    args: CompileCommand,
    options: ParseOptions,
    sources: Vec<(PathBuf, String)>,
}

/// A parsed unit. Owned exclusively; dropping it releases every tree.
#[derive(Debug)]
pub struct TranslationUnit {
    root: FileId,
    root_path: PathBuf,
    files: HashMap<FileId, SourceFile>,
    file_order: Vec<FileId>,
    includes: Vec<IncludeEdge>,
    pub(crate) decls: DeclIndex,
    args: CompileCommand,
    pub(crate) options: ParseOptions,
}

impl TranslationUnit {
    pub fn parse(path: &Path, args: &CompileCommand, options: ParseOptions) -> Result<Self> {
        Self::build(path, args, options, &HashMap::new())
    }

    /// Serialize the unit to `dest` (atomic: `.tmp` then rename). The
    /// artefact records the unit's sources and arguments; loading re-parses
    /// them, so a loaded unit is independent of the current disk state.
    pub fn save(&self, dest: &Path) -> Result<()> {
        let saved = SavedUnit {
            root: self.root_path.clone(),
            args: self.args.clone(),
            options: self.options,
            sources: self
                .file_order
                .iter()
                .map(|id| {
                    let f = &self.files[id];
                    (f.path.clone(), f.text.clone())
                })
                .collect(),
        };
        let bytes = bincode::serialize(&saved)
            .map_err(|e| CxrefError::Internal(format!("encode unit: {e}")))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = dest.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, dest)?;
        debug!(dest = %dest.display(), bytes = bytes.len(), "unit saved");
        Ok(())
    }

    /// Rebuild a unit from a previously saved artefact.
    pub fn load(artefact: &Path) -> Result<Self> {
        let bytes = fs::read(artefact)
            .map_err(|_| CxrefError::NotFound(format!("no saved unit at {}", artefact.display())))?;
        let saved: SavedUnit = bincode::deserialize(&bytes)
            .map_err(|e| CxrefError::Internal(format!("decode unit: {e}")))?;
        let sources: HashMap<PathBuf, String> = saved.sources.into_iter().collect();
        Self::build(&saved.root, &saved.args, saved.options, &sources)
    }

    fn build(
        root_path: &Path,
        args: &CompileCommand,
        options: ParseOptions,
        stored: &HashMap<PathBuf, String>,
    ) -> Result<Self> {
        let mut tu = TranslationUnit {
            root: intern(root_path),
            root_path: root_path.to_path_buf(),
            files: HashMap::new(),
            file_order: Vec::new(),
            includes: Vec::new(),
            decls: DeclIndex::default(),
            args: args.clone(),
            options,
        };

        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        queue.push_back(root_path.to_path_buf());
        let mut seen: HashSet<PathBuf> = HashSet::new();

        while let Some(path) = queue.pop_front() {
            if !seen.insert(path.clone()) {
                continue;
            }
            let is_root = path == *root_path;
            let text = match stored.get(&path) {
                Some(text) => text.clone(),
                None => match fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(err) if is_root => {
                        warn!(file = %path.display(), error = %err, "cannot read source");
                        return Err(CxrefError::ParseFailure(path));
                    }
                    Err(err) => {
                        debug!(file = %path.display(), error = %err, "skipping unreadable header");
                        continue;
                    }
                },
            };
            let tree = parse_source(&text)?;
            let id = intern(&path);
            let including_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

            let edges = scan_includes(tree.root_node(), &text, id, &including_dir, args, stored);
            if options.follow_includes {
                for edge in &edges {
                    if let Some(target) = edge.target {
                        queue.push_back(crate::location::file_path(target));
                    }
                }
            }
            tu.includes.extend(edges);
            tu.files.insert(
                id,
                SourceFile {
                    id,
                    path,
                    text,
                    tree,
                },
            );
            tu.file_order.push(id);
        }

        tu.index_decls();
        Ok(tu)
    }

    pub fn root_file(&self) -> FileId {
        self.root
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn args(&self) -> &CompileCommand {
        &self.args
    }

    pub fn file(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(&id)
    }

    /// Files of the unit, root first, in deterministic discovery order.
    pub fn file_ids(&self) -> &[FileId] {
        &self.file_order
    }

    pub(crate) fn include_edges(&self) -> &[IncludeEdge] {
        &self.includes
    }

    pub(crate) fn include_at(&self, location: Location) -> Option<&IncludeEdge> {
        self.includes
            .iter()
            .find(|edge| edge.from == location.file && edge.location == location)
    }

    /// Cursor for the root of the unit's own file.
    pub fn root_cursor(&self) -> Cursor<'_> {
        self.file_cursor(self.root)
            .expect("root file is always present")
    }

    /// Cursor for the root of any file of the unit.
    pub fn file_cursor(&self, id: FileId) -> Option<Cursor<'_>> {
        self.files
            .get(&id)
            .map(|f| Cursor::new(self, id, f.tree.root_node()))
    }

    /// Resolve a (path, line, column) to the innermost cursor covering it.
    pub fn cursor_at(&self, path: &Path, line: u32, column: u32) -> Option<Cursor<'_>> {
        if line == 0 || column == 0 {
            return None;
        }
        let id = intern(path);
        let file = self.files.get(&id)?;
        let point = Point {
            row: (line - 1) as usize,
            column: (column - 1) as usize,
        };
        let node = file
            .tree
            .root_node()
            .descendant_for_point_range(point, point)?;
        Some(Cursor::new(self, id, node))
    }

    fn index_decls(&mut self) {
        let mut decls = DeclIndex::default();
        for &id in &self.file_order {
            let file = &self.files[&id];
            let mut scope: Vec<String> = Vec::new();
            collect_decls(file.tree.root_node(), file, &mut scope, &mut decls);
        }
        self.decls = decls;
    }

    /// The declaration whose name token sits at `location`.
    pub fn declaration_at(&self, location: Location) -> Option<Declaration> {
        self.decls
            .at_location(location)
            .map(|idx| (&self.decls.entries[idx]).into())
    }

    /// Resolve a qualified name to its canonical declaration.
    pub fn resolve_qualified(&self, qualified: &str) -> Option<Declaration> {
        let idx = self.decls.resolve(qualified, self.root)?;
        Some((&self.decls.entries[self.decls.canonical(idx)]).into())
    }

    /// Cursor for an indexed declaration: the declaration node enclosing
    /// its name token.
    pub(crate) fn cursor_for_decl(&self, idx: usize) -> Option<Cursor<'_>> {
        let entry = &self.decls.entries[idx];
        let file = self.files.get(&entry.file)?;
        let point = Point {
            row: (entry.location.line - 1) as usize,
            column: (entry.location.column - 1) as usize,
        };
        let mut node = file
            .tree
            .root_node()
            .descendant_for_point_range(point, point)?;
        while !is_decl_node_kind(node.kind()) {
            node = node.parent()?;
        }
        Some(Cursor::new(self, entry.file, node))
    }
}

pub(crate) fn is_decl_node_kind(kind: &str) -> bool {
    matches!(
        kind,
        "function_definition"
            | "declaration"
            | "field_declaration"
            | "class_specifier"
            | "struct_specifier"
            | "enum_specifier"
            | "enumerator"
            | "namespace_definition"
    )
}

fn parse_source(text: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    let language: Language = tree_sitter_cpp::LANGUAGE.into();
    parser
        .set_language(&language)
        .map_err(|e| CxrefError::Internal(format!("grammar version mismatch: {e}")))?;
    parser
        .parse(text, None)
        .ok_or_else(|| CxrefError::Internal("front-end returned no tree".into()))
}

pub(crate) fn point_location(file: FileId, point: Point) -> Location {
    Location::new(file, point.row as u32 + 1, point.column as u32 + 1)
}

fn scan_includes(
    root: Node<'_>,
    text: &str,
    file: FileId,
    including_dir: &Path,
    args: &CompileCommand,
    stored: &HashMap<PathBuf, String>,
) -> Vec<IncludeEdge> {
    let mut edges = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.kind() == "preproc_include" {
            let mut include_cursor = node.walk();
            let path_node = node.child_by_field_name("path").or_else(|| {
                node.named_children(&mut include_cursor)
                    .find(|c| matches!(c.kind(), "string_literal" | "system_lib_string"))
            });
            if let Some(path_node) = path_node {
                let raw = path_node.utf8_text(text.as_bytes()).unwrap_or("");
                let quoted = path_node.kind() == "string_literal";
                let spelling = raw.trim_matches(['"', '<', '>']).to_string();
                let target = resolve_include(&spelling, quoted, including_dir, args, stored);
                if target.is_none() {
                    debug!(include = %spelling, from = %crate::location::file_path(file).display(),
                           "include not resolved");
                }
                edges.push(IncludeEdge {
                    from: file,
                    location: point_location(file, node.start_position()),
                    spelling,
                    target: target.map(|p| intern(&p)),
                });
            }
            continue;
        }
        let mut cursor = node.walk();
        // reverse so the stack pops in document order
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    edges
}

fn resolve_include(
    spelling: &str,
    quoted: bool,
    including_dir: &Path,
    args: &CompileCommand,
    stored: &HashMap<PathBuf, String>,
) -> Option<PathBuf> {
    let rel = Path::new(spelling);
    let mut candidates: Vec<PathBuf> = Vec::new();
    if rel.is_absolute() {
        candidates.push(rel.to_path_buf());
    } else {
        if quoted {
            candidates.push(including_dir.join(rel));
        }
        for dir in args.include_dirs() {
            candidates.push(dir.join(rel));
        }
        for dir in SYSTEM_INCLUDE_DIRS {
            candidates.push(Path::new(dir).join(rel));
        }
    }
    for candidate in candidates {
        if stored.contains_key(&candidate) {
            return Some(candidate);
        }
        if candidate.is_file() {
            if let Ok(resolved) = fs::canonicalize(&candidate) {
                return Some(resolved);
            }
        }
    }
    None
}

// ─── Declaration collection ─────────────────────────────────────

fn collect_decls(node: Node<'_>, file: &SourceFile, scope: &mut Vec<String>, out: &mut DeclIndex) {
    match node.kind() {
        "namespace_definition" => {
            let name = node
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(file.text.as_bytes()).ok())
                .map(str::to_string);
            if let Some(name) = &name {
                push_entry(out, file, node, name.clone(), scope, CursorKind::Namespace, true);
            }
            if let Some(body) = node.child_by_field_name("body") {
                if let Some(name) = name {
                    scope.push(name);
                    collect_children(body, file, scope, out);
                    scope.pop();
                } else {
                    collect_children(body, file, scope, out);
                }
            }
        }
        "class_specifier" | "struct_specifier" => {
            let kind = if node.kind() == "class_specifier" {
                CursorKind::Class
            } else {
                CursorKind::Struct
            };
            let name = node
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(file.text.as_bytes()).ok())
                .map(str::to_string);
            let body = node.child_by_field_name("body");
            if let (Some(name), Some(body)) = (name, body) {
                push_entry(out, file, node, name.clone(), scope, kind, true);
                let qualified = if scope.is_empty() {
                    name.clone()
                } else {
                    format!("{}::{}", scope.join("::"), name)
                };
                let bases = base_class_names(node, &file.text);
                if !bases.is_empty() {
                    out.bases.insert(qualified, bases);
                }
                scope.push(name);
                collect_children(body, file, scope, out);
                scope.pop();
            }
        }
        "enum_specifier" => {
            let name = node
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(file.text.as_bytes()).ok())
                .map(str::to_string);
            if let Some(name) = &name {
                push_entry(
                    out,
                    file,
                    node,
                    name.clone(),
                    scope,
                    CursorKind::EnumDecl,
                    node.child_by_field_name("body").is_some(),
                );
            }
            if let Some(body) = node.child_by_field_name("body") {
                if let Some(name) = name {
                    scope.push(name);
                    collect_children(body, file, scope, out);
                    scope.pop();
                } else {
                    collect_children(body, file, scope, out);
                }
            }
        }
        "enumerator" => {
            if let Some(name) = node
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(file.text.as_bytes()).ok())
            {
                push_entry(
                    out,
                    file,
                    node,
                    name.to_string(),
                    scope,
                    CursorKind::EnumConstant,
                    true,
                );
            }
        }
        "function_definition" => {
            if let Some((name, prefix)) = function_name(node, &file.text) {
                with_prefix(scope, &prefix, |scope| {
                    push_entry(out, file, node, name.clone(), scope, CursorKind::FunctionDef, true);
                });
            }
            // declarations inside bodies are not indexed
        }
        "declaration" | "field_declaration" => {
            collect_declarators(node, file, scope, out);
        }
        "type_definition" => {}
        _ => collect_children(node, file, scope, out),
    }
}

fn collect_children(node: Node<'_>, file: &SourceFile, scope: &mut Vec<String>, out: &mut DeclIndex) {
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
    for child in children {
        collect_decls(child, file, scope, out);
    }
}

/// Handle the declarator list of a `declaration` / `field_declaration`:
/// function prototypes become FunctionDecl, everything else VarDecl.
fn collect_declarators(node: Node<'_>, file: &SourceFile, scope: &mut Vec<String>, out: &mut DeclIndex) {
    let mut extern_cursor = node.walk();
    let is_extern = node.children(&mut extern_cursor)
        .any(|c| c.kind() == "storage_class_specifier"
            && c.utf8_text(file.text.as_bytes()) == Ok("extern"));
    let mut cursor = node.walk();
    let declarators: Vec<Node<'_>> = node.children_by_field_name("declarator", &mut cursor).collect();
    for declarator in declarators {
        let is_function = declarator_chain_has_function(declarator);
        let Some(name_node) = declarator_identifier(declarator) else {
            continue;
        };
        let Ok(text) = name_node.utf8_text(file.text.as_bytes()) else {
            continue;
        };
        let (name, prefix) = split_qualified(text);
        let kind = if is_function {
            CursorKind::FunctionDecl
        } else {
            CursorKind::VarDecl
        };
        let name_point = qualified_name_point(name_node, &file.text);
        with_prefix(scope, &prefix, |scope| {
            push_entry_at(
                out,
                file,
                node,
                name_point,
                name.clone(),
                scope,
                kind,
                !is_function && !is_extern,
            );
        });
    }
}

fn with_prefix<F: FnOnce(&mut Vec<String>)>(scope: &mut Vec<String>, prefix: &[String], f: F) {
    for part in prefix {
        scope.push(part.clone());
    }
    f(scope);
    for _ in prefix {
        scope.pop();
    }
}

fn push_entry(
    out: &mut DeclIndex,
    file: &SourceFile,
    node: Node<'_>,
    name: String,
    scope: &[String],
    kind: CursorKind,
    is_definition: bool,
) {
    let name_point = name_point_of(node, &file.text).unwrap_or_else(|| node.start_position());
    push_entry_at(out, file, node, name_point, name, scope, kind, is_definition);
}

#[allow(clippy::too_many_arguments)]
fn push_entry_at(
    out: &mut DeclIndex,
    file: &SourceFile,
    node: Node<'_>,
    name_point: Point,
    name: String,
    scope: &[String],
    kind: CursorKind,
    is_definition: bool,
) {
    let qualified = if scope.is_empty() {
        name.clone()
    } else {
        format!("{}::{}", scope.join("::"), name)
    };
    let display = match kind {
        CursorKind::FunctionDecl | CursorKind::FunctionDef => {
            let params = parameters_text(node, &file.text).unwrap_or_else(|| "()".into());
            format!("{name}{params}")
        }
        _ => name.clone(),
    };
    out.push(DeclEntry {
        name,
        qualified,
        kind,
        location: point_location(file.id, name_point),
        extent_start: point_location(file.id, node.start_position()),
        extent_end: point_location(file.id, node.end_position()),
        file: file.id,
        is_definition,
        container: if scope.is_empty() {
            None
        } else {
            Some(scope.join("::"))
        },
        display,
    });
}

/// Start point of the declared name inside a declaration node.
pub(crate) fn name_point_of(node: Node<'_>, text: &str) -> Option<Point> {
    if let Some(name) = node.child_by_field_name("name") {
        return Some(name.start_position());
    }
    let mut cursor = node.walk();
    let declarators: Vec<Node<'_>> = node.children_by_field_name("declarator", &mut cursor).collect();
    for declarator in declarators {
        if let Some(ident) = declarator_identifier(declarator) {
            return Some(qualified_name_point(ident, text));
        }
    }
    None
}

/// For a qualified name node, the location of the final segment; otherwise
/// the node's own start.
fn qualified_name_point(ident: Node<'_>, text: &str) -> Point {
    let raw = ident.utf8_text(text.as_bytes()).unwrap_or("");
    if let Some(offset) = raw.rfind("::") {
        if !raw[..offset].contains('\n') {
            let mut point = ident.start_position();
            point.column += offset + 2;
            return point;
        }
    }
    ident.start_position()
}

fn parameters_text(node: Node<'_>, text: &str) -> Option<String> {
    let mut declarator = node.child_by_field_name("declarator")?;
    loop {
        if declarator.kind() == "function_declarator" {
            let params = declarator.child_by_field_name("parameters")?;
            return params.utf8_text(text.as_bytes()).ok().map(str::to_string);
        }
        declarator = declarator.child_by_field_name("declarator")?;
    }
}

/// Peel declarator wrappers down to the declared name node.
pub(crate) fn declarator_identifier(mut node: Node<'_>) -> Option<Node<'_>> {
    loop {
        match node.kind() {
            "identifier" | "field_identifier" | "type_identifier" | "qualified_identifier"
            | "destructor_name" | "operator_name" => return Some(node),
            "function_declarator" | "pointer_declarator" | "reference_declarator"
            | "array_declarator" | "init_declarator" | "parenthesized_declarator" => {
                node = node.child_by_field_name("declarator")?;
            }
            _ => return None,
        }
    }
}

fn declarator_chain_has_function(mut node: Node<'_>) -> bool {
    loop {
        if node.kind() == "function_declarator" {
            return true;
        }
        match node.child_by_field_name("declarator") {
            Some(inner) => node = inner,
            None => return false,
        }
    }
}

fn function_name(node: Node<'_>, text: &str) -> Option<(String, Vec<String>)> {
    let declarator = node.child_by_field_name("declarator")?;
    let name_node = declarator_identifier(declarator)?;
    let raw = name_node.utf8_text(text.as_bytes()).ok()?;
    Some(split_qualified(raw))
}

fn base_class_names(class_node: Node<'_>, text: &str) -> Vec<String> {
    let mut bases = Vec::new();
    let mut cursor = class_node.walk();
    let children: Vec<Node<'_>> = class_node.named_children(&mut cursor).collect();
    for child in children {
        if child.kind() != "base_class_clause" {
            continue;
        }
        let mut inner = child.walk();
        let parts: Vec<Node<'_>> = child.named_children(&mut inner).collect();
        for part in parts {
            match part.kind() {
                "type_identifier" | "qualified_identifier" => {
                    if let Ok(name) = part.utf8_text(text.as_bytes()) {
                        bases.push(name.to_string());
                    }
                }
                "template_type" => {
                    if let Some(name) = part
                        .child_by_field_name("name")
                        .and_then(|n| n.utf8_text(text.as_bytes()).ok())
                    {
                        bases.push(name.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    bases
}

/// Split `A::B::name` into (`name`, `[A, B]`).
fn split_qualified(text: &str) -> (String, Vec<String>) {
    let trimmed = text.trim_start_matches("::");
    let mut parts: Vec<String> = trimmed.split("::").map(str::to_string).collect();
    let name = parts.pop().unwrap_or_default();
    (name, parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        fs::canonicalize(&path).unwrap()
    }

    #[test]
    fn single_file_unit_indexes_functions() {
        let dir = tempdir().unwrap();
        let main = write(dir.path(), "a.cpp", "int foo() { return 0; }\n");
        let tu = TranslationUnit::parse(&main, &CompileCommand::default(), ParseOptions::default())
            .unwrap();
        assert_eq!(tu.file_ids().len(), 1);
        let entry = tu
            .decls
            .entries
            .iter()
            .find(|e| e.name == "foo")
            .expect("foo indexed");
        assert_eq!(entry.kind, CursorKind::FunctionDef);
        assert_eq!(entry.location.line, 1);
        assert_eq!(entry.location.column, 5);
        assert!(entry.is_definition);
    }

    #[test]
    fn quoted_includes_resolve_relative_to_the_including_file() {
        let dir = tempdir().unwrap();
        write(dir.path(), "util.h", "int helper();\n");
        let main = write(dir.path(), "main.cpp", "#include \"util.h\"\nint main() { return helper(); }\n");
        let tu = TranslationUnit::parse(&main, &CompileCommand::default(), ParseOptions::default())
            .unwrap();
        assert_eq!(tu.file_ids().len(), 2);
        assert_eq!(tu.include_edges().len(), 1);
        assert!(tu.include_edges()[0].target.is_some());
    }

    #[test]
    fn include_cycles_terminate() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.h", "#include \"b.h\"\nint a();\n");
        write(dir.path(), "b.h", "#include \"a.h\"\nint b();\n");
        let main = write(dir.path(), "main.cpp", "#include \"a.h\"\n");
        let tu = TranslationUnit::parse(&main, &CompileCommand::default(), ParseOptions::default())
            .unwrap();
        assert_eq!(tu.file_ids().len(), 3);
    }

    #[test]
    fn angle_includes_search_dash_i_dirs() {
        let dir = tempdir().unwrap();
        let inc = dir.path().join("inc");
        fs::create_dir(&inc).unwrap();
        write(&inc, "lib.h", "void lib();\n");
        let main = write(dir.path(), "main.cpp", "#include <lib.h>\n");
        let args = CompileCommand::new(vec![format!("-I{}", inc.display())]);
        let tu = TranslationUnit::parse(&main, &args, ParseOptions::default()).unwrap();
        assert_eq!(tu.file_ids().len(), 2);
    }

    #[test]
    fn qualified_method_definitions_keep_their_container() {
        let dir = tempdir().unwrap();
        let main = write(
            dir.path(),
            "cls.cpp",
            "namespace app {\nclass Engine {\npublic:\n  void run();\n};\nvoid Engine::run() {}\n}\n",
        );
        let tu = TranslationUnit::parse(&main, &CompileCommand::default(), ParseOptions::default())
            .unwrap();
        let def = tu
            .decls
            .entries
            .iter()
            .find(|e| e.kind == CursorKind::FunctionDef)
            .expect("out-of-line definition indexed");
        assert_eq!(def.name, "run");
        assert_eq!(def.qualified, "app::Engine::run");
        assert_eq!(def.container.as_deref(), Some("app::Engine"));

        let proto = tu
            .decls
            .entries
            .iter()
            .find(|e| e.kind == CursorKind::FunctionDecl)
            .expect("prototype indexed");
        assert_eq!(proto.qualified, "app::Engine::run");
        // the prototype comes first in unit order, so it is canonical
        let def_idx = tu.decls.entries.iter().position(|e| e.is_definition && e.name == "run").unwrap();
        let canonical = tu.decls.canonical(def_idx);
        assert_eq!(tu.decls.entries[canonical].location, proto.location);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        write(dir.path(), "dep.h", "struct Widget { int id; };\n");
        let main = write(dir.path(), "main.cpp", "#include \"dep.h\"\nWidget w;\n");
        let tu = TranslationUnit::parse(&main, &CompileCommand::default(), ParseOptions::default())
            .unwrap();
        let artefact = dir.path().join("saved.unit");
        tu.save(&artefact).unwrap();

        // delete the sources: the artefact must be self-contained
        fs::remove_file(&main).unwrap();
        let loaded = TranslationUnit::load(&artefact).unwrap();
        assert_eq!(loaded.file_ids().len(), 2);
        assert!(loaded.decls.entries.iter().any(|e| e.name == "Widget"));
    }

    #[test]
    fn loading_a_missing_artefact_is_not_found() {
        let err = TranslationUnit::load(Path::new("/no/such/artefact")).unwrap_err();
        assert!(matches!(err, CxrefError::NotFound(_)));
    }
}
