//! Cursors: cheap handles into a translation unit's trees.
//!
//! A cursor is valid for the life of its owning unit. Accessors never
//! panic on odd shapes; anything unresolvable is `None`.

use std::path::PathBuf;

use tree_sitter::Node;

use crate::location::{FileId, Location};

use super::unit::{self, DeclEntry, TranslationUnit};
use super::{CursorKind, Declaration, Visit};

#[derive(Clone, Copy)]
pub struct Cursor<'tu> {
    tu: &'tu TranslationUnit,
    file: FileId,
    node: Node<'tu>,
}

impl<'tu> Cursor<'tu> {
    pub(crate) fn new(tu: &'tu TranslationUnit, file: FileId, node: Node<'tu>) -> Self {
        Cursor { tu, file, node }
    }

    pub fn kind(&self) -> CursorKind {
        match self.node.kind() {
            "translation_unit" => CursorKind::TranslationUnit,
            "preproc_include" => {
                if self.tu.options.detailed_preprocessing_record {
                    CursorKind::InclusionDirective
                } else {
                    CursorKind::Other
                }
            }
            "function_definition" => CursorKind::FunctionDef,
            "namespace_definition" => CursorKind::Namespace,
            "class_specifier" if self.node.child_by_field_name("body").is_some() => {
                CursorKind::Class
            }
            "struct_specifier" if self.node.child_by_field_name("body").is_some() => {
                CursorKind::Struct
            }
            "enum_specifier" => CursorKind::EnumDecl,
            "enumerator" => CursorKind::EnumConstant,
            "declaration" | "field_declaration" => match self.decl_entry() {
                Some(entry) => entry.kind,
                None => CursorKind::Other,
            },
            "identifier" | "field_identifier" | "type_identifier" | "namespace_identifier"
            | "qualified_identifier" => CursorKind::Reference,
            _ => CursorKind::Other,
        }
    }

    /// Location of the cursor: the name token for declarations, the node
    /// start otherwise.
    pub fn location(&self) -> Location {
        if let Some(entry) = self.decl_entry() {
            return entry.location;
        }
        unit::point_location(self.file, self.node.start_position())
    }

    /// Start and end of the cursor's full source range.
    pub fn extent(&self) -> (Location, Location) {
        (
            unit::point_location(self.file, self.node.start_position()),
            unit::point_location(self.file, self.node.end_position()),
        )
    }

    pub fn spelling(&self) -> String {
        if let Some(entry) = self.decl_entry() {
            return entry.name.clone();
        }
        match self.kind() {
            CursorKind::InclusionDirective => self
                .tu
                .include_at(self.location())
                .map(|edge| edge.spelling.clone())
                .unwrap_or_default(),
            CursorKind::Reference => self.text(),
            _ => String::new(),
        }
    }

    pub fn display_name(&self) -> String {
        match self.decl_entry() {
            Some(entry) => entry.display.clone(),
            None => self.spelling(),
        }
    }

    /// Stable symbol identity across units of this process.
    pub fn usr(&self) -> Option<String> {
        let entry = self.decl_entry()?;
        let tag = match entry.kind {
            CursorKind::FunctionDecl | CursorKind::FunctionDef => "F",
            CursorKind::Class | CursorKind::Struct => "S",
            CursorKind::Namespace => "N",
            CursorKind::VarDecl => "V",
            CursorKind::EnumDecl => "E",
            CursorKind::EnumConstant => "Ec",
            _ => "?",
        };
        Some(format!("c:{}@{}", tag, entry.qualified))
    }

    pub fn is_definition(&self) -> bool {
        self.decl_entry().map(|e| e.is_definition).unwrap_or(false)
    }

    pub fn equals(&self, other: &Cursor<'_>) -> bool {
        self.file == other.file
            && self.node.start_byte() == other.node.start_byte()
            && self.node.end_byte() == other.node.end_byte()
    }

    /// The declaration this cursor refers to. Declarations refer to
    /// themselves; identifier cursors resolve through the unit's
    /// declaration index; anything else is `None`.
    pub fn referenced(&self) -> Option<Cursor<'tu>> {
        let kind = self.kind();
        if kind.is_declaration() {
            return Some(*self);
        }
        if kind != CursorKind::Reference {
            return None;
        }
        let idx = self.reference_target()?;
        self.tu.cursor_for_decl(idx)
    }

    /// Declaration index an identifier cursor points at. A token sitting
    /// exactly on a declared name is that declaration (the refs-self case);
    /// everything else goes through name resolution.
    fn reference_target(&self) -> Option<usize> {
        let token = unit::point_location(self.file, self.node.start_position());
        if let Some(idx) = self.tu.decls.at_location(token) {
            return Some(idx);
        }
        self.tu.decls.resolve(&self.text(), self.file)
    }

    /// First declaration of the referred symbol, in unit order.
    pub fn canonical(&self) -> Option<Cursor<'tu>> {
        let idx = self.referenced_entry_index()?;
        self.tu.cursor_for_decl(self.tu.decls.canonical(idx))
    }

    /// The defining declaration of the referred symbol.
    pub fn definition(&self) -> Option<Cursor<'tu>> {
        let idx = self.referenced_entry_index()?;
        self.tu.cursor_for_decl(self.tu.decls.definition(idx)?)
    }

    /// The container a declaration semantically belongs to: its class or
    /// namespace, regardless of where the definition is written. For
    /// non-declarations, the nearest enclosing declaration.
    pub fn semantic_parent(&self) -> Option<Cursor<'tu>> {
        if let Some(entry) = self.decl_entry() {
            let container = entry.container.as_deref()?;
            let idx = self.tu.decls.resolve(container, self.file)?;
            return self.tu.cursor_for_decl(self.tu.decls.canonical(idx));
        }
        let mut node = self.node;
        while let Some(parent) = node.parent() {
            if unit::is_decl_node_kind(parent.kind()) {
                return Some(Cursor::new(self.tu, self.file, parent));
            }
            node = parent;
        }
        None
    }

    /// The template a specialization was instantiated from. Template
    /// instantiation is not modeled by this front-end.
    pub fn specialized_template(&self) -> Option<Cursor<'tu>> {
        None
    }

    /// Methods of base classes that this method overrides, nearest base
    /// first. Cycle-safe on malformed inheritance graphs.
    pub fn overridden(&self) -> Vec<Cursor<'tu>> {
        let Some(entry) = self.decl_entry() else {
            return Vec::new();
        };
        if !matches!(entry.kind, CursorKind::FunctionDecl | CursorKind::FunctionDef) {
            return Vec::new();
        }
        let Some(container) = entry.container.clone() else {
            return Vec::new();
        };
        let mut found = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![container];
        while let Some(class) = stack.pop() {
            if !seen.insert(class.clone()) {
                continue;
            }
            for base in self.tu.decls.base_classes(&class) {
                let Some(base_idx) = self.tu.decls.resolve(base, self.file) else {
                    continue;
                };
                let base_qualified = self.tu.decls.entries[base_idx].qualified.clone();
                let method = format!("{}::{}", base_qualified, entry.name);
                if let Some(idx) = self.tu.decls.resolve(&method, self.file) {
                    if let Some(cursor) = self.tu.cursor_for_decl(idx) {
                        found.push(cursor);
                    }
                }
                stack.push(base_qualified);
            }
        }
        found
    }

    /// For an inclusion directive, the file it resolved to.
    pub fn included_file(&self) -> Option<PathBuf> {
        if self.kind() != CursorKind::InclusionDirective {
            return None;
        }
        let edge = self.tu.include_at(self.location())?;
        edge.target.map(crate::location::file_path)
    }

    /// The declaration this cursor introduces, as a plain value.
    pub fn declaration(&self) -> Option<Declaration> {
        self.decl_entry().map(Declaration::from)
    }

    /// Every declaration this node introduces (`int a, b;` declares two).
    pub fn declarations(&self) -> Vec<Declaration> {
        self.decl_entries()
            .into_iter()
            .map(Declaration::from)
            .collect()
    }

    /// Raw source text under the cursor.
    pub fn text(&self) -> String {
        let Some(file) = self.tu.file(self.file) else {
            return String::new();
        };
        self.node
            .utf8_text(file.text.as_bytes())
            .unwrap_or("")
            .to_string()
    }

    fn decl_entry(&self) -> Option<&'tu DeclEntry> {
        if !unit::is_decl_node_kind(self.node.kind()) {
            return None;
        }
        let text = &self.tu.file(self.file)?.text;
        let point = unit::name_point_of(self.node, text)?;
        let location = unit::point_location(self.file, point);
        let idx = self.tu.decls.at_location(location)?;
        Some(&self.tu.decls.entries[idx])
    }

    /// Every declaration this node introduces (`int a, b;` declares two).
    pub(crate) fn decl_entries(&self) -> Vec<&'tu DeclEntry> {
        if !unit::is_decl_node_kind(self.node.kind()) {
            return Vec::new();
        }
        let start = unit::point_location(self.file, self.node.start_position());
        self.tu
            .decls
            .at_extent_start(start)
            .iter()
            .map(|&i| &self.tu.decls.entries[i])
            .collect()
    }

    fn referenced_entry_index(&self) -> Option<usize> {
        match self.kind() {
            k if k.is_declaration() => {
                let entry = self.decl_entry()?;
                self.tu.decls.at_location(entry.location)
            }
            CursorKind::Reference => self.reference_target(),
            _ => None,
        }
    }
}

/// Depth-first visit of a cursor's named children. The callback decides per
/// cursor whether to skip its children, descend, or abort the whole walk.
/// Returns `false` when the walk was broken.
pub fn visit_children<'tu, F>(cursor: &Cursor<'tu>, callback: &mut F) -> bool
where
    F: FnMut(&Cursor<'tu>) -> Visit,
{
    let mut walker = cursor.node.walk();
    let children: Vec<Node<'tu>> = cursor.node.named_children(&mut walker).collect();
    for child in children {
        let child = Cursor::new(cursor.tu, cursor.file, child);
        match callback(&child) {
            Visit::Break => return false,
            Visit::Continue => {}
            Visit::Recurse => {
                if !visit_children(&child, callback) {
                    return false;
                }
            }
        }
    }
    true
}
