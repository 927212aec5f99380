//! The symbol forest: a tagged, hierarchical store of declarations and
//! references, one node per symbol occurrence, rooted at a single root.
//!
//! Nodes live in an arena and are addressed by integer ids. Cross-reference
//! edges (referenced, canonical, definition, overridden) are non-owning ids
//! that resolve through the arena; an invalidated id resolves to `None`.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use bitflags::bitflags;

use crate::location::{FileId, Location};

bitflags! {
    /// Node kinds as distinct bits, so a kind-mask query is a bitwise test.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SymbolKind: u32 {
        const ROOT                 = 1 << 0;
        const METHOD_DECLARATION   = 1 << 1;
        const METHOD_DEFINITION    = 1 << 2;
        const CLASS                = 1 << 3;
        const STRUCT               = 1 << 4;
        const NAMESPACE            = 1 << 5;
        const VARIABLE_DECLARATION = 1 << 6;
        const ENUM_DECLARATION     = 1 << 7;
        const ENUM_VALUE           = 1 << 8;
        const REFERENCE            = 1 << 9;
    }
}

const KIND_NAMES: &[(SymbolKind, &str)] = &[
    (SymbolKind::ROOT, "Root"),
    (SymbolKind::METHOD_DECLARATION, "MethodDeclaration"),
    (SymbolKind::METHOD_DEFINITION, "MethodDefinition"),
    (SymbolKind::CLASS, "Class"),
    (SymbolKind::STRUCT, "Struct"),
    (SymbolKind::NAMESPACE, "Namespace"),
    (SymbolKind::VARIABLE_DECLARATION, "VariableDeclaration"),
    (SymbolKind::ENUM_DECLARATION, "EnumDeclaration"),
    (SymbolKind::ENUM_VALUE, "EnumValue"),
    (SymbolKind::REFERENCE, "Reference"),
];

impl SymbolKind {
    pub fn name(self) -> &'static str {
        KIND_NAMES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
            .unwrap_or("None")
    }

    /// Parse a kind name, case-insensitively. The root is not nameable.
    pub fn parse(text: &str) -> Option<SymbolKind> {
        KIND_NAMES
            .iter()
            .skip(1)
            .find(|(_, name)| name.eq_ignore_ascii_case(text))
            .map(|(kind, _)| *kind)
    }
}

/// Arena index of a symbol node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

/// Non-owning cross-reference edges out of a node.
#[derive(Debug, Default, Clone)]
pub struct SymbolRefs {
    pub referenced: Option<NodeId>,
    pub canonical: Option<NodeId>,
    pub definition: Option<NodeId>,
    pub specialized: Option<NodeId>,
    pub overridden: Vec<NodeId>,
}

/// Children are keyed by (kind, name, location), which is the stable
/// traversal order for lookups and tree dumps.
type ChildKey = (u32, String, Location);

#[derive(Debug)]
pub struct SymbolNode {
    pub kind: SymbolKind,
    pub name: String,
    pub location: Location,
    pub parent: NodeId,
    children: BTreeMap<ChildKey, NodeId>,
    pub refs: SymbolRefs,
}

impl SymbolNode {
    fn key(&self) -> ChildKey {
        (self.kind.bits(), self.name.clone(), self.location)
    }
}

pub struct SymbolForest {
    // tombstoned slots are never reused, so a stale id can only resolve
    // to None, never to an unrelated node
    nodes: Vec<Option<SymbolNode>>,
}

impl Default for SymbolForest {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolForest {
    pub fn new() -> Self {
        SymbolForest {
            nodes: vec![Some(SymbolNode {
                kind: SymbolKind::ROOT,
                name: String::new(),
                location: Location::NULL,
                parent: NodeId::ROOT,
                children: BTreeMap::new(),
                refs: SymbolRefs::default(),
            })],
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&SymbolNode> {
        self.nodes.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SymbolNode> {
        self.nodes.get_mut(id.0 as usize)?.as_mut()
    }

    /// Number of live nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Find or create the child of `parent` with this identity.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        kind: SymbolKind,
        name: &str,
        location: Location,
    ) -> NodeId {
        let key: ChildKey = (kind.bits(), name.to_string(), location);
        if let Some(node) = self.get(parent) {
            if let Some(&existing) = node.children.get(&key) {
                return existing;
            }
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(SymbolNode {
            kind,
            name: name.to_string(),
            location,
            parent,
            children: BTreeMap::new(),
            refs: SymbolRefs::default(),
        }));
        if let Some(node) = self.get_mut(parent) {
            node.children.insert(key, id);
        }
        id
    }

    /// Drop every node located in `file`. Children of dropped nodes located
    /// elsewhere are lifted to the root; the rest go with their parent.
    /// Dangling cross-reference edges are nulled. Returns the removed count.
    pub fn remove_file(&mut self, file: FileId) -> usize {
        let doomed: HashSet<u32> = self
            .nodes
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .filter(|n| n.location.file == file)
                    .map(|_| i as u32)
            })
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        // lift surviving children of doomed nodes to the root
        let mut lifted: Vec<NodeId> = Vec::new();
        for &i in &doomed {
            if let Some(node) = &self.nodes[i as usize] {
                for &child in node.children.values() {
                    if !doomed.contains(&child.0) {
                        lifted.push(child);
                    }
                }
            }
        }
        for id in lifted {
            if let Some(key) = self.get(id).map(SymbolNode::key) {
                if let Some(node) = self.get_mut(id) {
                    node.parent = NodeId::ROOT;
                }
                if let Some(root) = self.get_mut(NodeId::ROOT) {
                    root.children.insert(key, id);
                }
            }
        }

        // detach doomed nodes from surviving parents, then tombstone
        for &i in &doomed {
            let Some(node) = &self.nodes[i as usize] else {
                continue;
            };
            let parent = node.parent;
            let key = node.key();
            if !doomed.contains(&parent.0) {
                if let Some(parent) = self.get_mut(parent) {
                    parent.children.remove(&key);
                }
            }
            self.nodes[i as usize] = None;
        }

        // null out dangling edges
        for slot in self.nodes.iter_mut() {
            let Some(node) = slot else { continue };
            let gone = |id: &NodeId| doomed.contains(&id.0);
            if node.refs.referenced.as_ref().is_some_and(gone) {
                node.refs.referenced = None;
            }
            if node.refs.canonical.as_ref().is_some_and(gone) {
                node.refs.canonical = None;
            }
            if node.refs.definition.as_ref().is_some_and(gone) {
                node.refs.definition = None;
            }
            if node.refs.specialized.as_ref().is_some_and(gone) {
                node.refs.specialized = None;
            }
            node.refs.overridden.retain(|id| !gone(id));
        }

        doomed.len()
    }

    /// Every file that still owns at least one node.
    pub fn files(&self) -> HashSet<FileId> {
        self.nodes
            .iter()
            .skip(1)
            .filter_map(|slot| slot.as_ref())
            .map(|n| n.location.file)
            .collect()
    }

    /// Deterministic pre-order walk: parents before children, siblings in
    /// child-key order. The callback gets each node with its dotted
    /// qualified name and returns `false` to stop the walk early. Returns
    /// `false` if the walk was stopped.
    pub fn visit_preorder<F>(&self, callback: &mut F) -> bool
    where
        F: FnMut(NodeId, &SymbolNode, &str) -> bool,
    {
        self.visit_from(NodeId::ROOT, "", callback)
    }

    fn visit_from<F>(&self, id: NodeId, prefix: &str, callback: &mut F) -> bool
    where
        F: FnMut(NodeId, &SymbolNode, &str) -> bool,
    {
        let Some(node) = self.get(id) else { return true };
        let qualified = if node.kind == SymbolKind::ROOT {
            String::new()
        } else if prefix.is_empty() {
            node.name.clone()
        } else {
            format!("{prefix}.{}", node.name)
        };
        if node.kind != SymbolKind::ROOT && !callback(id, node, &qualified) {
            return false;
        }
        for &child in node.children.values() {
            if !self.visit_from(child, &qualified, callback) {
                return false;
            }
        }
        true
    }

    /// Kind-masked lookup. `matches` is applied to the qualified name; the
    /// callback receives each hit in deterministic pre-order and may stop
    /// the walk by returning `false`. Returns `false` when stopped early.
    pub fn lookup<M, F>(&self, mask: SymbolKind, matches: M, callback: &mut F) -> bool
    where
        M: Fn(&str) -> bool,
        F: FnMut(&SymbolNode, &str) -> bool,
    {
        self.visit_preorder(&mut |_, node, qualified| {
            if node.kind.intersects(mask) && matches(qualified) {
                callback(node, qualified)
            } else {
                true
            }
        })
    }

    /// Debug dump of the forest in traversal order.
    pub fn print_tree(&self) -> String {
        let mut out = String::new();
        self.print_from(NodeId::ROOT, 0, &mut out);
        out
    }

    fn print_from(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        if node.kind == SymbolKind::ROOT {
            let _ = writeln!(out, "Root");
        } else {
            let _ = writeln!(
                out,
                "{}{} {} {}",
                "  ".repeat(depth),
                node.kind.name(),
                node.name,
                node.location
            );
        }
        for &child in node.children.values() {
            self.print_from(child, depth + 1, out);
        }
    }
}
