//! A prefix tree over URL segments with literal, parameter, wildcard and
//! tail edges.
//!
//! Patterns mix four segment kinds: literals, `:name` parameters (bind one
//! segment), `*` wildcards (match one segment without binding) and `**`
//! tails (match all remaining segments; only legal in last position).
//! Lookup precedence is strict: literal children first, then the dynamic
//! child. On a dead end deeper in the tree the walk backtracks to the last
//! branch point and tries the next alternative.
//!
//! Nodes live in an arena behind a shared handle, so [`PathTrie::attach`]
//! can graft one trie into another with shared node identity: mutations
//! made through either handle are visible through both. A graft can
//! introduce cycles; traversal guards against them.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    rc::Rc,
};

use crate::path::NormalizedPath;

/// A value-transforming function installed with [`PathTrie::use_at`].
///
/// Composed root-to-leaf onto every lookup whose matched prefix traverses
/// the node it is installed at; the mapping closest to the root is applied
/// last, so it wraps the others.
pub type Mapper<T> = Rc<dyn Fn(T) -> T>;

/// Pattern validation and mutation errors. These are programmer errors and
/// fail eagerly.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TrieError {
    #[error("empty parameter name in pattern")]
    EmptyParamName,
    #[error("`**` must be the last segment of a pattern")]
    TailNotLast,
    #[error("conflicting dynamic segment at `{at}`: `{existing}` vs `{offered}`")]
    DynamicConflict {
        at: String,
        existing: String,
        offered: String,
    },
    #[error("a value is already registered at `{0}`")]
    DuplicateValue(String),
    #[error("no value registered at `{0}`")]
    NoValue(String),
    #[error("cannot attach at `{at}`: {reason}")]
    AttachConflict { at: String, reason: String },
    #[error("cannot add children below a `**` segment")]
    ChildrenBelowTail,
}

/// One segment of a parsed pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
    Tail,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(s) => f.write_str(s),
            Segment::Param(name) => write!(f, ":{name}"),
            Segment::Wildcard => f.write_str("*"),
            Segment::Tail => f.write_str("**"),
        }
    }
}

/// Parses a pattern string into segments, validating the tail-last and
/// non-empty-parameter rules. Empty segments are collapsed like path
/// normalization does.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, TrieError> {
    let mut out = Vec::new();
    for raw in pattern.split('/') {
        if raw.is_empty() {
            continue;
        }
        if matches!(out.last(), Some(Segment::Tail)) {
            return Err(TrieError::TailNotLast);
        }
        let seg = match raw {
            "*" => Segment::Wildcard,
            "**" => Segment::Tail,
            _ if raw.starts_with(':') => {
                let name = &raw[1..];
                if name.is_empty() {
                    return Err(TrieError::EmptyParamName);
                }
                Segment::Param(name.to_owned())
            }
            _ => Segment::Literal(raw.to_owned()),
        };
        out.push(seg);
    }
    Ok(out)
}

/// A successful lookup.
///
/// `matched.join(&remaining)` reassembles the input path; `remaining` is
/// the root path unless the match terminated on a tail.
pub struct TrieMatch<T> {
    pub value: T,
    pub params: HashMap<String, String>,
    pub matched: NormalizedPath,
    pub remaining: NormalizedPath,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct NodeId(usize);

#[derive(Clone, Debug, PartialEq, Eq)]
enum DynKind {
    Param(String),
    Wildcard,
    Tail,
}

impl fmt::Display for DynKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynKind::Param(name) => write!(f, ":{name}"),
            DynKind::Wildcard => f.write_str("*"),
            DynKind::Tail => f.write_str("**"),
        }
    }
}

struct Node<T> {
    literals: BTreeMap<String, NodeId>,
    // At most one dynamic child; the kind is fixed once set.
    dynamic: Option<(DynKind, NodeId)>,
    value: Option<T>,
    mapper: Option<Mapper<T>>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self {
            literals: BTreeMap::new(),
            dynamic: None,
            value: None,
            mapper: None,
        }
    }
}

struct Arena<T> {
    nodes: Vec<Node<T>>,
}

impl<T> Arena<T> {
    fn alloc(&mut self) -> NodeId {
        self.nodes.push(Node::new());
        NodeId(self.nodes.len() - 1)
    }

    fn node(&self, id: NodeId) -> &Node<T> {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        &mut self.nodes[id.0]
    }
}

/// A prefix tree mapping URL patterns to values of `T`.
pub struct PathTrie<T> {
    arena: Rc<RefCell<Arena<T>>>,
    root: NodeId,
}

impl<T> Clone for PathTrie<T> {
    fn clone(&self) -> Self {
        Self {
            arena: self.arena.clone(),
            root: self.root,
        }
    }
}

impl<T: 'static> Default for PathTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> PathTrie<T> {
    pub fn new() -> Self {
        let mut arena = Arena { nodes: Vec::new() };
        let root = arena.alloc();
        Self {
            arena: Rc::new(RefCell::new(arena)),
            root,
        }
    }

    /// Walks `segments` from the root, creating nodes as needed.
    ///
    /// Returns the terminal node and whether it was reached over a tail
    /// edge.
    fn ensure_path(&self, segments: &[Segment]) -> Result<(NodeId, bool), TrieError> {
        let mut arena = self.arena.borrow_mut();
        let mut node = self.root;
        let mut over_tail = false;
        for (idx, seg) in segments.iter().enumerate() {
            if over_tail {
                return Err(TrieError::ChildrenBelowTail);
            }
            node = match seg {
                Segment::Literal(s) => match arena.node(node).literals.get(s) {
                    Some(child) => *child,
                    None => {
                        let child = arena.alloc();
                        arena.node_mut(node).literals.insert(s.clone(), child);
                        child
                    }
                },
                Segment::Param(_) | Segment::Wildcard | Segment::Tail => {
                    let offered = match seg {
                        Segment::Param(name) => DynKind::Param(name.clone()),
                        Segment::Wildcard => DynKind::Wildcard,
                        Segment::Tail => DynKind::Tail,
                        Segment::Literal(_) => unreachable!(),
                    };
                    match &arena.node(node).dynamic {
                        Some((existing, child)) => {
                            if *existing != offered {
                                return Err(TrieError::DynamicConflict {
                                    at: render_prefix(&segments[..idx]),
                                    existing: existing.to_string(),
                                    offered: offered.to_string(),
                                });
                            }
                            *child
                        }
                        None => {
                            let child = arena.alloc();
                            arena.node_mut(node).dynamic = Some((offered, child));
                            child
                        }
                    }
                }
            };
            over_tail = matches!(seg, Segment::Tail);
        }
        Ok((node, over_tail))
    }

    /// Walks `segments` without creating anything.
    fn find_path(&self, segments: &[Segment]) -> Option<NodeId> {
        let arena = self.arena.borrow();
        let mut node = self.root;
        for seg in segments {
            node = match seg {
                Segment::Literal(s) => *arena.node(node).literals.get(s)?,
                other => {
                    let offered = match other {
                        Segment::Param(name) => DynKind::Param(name.clone()),
                        Segment::Wildcard => DynKind::Wildcard,
                        Segment::Tail => DynKind::Tail,
                        Segment::Literal(_) => unreachable!(),
                    };
                    match &arena.node(node).dynamic {
                        Some((kind, child)) if *kind == offered => *child,
                        _ => return None,
                    }
                }
            };
        }
        Some(node)
    }

    /// Runs `f` over the value slot at `pattern`, creating the node chain
    /// if needed.
    pub(crate) fn with_slot<R>(
        &mut self,
        pattern: &str,
        f: impl FnOnce(&mut Option<T>) -> R,
    ) -> Result<R, TrieError> {
        let segments = parse_pattern(pattern)?;
        let (node, _) = self.ensure_path(&segments)?;
        let mut arena = self.arena.borrow_mut();
        Ok(f(&mut arena.node_mut(node).value))
    }

    /// Registers `value` at `pattern`. Fails if a value is already present
    /// at that exact pattern.
    pub fn add(&mut self, pattern: &str, value: T) -> Result<(), TrieError> {
        let taken = self.with_slot(pattern, |slot| {
            if slot.is_some() {
                true
            } else {
                *slot = Some(value);
                false
            }
        })?;
        if taken {
            return Err(TrieError::DuplicateValue(pattern.to_owned()));
        }
        Ok(())
    }

    /// Registers or replaces the value at `pattern`. Returns `true` if the
    /// value was newly added.
    pub fn add_or_update(&mut self, pattern: &str, value: T) -> Result<bool, TrieError> {
        self.with_slot(pattern, |slot| {
            let added = slot.is_none();
            *slot = Some(value);
            added
        })
    }

    /// Replaces the value at `pattern`. Fails if no value exists there.
    pub fn update(&mut self, pattern: &str, value: T) -> Result<(), TrieError> {
        let missing = self.with_slot(pattern, |slot| {
            if slot.is_none() {
                true
            } else {
                *slot = Some(value);
                false
            }
        })?;
        if missing {
            return Err(TrieError::NoValue(pattern.to_owned()));
        }
        Ok(())
    }

    /// Removes and returns the value at `pattern`, if any.
    ///
    /// The node chain is left in place; empty nodes are harmless and keep
    /// sub-trie handles valid.
    pub fn remove(&mut self, pattern: &str) -> Result<Option<T>, TrieError> {
        let segments = parse_pattern(pattern)?;
        match self.find_path(&segments) {
            Some(node) => {
                let mut arena = self.arena.borrow_mut();
                Ok(arena.node_mut(node).value.take())
            }
            None => Ok(None),
        }
    }

    /// Installs a value-transforming function at `pattern`.
    ///
    /// The function is composed onto every lookup whose matched prefix
    /// traverses that node, root-to-leaf, with the root-most mapping
    /// applied last. Repeated installations at the same node compose in
    /// insertion order (the earlier one wraps the later one).
    pub fn use_at(&mut self, pattern: &str, map: Mapper<T>) -> Result<(), TrieError>
    where
        T: 'static,
    {
        let segments = parse_pattern(pattern)?;
        let (node, _) = self.ensure_path(&segments)?;
        let mut arena = self.arena.borrow_mut();
        let slot = &mut arena.node_mut(node).mapper;
        *slot = Some(match slot.take() {
            None => map,
            Some(existing) => compose(existing, map),
        });
        Ok(())
    }

    /// Grafts `other`'s root node into this trie at `pattern`.
    ///
    /// With `consume == false` the graft shares node identity: after a
    /// successful attach, mutations through either handle are visible
    /// through both, and `other`'s root becomes the graft node. With
    /// `consume == true`, `other` must be a single-value trie with no
    /// children; its value is moved into the graft node and `other` is left
    /// empty.
    ///
    /// Fails if both sides carry a value at the join point, both define a
    /// dynamic child there, or they share a literal child key.
    pub fn attach(
        &mut self,
        pattern: &str,
        other: &mut PathTrie<T>,
        consume: bool,
    ) -> Result<(), TrieError>
    where
        T: 'static,
    {
        let segments = parse_pattern(pattern)?;
        let conflict = |reason: &str| TrieError::AttachConflict {
            at: pattern.to_owned(),
            reason: reason.to_owned(),
        };

        if consume {
            let (graft, _) = self.ensure_path(&segments)?;
            if self.arena.borrow().node(graft).value.is_some() {
                return Err(conflict("both sides carry a value at the join point"));
            }
            let value = {
                let mut other_arena = other.arena.borrow_mut();
                let other_root = other_arena.node_mut(other.root);
                if !other_root.literals.is_empty() || other_root.dynamic.is_some() {
                    return Err(conflict("consumed trie must have no children"));
                }
                match other_root.value.take() {
                    Some(value) => value,
                    None => return Err(conflict("consumed trie must carry exactly one value")),
                }
            };
            self.arena.borrow_mut().node_mut(graft).value = Some(value);
            return Ok(());
        }

        let same_arena = Rc::ptr_eq(&self.arena, &other.arena);
        if segments.is_empty() && same_arena {
            return Err(conflict("cannot attach a trie to its own root"));
        }

        // Resolve the join point without touching the donor, so a conflict
        // leaves both tries exactly as they were.
        let join = if segments.is_empty() {
            Join::Existing(self.root)
        } else {
            let (parent, over_tail) = self.ensure_path(&segments[..segments.len() - 1])?;
            if over_tail {
                return Err(TrieError::ChildrenBelowTail);
            }
            let last = &segments[segments.len() - 1];
            let arena = self.arena.borrow();
            match last {
                Segment::Literal(s) => match arena.node(parent).literals.get(s) {
                    Some(child) => Join::Existing(*child),
                    None => Join::NewEdge(parent),
                },
                dynamic => {
                    let offered = match dynamic {
                        Segment::Param(name) => DynKind::Param(name.clone()),
                        Segment::Wildcard => DynKind::Wildcard,
                        Segment::Tail => DynKind::Tail,
                        Segment::Literal(_) => unreachable!(),
                    };
                    match &arena.node(parent).dynamic {
                        Some((kind, child)) => {
                            if *kind != offered {
                                return Err(TrieError::DynamicConflict {
                                    at: render_prefix(&segments[..segments.len() - 1]),
                                    existing: kind.to_string(),
                                    offered: offered.to_string(),
                                });
                            }
                            Join::Existing(*child)
                        }
                        None => Join::NewEdge(parent),
                    }
                }
            }
        };

        // A tail node may not grow children.
        if matches!(segments.last(), Some(Segment::Tail)) {
            let donor = other.arena.borrow();
            let d = donor.node(other.root);
            if !d.literals.is_empty() || d.dynamic.is_some() {
                return Err(TrieError::ChildrenBelowTail);
            }
        }

        // Conflict checks against the existing join node, still read-only.
        if let Join::Existing(existing) = join {
            if !(same_arena && existing == other.root) {
                let arena = self.arena.borrow();
                let e = arena.node(existing);
                let check = |d: &Node<T>| -> Result<(), TrieError> {
                    if e.value.is_some() && d.value.is_some() {
                        return Err(conflict("both sides carry a value at the join point"));
                    }
                    if e.dynamic.is_some() && d.dynamic.is_some() {
                        return Err(conflict("both sides define a dynamic child"));
                    }
                    if d.literals.keys().any(|k| e.literals.contains_key(k)) {
                        return Err(conflict("shared literal child key"));
                    }
                    Ok(())
                };
                if same_arena {
                    check(arena.node(other.root))?;
                } else {
                    let donor = other.arena.borrow();
                    check(donor.node(other.root))?;
                }
            }
        }

        // Import the donor nodes when the two handles do not already share
        // storage. Values and mappers move; nothing is cloned.
        let donor_root = if same_arena {
            other.root
        } else {
            let mut arena = self.arena.borrow_mut();
            let mut donor = other.arena.borrow_mut();
            let offset = arena.nodes.len();
            for node in donor.nodes.iter_mut() {
                arena.nodes.push(Node {
                    literals: node
                        .literals
                        .iter()
                        .map(|(k, v)| (k.clone(), NodeId(v.0 + offset)))
                        .collect(),
                    dynamic: node
                        .dynamic
                        .as_ref()
                        .map(|(kind, child)| (kind.clone(), NodeId(child.0 + offset))),
                    value: node.value.take(),
                    mapper: node.mapper.take(),
                });
            }
            NodeId(other.root.0 + offset)
        };

        let target = match join {
            // The new edge points straight at the donor root: node identity
            // is shared, and a same-arena graft may form a cycle.
            Join::NewEdge(parent) => {
                let mut arena = self.arena.borrow_mut();
                match segments.last().expect("a new edge implies a last segment") {
                    Segment::Literal(s) => {
                        arena.node_mut(parent).literals.insert(s.clone(), donor_root);
                    }
                    dynamic => {
                        let kind = match dynamic {
                            Segment::Param(name) => DynKind::Param(name.clone()),
                            Segment::Wildcard => DynKind::Wildcard,
                            Segment::Tail => DynKind::Tail,
                            Segment::Literal(_) => unreachable!(),
                        };
                        arena.node_mut(parent).dynamic = Some((kind, donor_root));
                    }
                }
                donor_root
            }
            Join::Existing(existing) if existing == donor_root => existing,
            Join::Existing(existing) => {
                self.merge_into(existing, donor_root);
                existing
            }
        };

        other.arena = self.arena.clone();
        other.root = target;
        Ok(())
    }

    /// Folds the donor node's content into `into` (the parent side). The
    /// conflict rules were checked by the caller; the donor node is left
    /// empty.
    fn merge_into(&self, into: NodeId, donor: NodeId) {
        let mut arena = self.arena.borrow_mut();
        let taken = std::mem::replace(arena.node_mut(donor), Node::new());
        let node = arena.node_mut(into);
        node.literals.extend(taken.literals);
        if node.dynamic.is_none() {
            node.dynamic = taken.dynamic;
        }
        if node.value.is_none() {
            node.value = taken.value;
        }
        // Parent-map wraps child-map at the join point.
        node.mapper = match (node.mapper.take(), taken.mapper) {
            (Some(parent), Some(child)) => Some(compose(parent, child)),
            (parent, child) => parent.or(child),
        };
    }

    /// Enumerates all patterns carrying a value: depth-first, literal
    /// children before the dynamic child, alphabetical among literals.
    ///
    /// A graft can introduce cycles; nodes already on the current walk are
    /// not re-entered, so enumeration terminates.
    pub fn paths(&self) -> Vec<String> {
        let arena = self.arena.borrow();
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        let mut on_stack = HashSet::new();
        collect_paths(&arena, self.root, &mut prefix, &mut on_stack, &mut out);
        out
    }
}

impl<T: Clone + 'static> PathTrie<T> {
    /// Registers or updates the value at `pattern` in place: `f` consumes
    /// the previous value if one exists and produces the replacement.
    /// Returns the value now stored.
    pub fn add_or_update_in_place(
        &mut self,
        pattern: &str,
        f: impl FnOnce(Option<T>) -> T,
    ) -> Result<T, TrieError> {
        self.with_slot(pattern, |slot| {
            let new = f(slot.take());
            *slot = Some(new.clone());
            new
        })
    }

    /// Matches `path` against the trie.
    ///
    /// Literal children win over the dynamic child; on failure deeper in
    /// the subtree the walk backtracks and tries the next alternative.
    /// Parameter bindings accumulate along the way (the deeper binding wins
    /// for duplicate names); mappings installed with [`PathTrie::use_at`]
    /// are composed root-to-leaf onto the returned value.
    pub fn lookup(&self, path: &NormalizedPath) -> Option<TrieMatch<T>> {
        let arena = self.arena.borrow();
        let segs = path.segments();
        let mut params: Vec<(String, String)> = Vec::new();
        let mut mappers: Vec<Mapper<T>> = Vec::new();

        let hit = walk(&arena, self.root, segs, 0, &mut params, &mut mappers)?;

        let value = arena.node(hit.node).value.clone()?;
        let value = mappers.iter().rev().fold(value, |v, m| m(v));

        let mut map = HashMap::new();
        for (name, val) in params {
            // Later (deeper) bindings overwrite earlier ones.
            map.insert(name, val);
        }
        Some(TrieMatch {
            value,
            params: map,
            matched: path.sub_path(0, Some(hit.matched)),
            remaining: path.sub_path(hit.matched, None),
        })
    }
}

/// How an attach joins the receiving trie.
enum Join {
    /// No node at the join point yet; add an edge below this parent.
    NewEdge(NodeId),
    /// A node already exists; the donor root folds into it.
    Existing(NodeId),
}

struct Hit {
    node: NodeId,
    /// Number of path segments covered by the matched prefix; anything past
    /// it was consumed by a tail.
    matched: usize,
}

fn walk<T>(
    arena: &Arena<T>,
    node: NodeId,
    segs: &[String],
    idx: usize,
    params: &mut Vec<(String, String)>,
    mappers: &mut Vec<Mapper<T>>,
) -> Option<Hit> {
    let n = arena.node(node);
    if let Some(m) = &n.mapper {
        mappers.push(m.clone());
    }
    let mapper_mark = mappers.len();
    let pushed_mapper = n.mapper.is_some();

    let restore = |params: &mut Vec<(String, String)>,
                   mappers: &mut Vec<Mapper<T>>,
                   param_mark: usize| {
        params.truncate(param_mark);
        mappers.truncate(mapper_mark - usize::from(pushed_mapper));
    };

    let param_mark = params.len();

    if idx == segs.len() {
        if n.value.is_some() {
            return Some(Hit { node, matched: idx });
        }
        // A tail child may match zero segments.
        if let Some((DynKind::Tail, child)) = &n.dynamic {
            if arena.node(*child).value.is_some() {
                if let Some(m) = &arena.node(*child).mapper {
                    mappers.push(m.clone());
                }
                return Some(Hit {
                    node: *child,
                    matched: idx,
                });
            }
        }
        restore(params, mappers, param_mark);
        return None;
    }

    let seg = &segs[idx];

    if let Some(child) = n.literals.get(seg) {
        if let Some(hit) = walk(arena, *child, segs, idx + 1, params, mappers) {
            return Some(hit);
        }
    }

    match &n.dynamic {
        Some((DynKind::Param(name), child)) => {
            params.push((name.clone(), seg.clone()));
            if let Some(hit) = walk(arena, *child, segs, idx + 1, params, mappers) {
                return Some(hit);
            }
            params.truncate(param_mark);
        }
        Some((DynKind::Wildcard, child)) => {
            if let Some(hit) = walk(arena, *child, segs, idx + 1, params, mappers) {
                return Some(hit);
            }
        }
        Some((DynKind::Tail, child)) => {
            if arena.node(*child).value.is_some() {
                if let Some(m) = &arena.node(*child).mapper {
                    mappers.push(m.clone());
                }
                // The matched prefix ends at the tail's parent.
                return Some(Hit {
                    node: *child,
                    matched: idx,
                });
            }
        }
        None => {}
    }

    restore(params, mappers, param_mark);
    None
}

fn collect_paths<T>(
    arena: &Arena<T>,
    node: NodeId,
    prefix: &mut Vec<String>,
    on_stack: &mut HashSet<NodeId>,
    out: &mut Vec<String>,
) {
    if !on_stack.insert(node) {
        return;
    }
    let n = arena.node(node);
    if n.value.is_some() {
        out.push(render_strings(prefix));
    }
    for (lit, child) in &n.literals {
        prefix.push(lit.clone());
        collect_paths(arena, *child, prefix, on_stack, out);
        prefix.pop();
    }
    if let Some((kind, child)) = &n.dynamic {
        prefix.push(kind.to_string());
        collect_paths(arena, *child, prefix, on_stack, out);
        prefix.pop();
    }
    on_stack.remove(&node);
}

fn compose<T: 'static>(outer: Mapper<T>, inner: Mapper<T>) -> Mapper<T> {
    Rc::new(move |value| outer(inner(value)))
}

fn render_prefix(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_owned();
    }
    let mut out = String::new();
    for seg in segments {
        out.push('/');
        out.push_str(&seg.to_string());
    }
    out
}

fn render_strings(segments: &[String]) -> String {
    if segments.is_empty() {
        return "/".to_owned();
    }
    let mut out = String::new();
    for seg in segments {
        out.push('/');
        out.push_str(seg);
    }
    out
}
