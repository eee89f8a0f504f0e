//! Abstract Syntax Tree for IPDL translation units.
//!
//! Nodes live in an arena owned by [`Ast`] and are addressed by [`NodeId`].
//! Each node carries its location, a typed payload ([`NodeData`]), its ordered
//! children, a non-owning parent index, grammar-level extended attributes and
//! the typed [`Decorations`] filled in by the type-checker.
//!
//! The tree is built bottom-up in one pass by the parser and is never
//! restructured afterwards; re-parenting a node is a programmer error.

use crate::state::{Direction, Nesting, Priority, SendSemantics, State, Transition};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Index of a node inside its [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Source location: file and 1-based line (0 for synthesized nodes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Loc {
    pub file: Arc<str>,
    pub line: usize,
}

impl Loc {
    pub fn new(file: impl Into<Arc<str>>, line: usize) -> Self {
        Loc { file: file.into(), line }
    }

    /// Location of nodes the compiler makes up (builtin usings, null stmts).
    pub fn builtin() -> Self {
        Loc { file: Arc::from("<builtin>"), line: 0 }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            f.write_str(&self.file)
        } else {
            write!(f, "{}:{}", self.file, self.line)
        }
    }
}

/// A name plus its enclosing namespace qualifiers, e.g. `mozilla::ipc::Shmem`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedId {
    pub loc: Loc,
    pub base: String,
    pub quals: Vec<String>,
}

impl QualifiedId {
    pub fn new(loc: Loc, base: impl Into<String>) -> Self {
        QualifiedId { loc, base: base.into(), quals: Vec::new() }
    }

    /// Push the current base into the qualifiers and make `id` the new base.
    pub fn qualify(&mut self, id: impl Into<String>) {
        let previous = std::mem::replace(&mut self.base, id.into());
        self.quals.push(previous);
    }

    pub fn base_id(&self) -> &str {
        &self.base
    }

    pub fn full_name(&self) -> String {
        if self.quals.is_empty() {
            self.base.clone()
        } else {
            format!("{}::{}", self.quals.join("::"), self.base)
        }
    }
}

impl fmt::Display for QualifiedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Tag identifying the concrete variant of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    TranslationUnit,
    CxxInclude,
    Include,
    UsingStmt,
    StructDecl,
    StructField,
    UnionDecl,
    Namespace,
    Protocol,
    Spawns,
    Bridges,
    Opens,
    Manager,
    Managed,
    MessageDecl,
    Param,
    TypeSpec,
    TransitionStmt,
    Transition,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::TranslationUnit => "TranslationUnit",
            NodeKind::CxxInclude => "CxxInclude",
            NodeKind::Include => "Include",
            NodeKind::UsingStmt => "UsingStmt",
            NodeKind::StructDecl => "StructDecl",
            NodeKind::StructField => "StructField",
            NodeKind::UnionDecl => "UnionDecl",
            NodeKind::Namespace => "Namespace",
            NodeKind::Protocol => "Protocol",
            NodeKind::Spawns => "Spawns",
            NodeKind::Bridges => "Bridges",
            NodeKind::Opens => "Opens",
            NodeKind::Manager => "Manager",
            NodeKind::Managed => "Managed",
            NodeKind::MessageDecl => "MessageDecl",
            NodeKind::Param => "Param",
            NodeKind::TypeSpec => "TypeSpec",
            NodeKind::TransitionStmt => "TransitionStmt",
            NodeKind::Transition => "Transition",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// `.ipdl`: exactly one protocol.
    Protocol,
    /// `.ipdlh`: shared structs, unions and usings only.
    Header,
}

impl FileType {
    pub fn from_path(path: &Path) -> Option<FileType> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("ipdl") => Some(FileType::Protocol),
            Some("ipdlh") => Some(FileType::Header),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslationUnit {
    /// File stem; must equal the protocol name for `.ipdl` files.
    pub name: String,
    pub file_type: FileType,
}

/// `include "foo.h";`
#[derive(Debug, Clone)]
pub struct CxxInclude {
    pub file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    Protocol,
    Header,
}

/// `include protocol PFoo;` or `include SharedTypes;`
#[derive(Debug, Clone)]
pub struct Include {
    pub kind: IncludeKind,
    pub name: String,
    /// Set by the parser once the file has been located.
    pub path: Option<PathBuf>,
}

impl Include {
    pub fn file_name(&self) -> String {
        match self.kind {
            IncludeKind::Protocol => format!("{}.ipdl", self.name),
            IncludeKind::Header => format!("{}.ipdlh", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsingKind {
    Class,
    Struct,
}

/// `using [refcounted] class mozilla::Foo from "mozilla/Foo.h";`
#[derive(Debug, Clone)]
pub struct UsingStmt {
    pub type_id: QualifiedId,
    pub header: String,
    pub kind: Option<UsingKind>,
    pub refcounted: bool,
    /// Injected by the parser for the builtin types.
    pub builtin: bool,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct UnionDecl {
    pub name: String,
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Protocol {
    pub name: String,
    pub send_semantics: SendSemantics,
    pub nested: Nesting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Parent,
    Child,
}

impl Side {
    pub fn from_keyword(s: &str) -> Option<Side> {
        match s {
            "parent" => Some(Side::Parent),
            "child" => Some(Side::Child),
            _ => None,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Side::Parent => "Parent",
            Side::Child => "Child",
        }
    }
}

/// `parent spawns PChild as child;`
#[derive(Debug, Clone)]
pub struct Spawns {
    pub side: Option<Side>,
    pub protocol: String,
    pub spawned_as: Option<Side>,
}

/// `bridges PA, PB;`
#[derive(Debug, Clone)]
pub struct Bridges {
    pub parent_side: String,
    pub child_side: String,
}

/// `child opens PFoo;`
#[derive(Debug, Clone)]
pub struct Opens {
    pub side: Option<Side>,
    pub protocol: String,
}

#[derive(Debug, Clone)]
pub struct Manager {
    pub name: String,
}

/// `manages PChild;`
#[derive(Debug, Clone)]
pub struct Managed {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Compress,
    CompressAll,
    Verify,
}

impl Modifier {
    pub fn from_keyword(s: &str) -> Option<Modifier> {
        match s {
            "compress" => Some(Modifier::Compress),
            "compressall" => Some(Modifier::CompressAll),
            "verify" => Some(Modifier::Verify),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Modifier::Compress => "compress",
            Modifier::CompressAll => "compressall",
            Modifier::Verify => "verify",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageDecl {
    pub name: String,
    pub send_semantics: SendSemantics,
    pub nested: Nesting,
    pub priority: Priority,
    /// Fixed by the `parent:`/`child:`/`both:` section the message sits in.
    pub direction: Direction,
    pub modifiers: Vec<Modifier>,
}

impl MessageDecl {
    pub const DESTRUCTOR: &'static str = "__delete__";

    pub fn is_dtor(&self) -> bool {
        self.name == Self::DESTRUCTOR
    }

    /// Sync and intr messages carry a reply.
    pub fn has_reply(&self) -> bool {
        !self.send_semantics.is_async()
    }

    pub fn pretty_msg_name(&self) -> String {
        format!("Msg_{}", self.name)
    }

    pub fn pretty_reply_name(&self) -> String {
        format!("Reply_{}", self.name)
    }

    pub fn compress(&self) -> Option<Modifier> {
        self.modifiers
            .iter()
            .copied()
            .find(|m| matches!(m, Modifier::Compress | Modifier::CompressAll))
    }

    pub fn verify(&self) -> bool {
        self.modifiers.contains(&Modifier::Verify)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    In,
    Out,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub role: ParamRole,
}

/// A type reference as written: `nullable PFoo`, `nsCString[]`, `mozilla::Foo`.
#[derive(Debug, Clone)]
pub struct TypeSpec {
    pub spec: QualifiedId,
    pub array: bool,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct TransitionStmt {
    pub state: State,
}

/// Typed payload of a node; the variant determines [`NodeKind`].
#[derive(Debug, Clone)]
pub enum NodeData {
    TranslationUnit(TranslationUnit),
    CxxInclude(CxxInclude),
    Include(Include),
    UsingStmt(UsingStmt),
    StructDecl(StructDecl),
    StructField(StructField),
    UnionDecl(UnionDecl),
    Namespace(Namespace),
    Protocol(Protocol),
    Spawns(Spawns),
    Bridges(Bridges),
    Opens(Opens),
    Manager(Manager),
    Managed(Managed),
    MessageDecl(MessageDecl),
    Param(Param),
    TypeSpec(TypeSpec),
    TransitionStmt(TransitionStmt),
    Transition(Transition),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::TranslationUnit(_) => NodeKind::TranslationUnit,
            NodeData::CxxInclude(_) => NodeKind::CxxInclude,
            NodeData::Include(_) => NodeKind::Include,
            NodeData::UsingStmt(_) => NodeKind::UsingStmt,
            NodeData::StructDecl(_) => NodeKind::StructDecl,
            NodeData::StructField(_) => NodeKind::StructField,
            NodeData::UnionDecl(_) => NodeKind::UnionDecl,
            NodeData::Namespace(_) => NodeKind::Namespace,
            NodeData::Protocol(_) => NodeKind::Protocol,
            NodeData::Spawns(_) => NodeKind::Spawns,
            NodeData::Bridges(_) => NodeKind::Bridges,
            NodeData::Opens(_) => NodeKind::Opens,
            NodeData::Manager(_) => NodeKind::Manager,
            NodeData::Managed(_) => NodeKind::Managed,
            NodeData::MessageDecl(_) => NodeKind::MessageDecl,
            NodeData::Param(_) => NodeKind::Param,
            NodeData::TypeSpec(_) => NodeKind::TypeSpec,
            NodeData::TransitionStmt(_) => NodeKind::TransitionStmt,
            NodeData::Transition(_) => NodeKind::Transition,
        }
    }
}

/// What a [`TypeSpec`] resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    /// Builtin type, carrying its C++ spelling.
    Builtin(String),
    /// Type imported with `using`, carrying its C++ spelling.
    Imported(String),
    Struct(String),
    Union(String),
    /// Actor handle of the named protocol.
    Actor(String),
}

impl TypeRef {
    pub fn is_actor(&self) -> bool {
        matches!(self, TypeRef::Actor(_))
    }
}

/// Annotations the type-checker attaches to nodes.
#[derive(Debug, Clone, Default)]
pub struct Decorations {
    pub progname: Option<String>,
    pub shortname: Option<String>,
    pub fullname: Option<String>,
    pub resolved: Option<TypeRef>,
    /// Error count; recorded on the translation unit.
    pub errors: usize,
}

/// Grammar-level `[Name]` or `[Name=value]` annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

/// A grammar child handed to [`Ast::add_node`]: attributes become node
/// properties, everything else becomes a structural child.
#[derive(Debug, Clone)]
pub enum Item {
    Attribute(Attribute),
    Child(NodeId),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub loc: Loc,
    pub data: NodeData,
    pub decor: Decorations,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: BTreeMap<String, Option<String>>,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }
}

/// One parsed file: the node arena plus its root.
#[derive(Debug, Clone)]
pub struct Ast {
    filename: PathBuf,
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

macro_rules! node_accessors {
    ($($fn_name:ident => $variant:ident($ty:ty)),* $(,)?) => {
        $(
            pub fn $fn_name(&self, id: NodeId) -> Option<&$ty> {
                match &self.node(id).data {
                    NodeData::$variant(d) => Some(d),
                    _ => None,
                }
            }
        )*
    };
}

impl Ast {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Ast { filename: filename.into(), nodes: Vec::new(), root: None }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root translation unit. Panics if the tree was never finished.
    pub fn root(&self) -> NodeId {
        match self.root {
            Some(root) => root,
            None => panic!("AST for {} has no translation unit", self.filename.display()),
        }
    }

    pub fn set_root(&mut self, id: NodeId) {
        assert!(self.root.is_none(), "translation unit root already set");
        assert_eq!(self.kind(id), NodeKind::TranslationUnit, "root must be a TranslationUnit");
        assert!(self.nodes[id.index()].parent.is_none(), "root cannot have a parent");
        self.root = Some(id);
    }

    /// Create a node. Attribute items become attributes; child items are
    /// attached in order. The classification is made once, here.
    pub fn add_node(&mut self, data: NodeData, loc: Loc, items: Vec<Item>) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        assert!(id.0 != u32::MAX, "AST node arena exhausted");
        self.nodes.push(Node {
            loc,
            data,
            decor: Decorations::default(),
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
        });
        for item in items {
            match item {
                Item::Attribute(attr) => {
                    self.nodes[id.index()].attributes.insert(attr.name, attr.value);
                }
                Item::Child(child) => self.attach_child(id, child),
            }
        }
        id
    }

    /// Convenience for nodes without attributes.
    pub fn add_leaf(&mut self, data: NodeData, loc: Loc) -> NodeId {
        self.add_node(data, loc, Vec::new())
    }

    /// Attach `child` under `parent`. Re-parenting is a programmer error.
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) {
        assert_ne!(parent, child, "node cannot be its own child");
        if let Some(existing) = self.nodes[child.index()].parent {
            panic!(
                "{} node {:?} already has parent {:?}; refusing to attach to {:?}",
                self.kind(child),
                child,
                existing,
                parent
            );
        }
        assert!(
            !self.ancestors(parent).any(|a| a == child),
            "attaching {:?} under {:?} would create a cycle",
            child,
            parent
        );
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind()
    }

    pub fn loc(&self, id: NodeId) -> &Loc {
        &self.node(id).loc
    }

    /// True iff the node's kind is one of `kinds`.
    pub fn is_kind(&self, id: NodeId, kinds: &[NodeKind]) -> bool {
        kinds.contains(&self.kind(id))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Ancestors of `id`, nearest first, not including `id`.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    /// Immediate children whose kind is one of `kinds`, in order.
    pub fn children_of_kind(&self, id: NodeId, kinds: &[NodeKind]) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|&c| self.is_kind(c, kinds))
            .collect()
    }

    pub fn first_child_of_kind(&self, id: NodeId, kinds: &[NodeKind]) -> Option<NodeId> {
        self.children(id).iter().copied().find(|&c| self.is_kind(c, kinds))
    }

    pub fn set_attribute(&mut self, id: NodeId, name: impl Into<String>, value: Option<String>) {
        self.node_mut(id).attributes.insert(name.into(), value);
    }

    /// Attribute set on this node only. `Some(None)` is a bare `[Name]` flag.
    pub fn attribute_local(&self, id: NodeId, name: &str) -> Option<Option<&str>> {
        self.node(id).attributes.get(name).map(|v| v.as_deref())
    }

    /// Attribute set on this node or, failing that, the nearest ancestor
    /// up to the translation unit.
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<Option<&str>> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find_map(|n| self.attribute_local(n, name))
    }

    /// A transition statement for `state` holding only the null transition.
    pub fn null_transition_stmt(&mut self, state: State) -> NodeId {
        let null = self.add_leaf(NodeData::Transition(Transition::null()), Loc::builtin());
        self.add_node(
            NodeData::TransitionStmt(TransitionStmt { state }),
            Loc::builtin(),
            vec![Item::Child(null)],
        )
    }

    node_accessors! {
        as_translation_unit => TranslationUnit(TranslationUnit),
        as_cxx_include => CxxInclude(CxxInclude),
        as_include => Include(Include),
        as_using_stmt => UsingStmt(UsingStmt),
        as_struct_decl => StructDecl(StructDecl),
        as_struct_field => StructField(StructField),
        as_union_decl => UnionDecl(UnionDecl),
        as_namespace => Namespace(Namespace),
        as_protocol => Protocol(Protocol),
        as_spawns => Spawns(Spawns),
        as_bridges => Bridges(Bridges),
        as_opens => Opens(Opens),
        as_manager => Manager(Manager),
        as_managed => Managed(Managed),
        as_message_decl => MessageDecl(MessageDecl),
        as_param => Param(Param),
        as_type_spec => TypeSpec(TypeSpec),
        as_transition_stmt => TransitionStmt(TransitionStmt),
        as_transition => Transition(Transition),
    }

    pub fn translation_unit(&self) -> Option<&TranslationUnit> {
        self.root.and_then(|root| self.as_translation_unit(root))
    }

    /// The translation unit's protocol, if any.
    pub fn protocol(&self) -> Option<(NodeId, &Protocol)> {
        let root = self.root?;
        let id = self.first_child_of_kind(root, &[NodeKind::Protocol])?;
        self.as_protocol(id).map(|p| (id, p))
    }

    /// Namespace names enclosing the protocol, outermost first.
    pub fn namespaces(&self, protocol: NodeId) -> Vec<String> {
        self.children_of_kind(protocol, &[NodeKind::Namespace])
            .into_iter()
            .filter_map(|n| self.as_namespace(n).map(|ns| ns.name.clone()))
            .collect()
    }

    /// `ns::...::Name` for the protocol.
    pub fn qualified_protocol_name(&self, protocol: NodeId) -> Option<String> {
        let name = &self.as_protocol(protocol)?.name;
        let mut parts = self.namespaces(protocol);
        parts.push(name.clone());
        Some(parts.join("::"))
    }

    pub fn messages(&self, protocol: NodeId) -> Vec<(NodeId, &MessageDecl)> {
        self.children_of_kind(protocol, &[NodeKind::MessageDecl])
            .into_iter()
            .filter_map(|m| self.as_message_decl(m).map(|d| (m, d)))
            .collect()
    }

    pub fn params(&self, message: NodeId, role: ParamRole) -> Vec<(NodeId, &Param)> {
        self.children_of_kind(message, &[NodeKind::Param])
            .into_iter()
            .filter_map(|p| self.as_param(p).map(|d| (p, d)))
            .filter(|(_, p)| p.role == role)
            .collect()
    }

    /// The TypeSpec child of a param, struct field or the node itself.
    pub fn type_spec_of(&self, id: NodeId) -> Option<(NodeId, &TypeSpec)> {
        let ts = if self.kind(id) == NodeKind::TypeSpec {
            id
        } else {
            self.first_child_of_kind(id, &[NodeKind::TypeSpec])?
        };
        self.as_type_spec(ts).map(|t| (ts, t))
    }

    pub fn manager_names(&self, protocol: NodeId) -> Vec<String> {
        self.children_of_kind(protocol, &[NodeKind::Manager])
            .into_iter()
            .filter_map(|m| self.as_manager(m).map(|m| m.name.clone()))
            .collect()
    }

    pub fn managed_names(&self, protocol: NodeId) -> Vec<String> {
        self.children_of_kind(protocol, &[NodeKind::Managed])
            .into_iter()
            .filter_map(|m| self.as_managed(m).map(|m| m.name.clone()))
            .collect()
    }
}
