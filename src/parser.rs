//! Parse IPDL source into an [`Ast`] using PEST, and resolve includes.

use crate::ast::*;
use crate::error::ParseError;
use crate::state::{Direction, Nesting, Priority, SendSemantics, State, Transition, Trigger};
use pest::Parser as _;
use pest_derive::Parser as PestParser;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(PestParser)]
#[grammar = "ipdl.pest"]
struct IpdlParser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

/// Types every translation unit can use without a `using` statement:
/// IPDL spelling and the header that declares it.
pub const BUILTIN_TYPES: &[(&str, &str)] = &[
    ("bool", ""),
    ("char", ""),
    ("short", ""),
    ("int", ""),
    ("long", ""),
    ("float", ""),
    ("double", ""),
    ("int8_t", "stdint.h"),
    ("uint8_t", "stdint.h"),
    ("int16_t", "stdint.h"),
    ("uint16_t", "stdint.h"),
    ("int32_t", "stdint.h"),
    ("uint32_t", "stdint.h"),
    ("int64_t", "stdint.h"),
    ("uint64_t", "stdint.h"),
    ("intptr_t", "stdint.h"),
    ("uintptr_t", "stdint.h"),
    ("size_t", "stddef.h"),
    ("nsresult", "nscore.h"),
    ("nsString", "nsString.h"),
    ("nsCString", "nsString.h"),
    ("mozilla::ipc::Shmem", "mozilla/ipc/Shmem.h"),
    ("mozilla::ipc::ByteBuf", "mozilla/ipc/ByteBuf.h"),
    ("mozilla::ipc::FileDescriptor", "mozilla/ipc/FileDescriptor.h"),
];

/// Parse one file without resolving its includes.
pub fn parse(source: &str, filename: impl AsRef<Path>) -> Result<Ast, ParseError> {
    let path = filename.as_ref();
    let syntax = |message: String| ParseError::Syntax { file: path.to_path_buf(), message };
    let pairs = IpdlParser::parse(Rule::translation_unit, source)
        .map_err(|e| syntax(format!("Parse error: {}", e)))?;
    let pair = pairs.into_iter().next().ok_or_else(|| syntax("Empty parse".to_string()))?;
    let mut builder = Builder::new(path);
    let root = builder.build_translation_unit(pair).map_err(syntax)?;
    builder.ast.set_root(root);
    Ok(builder.ast)
}

/// Parsed files reachable through includes, keyed by canonical path.
#[derive(Debug, Clone, Default)]
pub struct IncludeCache {
    units: HashMap<PathBuf, Arc<Ast>>,
}

impl IncludeCache {
    pub fn get(&self, path: &Path) -> Option<&Arc<Ast>> {
        self.units.get(path)
    }

    pub fn insert(&mut self, path: PathBuf, ast: Arc<Ast>) {
        self.units.insert(path, ast);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// The file an `Include` node of `ast` points at.
    pub fn resolve(&self, ast: &Ast, include: NodeId) -> Option<&Arc<Ast>> {
        let path = ast.as_include(include)?.path.as_ref()?;
        self.get(path)
    }
}

/// Parser with include resolution. Each included file is parsed once per
/// `Parser`; include cycles are cut with an in-progress set.
#[derive(Debug, Default)]
pub struct Parser {
    include_dirs: Vec<PathBuf>,
    cache: IncludeCache,
    in_progress: HashSet<PathBuf>,
}

impl Parser {
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Parser { include_dirs, cache: IncludeCache::default(), in_progress: HashSet::new() }
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<Ast, ParseError> {
        let source = read_source(path)?;
        self.parse(&source, path)
    }

    pub fn parse(&mut self, source: &str, filename: &Path) -> Result<Ast, ParseError> {
        let key = canonical(filename);
        let mut ast = parse(source, filename)?;
        self.in_progress.insert(key.clone());
        let resolved = self.resolve_includes(&mut ast);
        self.in_progress.remove(&key);
        resolved?;
        self.cache.insert(key, Arc::new(ast.clone()));
        Ok(ast)
    }

    pub fn includes(&self) -> &IncludeCache {
        &self.cache
    }

    pub fn into_includes(self) -> IncludeCache {
        self.cache
    }

    fn resolve_includes(&mut self, ast: &mut Ast) -> Result<(), ParseError> {
        let root = ast.root();
        let base_dir = ast.filename().parent().map(Path::to_path_buf);
        for id in ast.children_of_kind(root, &[NodeKind::Include]) {
            let (name, file_name) = match ast.as_include(id) {
                Some(inc) => (inc.name.clone(), inc.file_name()),
                None => continue,
            };
            let path = self.locate(&file_name, base_dir.as_deref()).ok_or_else(|| {
                ParseError::IncludeNotFound {
                    location: ast.loc(id).clone(),
                    name: name.clone(),
                    file_name: file_name.clone(),
                }
            })?;
            if let NodeData::Include(inc) = &mut ast.node_mut(id).data {
                inc.path = Some(path.clone());
            }
            if self.cache.get(&path).is_some() || self.in_progress.contains(&path) {
                continue;
            }
            debug!("parsing include {} ({})", name, path.display());
            let source = read_source(&path)?;
            let mut included = parse(&source, &path)?;
            self.in_progress.insert(path.clone());
            let resolved = self.resolve_includes(&mut included);
            self.in_progress.remove(&path);
            resolved?;
            self.cache.insert(path, Arc::new(included));
        }
        Ok(())
    }

    fn locate(&self, file_name: &str, base_dir: Option<&Path>) -> Option<PathBuf> {
        base_dir
            .into_iter()
            .chain(self.include_dirs.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(file_name))
            .find(|candidate| candidate.is_file())
            .map(|found| canonical(&found))
    }
}

fn read_source(path: &Path) -> Result<String, ParseError> {
    fs::read_to_string(path).map_err(|source| ParseError::Io { path: path.to_path_buf(), source })
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Declarations collected while walking nested namespaces.
#[derive(Default)]
struct TopLevel {
    decls: Vec<NodeId>,
    usings: Vec<NodeId>,
    protocols: Vec<NodeId>,
}

struct Builder {
    ast: Ast,
    file: Arc<str>,
    path: PathBuf,
}

impl Builder {
    fn new(path: &Path) -> Self {
        Builder {
            ast: Ast::new(path),
            file: Arc::from(path.display().to_string()),
            path: path.to_path_buf(),
        }
    }

    fn loc(&self, pair: &Pair) -> Loc {
        Loc::new(self.file.clone(), pair.as_span().start_pos().line_col().0)
    }

    fn build_translation_unit(&mut self, pair: Pair) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let file_type = FileType::from_path(&self.path)
            .ok_or_else(|| format!("{}: expected a .ipdl or .ipdlh file", self.file))?;
        let name = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| format!("{}: bad file name", self.file))?
            .to_string();

        let mut cxx_includes = Vec::new();
        let mut includes = Vec::new();
        let mut top = TopLevel::default();

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::cxx_include => {
                    let loc = self.loc(&inner);
                    let lit = inner
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::string_lit)
                        .ok_or("include: missing file name")?;
                    let data = NodeData::CxxInclude(CxxInclude { file: unquote(lit.as_str()) });
                    cxx_includes.push(self.ast.add_leaf(data, loc));
                }
                Rule::protocol_include | Rule::header_include => {
                    let kind = if inner.as_rule() == Rule::protocol_include {
                        IncludeKind::Protocol
                    } else {
                        IncludeKind::Header
                    };
                    let loc = self.loc(&inner);
                    let name = first_ident(inner).ok_or("include: missing name")?;
                    let data = NodeData::Include(Include { kind, name, path: None });
                    includes.push(self.ast.add_leaf(data, loc));
                }
                Rule::using_stmt => top.usings.push(self.build_using(inner)?),
                Rule::namespace_block
                | Rule::struct_decl
                | Rule::union_decl
                | Rule::protocol_decl => self.build_top_decl(inner, &mut Vec::new(), &mut top)?,
                _ => {}
            }
        }

        if top.protocols.len() > 1 {
            return Err(format!("{}: only one protocol definition per file", self.file));
        }

        let mut builtin_usings = Vec::with_capacity(BUILTIN_TYPES.len());
        for (name, header) in BUILTIN_TYPES {
            builtin_usings.push(self.builtin_using(name, header));
        }

        let items = cxx_includes
            .into_iter()
            .chain(includes)
            .chain(top.decls)
            .chain(builtin_usings)
            .chain(top.usings)
            .chain(top.protocols)
            .map(Item::Child)
            .collect();
        Ok(self.ast.add_node(
            NodeData::TranslationUnit(TranslationUnit { name, file_type }),
            loc,
            items,
        ))
    }

    fn build_top_decl(&mut self, pair: Pair, namespaces: &mut Vec<String>, top: &mut TopLevel) -> Result<(), String> {
        match pair.as_rule() {
            Rule::namespace_block => {
                let mut inner = pair.into_inner().filter(|p| p.as_rule() != Rule::kw_namespace);
                let name = inner.next().ok_or("namespace: missing name")?.as_str().to_string();
                namespaces.push(name);
                for decl in inner {
                    self.build_top_decl(decl, namespaces, top)?;
                }
                namespaces.pop();
            }
            Rule::struct_decl => top.decls.push(self.build_struct(pair, namespaces)?),
            Rule::union_decl => top.decls.push(self.build_union(pair, namespaces)?),
            Rule::protocol_decl => top.protocols.push(self.build_protocol(pair, namespaces)?),
            Rule::using_stmt => top.usings.push(self.build_using(pair)?),
            other => return Err(format!("unexpected top-level rule: {:?}", other)),
        }
        Ok(())
    }

    fn builtin_using(&mut self, name: &str, header: &str) -> NodeId {
        let mut parts = name.split("::");
        let mut type_id = QualifiedId::new(Loc::builtin(), parts.next().unwrap_or(name));
        for part in parts {
            type_id.qualify(part);
        }
        let data = NodeData::UsingStmt(UsingStmt {
            type_id,
            header: header.to_string(),
            kind: None,
            refcounted: false,
            builtin: true,
        });
        self.ast.add_leaf(data, Loc::builtin())
    }

    fn build_using(&mut self, pair: Pair) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let mut items = Vec::new();
        let mut type_id = None;
        let mut header = None;
        let mut kind = None;
        let mut refcounted = false;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::attributes => items.extend(build_attributes(inner)?),
                Rule::kw_refcounted => refcounted = true,
                Rule::using_kind => {
                    kind = Some(if inner.as_str() == "class" { UsingKind::Class } else { UsingKind::Struct })
                }
                Rule::qualified_id => type_id = Some(self.build_qualified_id(inner)?),
                Rule::string_lit => header = Some(unquote(inner.as_str())),
                _ => {}
            }
        }
        let data = NodeData::UsingStmt(UsingStmt {
            type_id: type_id.ok_or("using: missing type")?,
            header: header.ok_or("using: missing header")?,
            kind,
            refcounted,
            builtin: false,
        });
        Ok(self.ast.add_node(data, loc, items))
    }

    fn build_struct(&mut self, pair: Pair, namespaces: &[String]) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let mut items = Vec::new();
        let mut name = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::attributes => items.extend(build_attributes(inner)?),
                Rule::ident => name = Some(inner.as_str().to_string()),
                Rule::struct_field => items.push(Item::Child(self.build_struct_field(inner)?)),
                _ => {}
            }
        }
        let data = NodeData::StructDecl(StructDecl {
            name: name.ok_or("struct: missing name")?,
            namespaces: namespaces.to_vec(),
        });
        Ok(self.ast.add_node(data, loc, items))
    }

    fn build_struct_field(&mut self, pair: Pair) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let mut type_spec = None;
        let mut name = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::type_spec => type_spec = Some(self.build_type_spec(inner)?),
                Rule::ident => name = Some(inner.as_str().to_string()),
                _ => {}
            }
        }
        let data = NodeData::StructField(StructField { name: name.ok_or("struct field: missing name")? });
        let type_spec = type_spec.ok_or("struct field: missing type")?;
        Ok(self.ast.add_node(data, loc, vec![Item::Child(type_spec)]))
    }

    fn build_union(&mut self, pair: Pair, namespaces: &[String]) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let mut items = Vec::new();
        let mut name = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::attributes => items.extend(build_attributes(inner)?),
                Rule::ident => name = Some(inner.as_str().to_string()),
                Rule::type_spec => items.push(Item::Child(self.build_type_spec(inner)?)),
                _ => {}
            }
        }
        let data = NodeData::UnionDecl(UnionDecl {
            name: name.ok_or("union: missing name")?,
            namespaces: namespaces.to_vec(),
        });
        Ok(self.ast.add_node(data, loc, items))
    }

    fn build_type_spec(&mut self, pair: Pair) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let mut nullable = false;
        let mut array = false;
        let mut spec = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::kw_nullable => nullable = true,
                Rule::qualified_id => spec = Some(self.build_qualified_id(inner)?),
                Rule::array_suffix => array = true,
                _ => {}
            }
        }
        let data = NodeData::TypeSpec(TypeSpec { spec: spec.ok_or("type: missing name")?, array, nullable });
        Ok(self.ast.add_leaf(data, loc))
    }

    fn build_qualified_id(&self, pair: Pair) -> Result<QualifiedId, String> {
        let loc = self.loc(&pair);
        let mut parts = pair.into_inner().filter(|p| p.as_rule() == Rule::ident);
        let first = parts.next().ok_or("qualified id: empty")?;
        let mut id = QualifiedId::new(loc, first.as_str());
        for part in parts {
            id.qualify(part.as_str());
        }
        Ok(id)
    }

    // ==================== Protocol ====================

    fn build_protocol(&mut self, pair: Pair, namespaces: &[String]) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let mut attrs = Vec::new();
        let mut name = None;
        let mut send_semantics = SendSemantics::Async;
        let mut nested = Nesting::NotNested;
        let mut relations = Vec::new();
        let mut managers = Vec::new();
        let mut manages = Vec::new();
        let mut messages = Vec::new();
        let mut transitions = Vec::new();

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::attributes => attrs.extend(build_attributes(inner)?),
                Rule::send_semantics => send_semantics = parse_send_semantics(inner.as_str())?,
                Rule::nested_spec => nested = parse_nested(inner)?,
                Rule::ident => name = Some(inner.as_str().to_string()),
                Rule::spawns_stmt | Rule::bridges_stmt | Rule::opens_stmt => {
                    relations.push(self.build_relation(inner)?)
                }
                Rule::manager_stmt => {
                    for (loc, name) in self.idents_with_loc(inner) {
                        managers.push(self.ast.add_leaf(NodeData::Manager(Manager { name }), loc));
                    }
                }
                Rule::manages_stmt => {
                    let loc = self.loc(&inner);
                    let name = first_ident(inner).ok_or("manages: missing protocol")?;
                    manages.push(self.ast.add_leaf(NodeData::Managed(Managed { name }), loc));
                }
                Rule::message_section => {
                    let mut parts = inner.into_inner();
                    let label = parts.next().ok_or("message section: missing direction")?;
                    let direction = Direction::from_section(label.as_str())
                        .ok_or_else(|| format!("unknown message section `{}`", label.as_str()))?;
                    for decl in parts.filter(|p| p.as_rule() == Rule::message_decl) {
                        messages.push(self.build_message(decl, direction)?);
                    }
                }
                Rule::transition_stmt => transitions.push(self.build_transition_stmt(inner)?),
                _ => {}
            }
        }

        let mut items: Vec<Item> = attrs;
        for ns in namespaces {
            let data = NodeData::Namespace(Namespace { name: ns.clone() });
            items.push(Item::Child(self.ast.add_leaf(data, loc.clone())));
        }
        // Relations are stored spawns, bridges, opens regardless of source order.
        for kind in [NodeKind::Spawns, NodeKind::Bridges, NodeKind::Opens] {
            items.extend(
                relations
                    .iter()
                    .copied()
                    .filter(|&id| self.ast.kind(id) == kind)
                    .map(Item::Child),
            );
        }
        items.extend(
            managers
                .into_iter()
                .chain(manages)
                .chain(messages)
                .chain(transitions)
                .map(Item::Child),
        );

        let data = NodeData::Protocol(Protocol {
            name: name.ok_or("protocol: missing name")?,
            send_semantics,
            nested,
        });
        Ok(self.ast.add_node(data, loc, items))
    }

    fn idents_with_loc(&self, pair: Pair) -> Vec<(Loc, String)> {
        pair.into_inner()
            .filter(|p| p.as_rule() == Rule::ident)
            .map(|p| (self.loc(&p), p.as_str().to_string()))
            .collect()
    }

    fn build_relation(&mut self, pair: Pair) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let rule = pair.as_rule();
        let mut sides = Vec::new();
        let mut names = Vec::new();
        let mut side_before_name = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::side => {
                    let side = Side::from_keyword(inner.as_str()).ok_or("unknown side")?;
                    if names.is_empty() {
                        side_before_name = Some(side);
                    } else {
                        sides.push(side);
                    }
                }
                Rule::ident => names.push(inner.as_str().to_string()),
                _ => {}
            }
        }
        let mut names = names.into_iter();
        let data = match rule {
            Rule::spawns_stmt => NodeData::Spawns(Spawns {
                side: side_before_name,
                protocol: names.next().ok_or("spawns: missing protocol")?,
                spawned_as: sides.first().copied(),
            }),
            Rule::bridges_stmt => NodeData::Bridges(Bridges {
                parent_side: names.next().ok_or("bridges: missing parent side")?,
                child_side: names.next().ok_or("bridges: missing child side")?,
            }),
            Rule::opens_stmt => NodeData::Opens(Opens {
                side: side_before_name,
                protocol: names.next().ok_or("opens: missing protocol")?,
            }),
            other => return Err(format!("unexpected relation rule: {:?}", other)),
        };
        Ok(self.ast.add_leaf(data, loc))
    }

    fn build_message(&mut self, pair: Pair, direction: Direction) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let mut items = Vec::new();
        let mut name = None;
        let mut send_semantics = None;
        let mut nested = Nesting::NotNested;
        let mut priority = Priority::Normal;
        let mut modifiers = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::attributes => items.extend(build_attributes(inner)?),
                Rule::nested_spec => nested = parse_nested(inner)?,
                Rule::prio_spec => priority = parse_priority(inner)?,
                Rule::send_semantics => send_semantics = Some(parse_send_semantics(inner.as_str())?),
                Rule::ident => name = Some(inner.as_str().to_string()),
                Rule::in_params => items.extend(self.build_params(inner, ParamRole::In)?),
                Rule::out_params => items.extend(self.build_params(inner, ParamRole::Out)?),
                Rule::message_modifier => {
                    let m = Modifier::from_keyword(inner.as_str())
                        .ok_or_else(|| format!("unknown modifier `{}`", inner.as_str()))?;
                    modifiers.push(m);
                }
                _ => {}
            }
        }
        let data = NodeData::MessageDecl(MessageDecl {
            name: name.ok_or("message: missing name")?,
            send_semantics: send_semantics.ok_or("message: missing send semantics")?,
            nested,
            priority,
            direction,
            modifiers,
        });
        Ok(self.ast.add_node(data, loc, items))
    }

    fn build_params(&mut self, pair: Pair, role: ParamRole) -> Result<Vec<Item>, String> {
        let mut params = Vec::new();
        for param in pair.into_inner().filter(|p| p.as_rule() == Rule::param) {
            let loc = self.loc(&param);
            let mut type_spec = None;
            let mut name = None;
            for inner in param.into_inner() {
                match inner.as_rule() {
                    Rule::type_spec => type_spec = Some(self.build_type_spec(inner)?),
                    Rule::ident => name = Some(inner.as_str().to_string()),
                    _ => {}
                }
            }
            let data = NodeData::Param(Param { name: name.ok_or("param: missing name")?, role });
            let type_spec = type_spec.ok_or("param: missing type")?;
            params.push(Item::Child(self.ast.add_node(data, loc, vec![Item::Child(type_spec)])));
        }
        Ok(params)
    }

    // ==================== State machine ====================

    fn build_transition_stmt(&mut self, pair: Pair) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let mut start = false;
        let mut state = None;
        let mut transitions = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::kw_start => start = true,
                Rule::ident => state = Some(State::from_source(inner.as_str(), start)),
                Rule::transition => transitions.push(inner),
                _ => {}
            }
        }
        let state = state.ok_or("state: missing name")?;
        let mut items = Vec::with_capacity(transitions.len().max(1));
        for t in transitions {
            items.push(Item::Child(self.build_transition(t, &state)?));
        }
        if items.is_empty() {
            let null = NodeData::Transition(Transition::null());
            items.push(Item::Child(self.ast.add_leaf(null, loc.clone())));
        }
        Ok(self.ast.add_node(NodeData::TransitionStmt(TransitionStmt { state }), loc, items))
    }

    fn build_transition(&mut self, pair: Pair, current: &State) -> Result<NodeId, String> {
        let loc = self.loc(&pair);
        let mut trigger = None;
        let mut msg = None;
        let mut to_states = Vec::new();
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::trigger => trigger = Trigger::from_keyword(inner.as_str()),
                Rule::ident if msg.is_none() => msg = Some(inner.as_str().to_string()),
                Rule::ident => to_states.push(State::from_source(inner.as_str(), false)),
                _ => {}
            }
        }
        let trigger = trigger.ok_or("transition: missing trigger")?;
        let msg = msg.ok_or("transition: missing message")?;
        if to_states.is_empty() {
            if msg == MessageDecl::DESTRUCTOR {
                to_states.push(State::DEAD);
            } else if current.is_any() {
                return Err(format!("{}: transition on `{}` from __Any__ needs an explicit goto", loc, msg));
            } else {
                to_states.push(State::new(current.name(), false));
            }
        }
        let data = NodeData::Transition(Transition::new(trigger, msg, to_states));
        Ok(self.ast.add_leaf(data, loc))
    }
}

fn build_attributes(pair: Pair) -> Result<Vec<Item>, String> {
    let mut out = Vec::new();
    for attr in pair.into_inner().filter(|p| p.as_rule() == Rule::attribute) {
        let mut inner = attr.into_inner();
        let name = inner.next().ok_or("attribute: missing name")?.as_str().to_string();
        let value = inner.next().map(|v| unquote(v.as_str()));
        out.push(Item::Attribute(Attribute { name, value }));
    }
    Ok(out)
}

fn parse_send_semantics(s: &str) -> Result<SendSemantics, String> {
    SendSemantics::from_keyword(s).ok_or_else(|| format!("Unknown send semantics: {}", s))
}

fn parse_nested(pair: Pair) -> Result<Nesting, String> {
    let level = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::nested_level)
        .ok_or("nested(...) needs a level")?;
    Nesting::from_keyword(level.as_str()).ok_or_else(|| format!("Unknown nesting: {}", level.as_str()))
}

fn parse_priority(pair: Pair) -> Result<Priority, String> {
    let level = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::prio_level)
        .ok_or("prio(...) needs a level")?;
    Priority::from_keyword(level.as_str()).ok_or_else(|| format!("Unknown priority: {}", level.as_str()))
}

fn first_ident(pair: Pair) -> Option<String> {
    pair.into_inner()
        .find(|p| p.as_rule() == Rule::ident)
        .map(|p| p.as_str().to_string())
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_usings_come_first() {
        let ast = parse("using class mozilla::Foo from \"mozilla/Foo.h\";", "Shared.ipdlh").expect("parse");
        let usings = ast.children_of_kind(ast.root(), &[NodeKind::UsingStmt]);
        assert_eq!(usings.len(), BUILTIN_TYPES.len() + 1);
        let last = ast.as_using_stmt(*usings.last().expect("using")).expect("using stmt");
        assert!(!last.builtin);
        assert_eq!(last.type_id.full_name(), "mozilla::Foo");
        assert_eq!(last.kind, Some(UsingKind::Class));
        assert!(ast.as_using_stmt(usings[0]).map(|u| u.builtin).unwrap_or(false));
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = parse("", "foo.txt").unwrap_err();
        assert!(err.to_string().contains(".ipdl"));
    }

    #[test]
    fn keywords_are_reserved() {
        assert!(parse("protocol state { };", "state.ipdl").is_err());
        assert!(parse("struct S { int32_t asyncValue; };", "S.ipdlh").is_ok());
    }

    #[test]
    fn implicit_goto() {
        let src = r#"
protocol PT {
child:
  async Ping();
  async __delete__();
start state A:
  send Ping;
  send __delete__;
};
"#;
        let ast = parse(src, "PT.ipdl").expect("parse");
        let (proto, _) = ast.protocol().expect("protocol");
        let stmt = ast.children_of_kind(proto, &[NodeKind::TransitionStmt])[0];
        let ts: Vec<_> = ast
            .children_of_kind(stmt, &[NodeKind::Transition])
            .into_iter()
            .filter_map(|t| ast.as_transition(t).cloned())
            .collect();
        assert_eq!(ts[0].to_states, vec![State::new("A", false)]);
        assert_eq!(ts[1].to_states, vec![State::DEAD]);
    }

    #[test]
    fn any_state_requires_goto() {
        let src = "protocol PT { child: async Ping(); state __Any__: send Ping; };";
        assert!(parse(src, "PT.ipdl").is_err());
    }
}
