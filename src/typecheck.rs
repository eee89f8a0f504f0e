//! Semantic validation and decoration of a parsed translation unit.
//!
//! Checking runs as a [`Visitor`] over a shared borrow of the tree and
//! records decorations as it goes; they are written back once the walk is
//! over. The error count lands on the translation unit root.

use crate::ast::*;
use crate::error::{Diagnostic, Diagnostics};
use crate::parser::IncludeCache;
use crate::state::{Nesting, SendSemantics, State, StateMachine};
use crate::visit::{self, Visitor};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Check `ast` against the files it includes and decorate it in place.
pub fn typecheck(ast: &mut Ast, includes: &IncludeCache) -> Result<(), Diagnostics> {
    let outcome = {
        let tree: &Ast = ast;
        let mut checker = Checker::new(tree, includes);
        visit::accept(&mut checker, tree, tree.root());
        checker.finish()
    };

    for (id, update) in outcome.updates {
        update.apply(&mut ast.node_mut(id).decor);
    }
    if let Some(protocol) = ast.protocol().map(|(id, _)| id) {
        for state in outcome.terminal_sentinels {
            let stmt = ast.null_transition_stmt(state);
            ast.attach_child(protocol, stmt);
        }
    }
    let root = ast.root();
    ast.node_mut(root).decor.errors = outcome.diagnostics.len();
    debug!("{}: {} type error(s)", ast.filename().display(), outcome.diagnostics.len());
    outcome.diagnostics.into_result()
}

enum Update {
    Shortname(String),
    Fullname(String),
    Progname(String),
    Resolved(TypeRef),
}

impl Update {
    fn apply(self, decor: &mut Decorations) {
        match self {
            Update::Shortname(s) => decor.shortname = Some(s),
            Update::Fullname(s) => decor.fullname = Some(s),
            Update::Progname(s) => decor.progname = Some(s),
            Update::Resolved(t) => decor.resolved = Some(t),
        }
    }
}

struct Outcome {
    diagnostics: Diagnostics,
    updates: Vec<(NodeId, Update)>,
    terminal_sentinels: Vec<State>,
}

/// Facts about the protocol being checked, gathered before its children
/// are visited.
struct ProtocolScope {
    name: String,
    send_semantics: SendSemantics,
    nested: Nesting,
    messages: HashMap<String, NodeId>,
    states: HashSet<String>,
}

struct Checker<'a> {
    includes: &'a IncludeCache,
    /// Type name (base and fully qualified spellings) to its resolution.
    types: HashMap<String, TypeRef>,
    /// Known protocol names, with the parsed file when one was included.
    protocols: HashMap<String, Option<Arc<Ast>>>,
    scope: Option<ProtocolScope>,
    sentinels: BTreeSet<State>,
    diagnostics: Vec<Diagnostic>,
    updates: Vec<(NodeId, Update)>,
}

impl<'a> Checker<'a> {
    fn new(ast: &Ast, includes: &'a IncludeCache) -> Self {
        let mut checker = Checker {
            includes,
            types: HashMap::new(),
            protocols: HashMap::new(),
            scope: None,
            sentinels: BTreeSet::new(),
            diagnostics: Vec::new(),
            updates: Vec::new(),
        };
        checker.declare_local_types(ast);
        let mut seen = HashSet::new();
        checker.import_types(ast, &mut seen);
        if let Some((id, p)) = ast.protocol() {
            let qualified = ast.qualified_protocol_name(id).unwrap_or_else(|| p.name.clone());
            checker.declare_protocol(&p.name, &qualified, None);
        }
        checker
    }

    fn finish(self) -> Outcome {
        Outcome {
            diagnostics: Diagnostics(self.diagnostics),
            updates: self.updates,
            terminal_sentinels: self.sentinels.into_iter().collect(),
        }
    }

    fn error(&mut self, loc: &Loc, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(loc.clone(), message));
    }

    fn decorate(&mut self, id: NodeId, update: Update) {
        self.updates.push((id, update));
    }

    fn declare_protocol(&mut self, name: &str, qualified: &str, file: Option<Arc<Ast>>) {
        let actor = TypeRef::Actor(name.to_string());
        self.types.insert(name.to_string(), actor.clone());
        self.types.insert(qualified.to_string(), actor);
        self.protocols.insert(name.to_string(), file);
    }

    /// Structs, unions and usings of the file being checked. Every name may
    /// be declared once.
    fn declare_local_types(&mut self, ast: &Ast) {
        let root = ast.root();
        let mut declared: HashMap<String, Loc> = HashMap::new();
        let kinds = [NodeKind::StructDecl, NodeKind::UnionDecl, NodeKind::UsingStmt];
        for id in ast.children_of_kind(root, &kinds) {
            let Some((base, full, resolved)) = type_decl(ast, id) else { continue };
            let builtin = ast.as_using_stmt(id).map(|u| u.builtin).unwrap_or(false);
            if !builtin {
                if let Some(previous) = declared.get(&base) {
                    let message = format!("duplicate declaration of type `{}` (first declared at {})", base, previous);
                    self.error(&ast.loc(id).clone(), message);
                    continue;
                }
                declared.insert(base.clone(), ast.loc(id).clone());
            }
            self.types.insert(base, resolved.clone());
            self.types.insert(full, resolved);
        }
    }

    /// Types exported by included headers (transitively) and the protocols
    /// named by protocol includes.
    fn import_types(&mut self, ast: &Ast, seen: &mut HashSet<PathBuf>) {
        let root = ast.root();
        for inc in ast.children_of_kind(root, &[NodeKind::Include]) {
            let (Some(include), Some(file)) = (ast.as_include(inc), self.includes.resolve(ast, inc)) else {
                continue;
            };
            let file = Arc::clone(file);
            if !seen.insert(file.filename().to_path_buf()) {
                continue;
            }
            match include.kind {
                IncludeKind::Protocol => {
                    if let Some((id, p)) = file.protocol() {
                        let qualified = file.qualified_protocol_name(id).unwrap_or_else(|| p.name.clone());
                        let name = p.name.clone();
                        self.declare_protocol(&name, &qualified, Some(Arc::clone(&file)));
                    }
                }
                IncludeKind::Header => {
                    let kinds = [NodeKind::StructDecl, NodeKind::UnionDecl, NodeKind::UsingStmt];
                    for id in file.children_of_kind(file.root(), &kinds) {
                        if file.as_using_stmt(id).map(|u| u.builtin).unwrap_or(false) {
                            continue;
                        }
                        if let Some((base, full, resolved)) = type_decl(&file, id) {
                            self.types.entry(base).or_insert_with(|| resolved.clone());
                            self.types.entry(full).or_insert(resolved);
                        }
                    }
                    self.import_types(&file, seen);
                }
            }
        }
    }

    fn protocol_file(&self, name: &str) -> Option<Arc<Ast>> {
        self.protocols.get(name).cloned().flatten()
    }

    fn check_protocol_name(&mut self, ast: &Ast, id: NodeId, name: &str, what: &str) {
        if !self.protocols.contains_key(name) {
            let message = format!("{} `{}` is not a known protocol; is it included?", what, name);
            self.error(&ast.loc(id).clone(), message);
        }
    }

    fn scope_name(&self) -> String {
        self.scope.as_ref().map(|s| s.name.clone()).unwrap_or_default()
    }
}

/// Base name, fully qualified name and resolution of a struct, union or
/// using declaration.
fn type_decl(ast: &Ast, id: NodeId) -> Option<(String, String, TypeRef)> {
    match &ast.node(id).data {
        NodeData::StructDecl(s) => {
            let full = qualify(&s.namespaces, &s.name);
            Some((s.name.clone(), full.clone(), TypeRef::Struct(full)))
        }
        NodeData::UnionDecl(u) => {
            let full = qualify(&u.namespaces, &u.name);
            Some((u.name.clone(), full.clone(), TypeRef::Union(full)))
        }
        NodeData::UsingStmt(u) => {
            let full = u.type_id.full_name();
            let resolved = if u.builtin { TypeRef::Builtin(full.clone()) } else { TypeRef::Imported(full.clone()) };
            Some((u.type_id.base_id().to_string(), full, resolved))
        }
        _ => None,
    }
}

fn qualify(namespaces: &[String], name: &str) -> String {
    namespaces
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(name))
        .collect::<Vec<_>>()
        .join("::")
}

fn type_spelling(ts: &TypeSpec) -> String {
    let mut s = ts.spec.full_name();
    if ts.array {
        s.push_str("[]");
    }
    s
}

impl Visitor for Checker<'_> {
    fn visit_translation_unit(&mut self, ast: &Ast, id: NodeId) {
        if let Some(tu) = ast.as_translation_unit(id) {
            let protocols = ast.children_of_kind(id, &[NodeKind::Protocol]);
            match tu.file_type {
                FileType::Protocol => match ast.protocol() {
                    None => self.error(ast.loc(id), "protocol file must define a protocol"),
                    Some((pid, p)) if p.name != tu.name => {
                        let message =
                            format!("protocol `{}` must be defined in a file named `{}.ipdl`", p.name, p.name);
                        self.error(ast.loc(pid), message);
                    }
                    Some(_) => {}
                },
                FileType::Header => {
                    if let Some(&pid) = protocols.first() {
                        self.error(ast.loc(pid), "header files (.ipdlh) may not define protocols");
                    }
                }
            }
        }
        visit::walk_translation_unit(self, ast, id);
    }

    fn visit_include(&mut self, ast: &Ast, id: NodeId) {
        let Some(include) = ast.as_include(id) else { return };
        let Some(file) = self.includes.resolve(ast, id) else {
            let message = format!("can't locate include file `{}`", include.file_name());
            self.error(ast.loc(id), message);
            return;
        };
        let wanted = match include.kind {
            IncludeKind::Protocol => FileType::Protocol,
            IncludeKind::Header => FileType::Header,
        };
        if file.translation_unit().map(|tu| tu.file_type) != Some(wanted) {
            let message = format!("`{}` does not name a file of the expected kind", include.name);
            self.error(ast.loc(id), message);
        }
    }

    fn visit_struct_decl(&mut self, ast: &Ast, id: NodeId) {
        let Some(decl) = ast.as_struct_decl(id) else { return };
        self.decorate(id, Update::Fullname(qualify(&decl.namespaces, &decl.name)));
        let mut fields = HashSet::new();
        for field in ast.children_of_kind(id, &[NodeKind::StructField]) {
            if let Some(f) = ast.as_struct_field(field) {
                if !fields.insert(f.name.as_str()) {
                    let message = format!("duplicate field `{}` in struct `{}`", f.name, decl.name);
                    self.error(ast.loc(field), message);
                }
            }
        }
        visit::walk_children(self, ast, id, &[NodeKind::StructField]);
    }

    fn visit_struct_field(&mut self, ast: &Ast, id: NodeId) {
        visit::walk_children(self, ast, id, &[NodeKind::TypeSpec]);
    }

    fn visit_union_decl(&mut self, ast: &Ast, id: NodeId) {
        let Some(decl) = ast.as_union_decl(id) else { return };
        self.decorate(id, Update::Fullname(qualify(&decl.namespaces, &decl.name)));
        let mut members = HashSet::new();
        for member in ast.children_of_kind(id, &[NodeKind::TypeSpec]) {
            if let Some(ts) = ast.as_type_spec(member) {
                let spelling = type_spelling(ts);
                if !members.insert(spelling.clone()) {
                    let message = format!("duplicate type `{}` in union `{}`", spelling, decl.name);
                    self.error(ast.loc(member), message);
                }
            }
        }
        visit::walk_children(self, ast, id, &[NodeKind::TypeSpec]);
    }

    fn visit_type_spec(&mut self, ast: &Ast, id: NodeId) {
        let Some(ts) = ast.as_type_spec(id) else { return };
        let name = ts.spec.full_name();
        match self.types.get(&name).cloned() {
            None => self.error(ast.loc(id), format!("unknown type `{}`", name)),
            Some(resolved) => {
                if ts.nullable && !resolved.is_actor() {
                    let message = format!("`nullable` is only valid on actor types, not `{}`", name);
                    self.error(ast.loc(id), message);
                }
                self.decorate(id, Update::Resolved(resolved));
            }
        }
    }

    fn visit_protocol(&mut self, ast: &Ast, id: NodeId) {
        let Some(protocol) = ast.as_protocol(id) else { return };
        let fullname = ast.qualified_protocol_name(id).unwrap_or_else(|| protocol.name.clone());
        self.decorate(id, Update::Shortname(protocol.name.clone()));
        self.decorate(id, Update::Fullname(fullname));

        let mut messages = HashMap::new();
        for (mid, msg) in ast.messages(id) {
            if messages.insert(msg.name.clone(), mid).is_some() {
                let message = format!("duplicate message `{}` in protocol `{}`", msg.name, protocol.name);
                self.error(ast.loc(mid), message);
            }
        }

        let mut states = HashSet::new();
        for stmt in ast.children_of_kind(id, &[NodeKind::TransitionStmt]) {
            let Some(s) = ast.as_transition_stmt(stmt) else { continue };
            if s.state.is_dead() {
                self.error(ast.loc(stmt), "`__Dead__` cannot have outgoing transitions");
                continue;
            }
            if !states.insert(s.state.name().to_string()) {
                let message = format!("state `{}` is declared more than once", s.state.name());
                self.error(ast.loc(stmt), message);
            }
        }

        let managers = ast.manager_names(id);
        let has_dtor = messages.contains_key(MessageDecl::DESTRUCTOR);
        if managers.is_empty() && has_dtor {
            let message = format!("top-level protocol `{}` cannot declare `__delete__`", protocol.name);
            self.error(ast.loc(id), message);
        }
        if !managers.is_empty() && !has_dtor {
            let message = format!("managed protocol `{}` must declare `__delete__`", protocol.name);
            self.error(ast.loc(id), message);
        }

        self.scope = Some(ProtocolScope {
            name: protocol.name.clone(),
            send_semantics: protocol.send_semantics,
            nested: protocol.nested,
            messages,
            states,
        });
        visit::walk_protocol(self, ast, id);

        let machine = StateMachine::of_protocol(ast, id);
        let declared: Vec<String> = machine
            .states()
            .filter(|s| !s.is_sentinel())
            .map(|s| s.name().to_string())
            .collect();
        if !declared.is_empty() {
            if machine.start_states().is_empty() {
                self.error(ast.loc(id), format!("protocol `{}` declares states but no start state", protocol.name));
            } else {
                let reachable = machine.reachable();
                for state in declared.iter().filter(|s| !reachable.contains(*s)) {
                    warn!("{}: state `{}` of `{}` is unreachable", ast.loc(id), state, protocol.name);
                }
            }
        }
        self.scope = None;
    }

    fn visit_manager(&mut self, ast: &Ast, id: NodeId) {
        let Some(manager) = ast.as_manager(id) else { return };
        let me = self.scope_name();
        self.check_protocol_name(ast, id, &manager.name, "manager");
        if manager.name == me {
            return;
        }
        if let Some(file) = self.protocol_file(&manager.name) {
            let Some((pid, p)) = file.protocol() else { return };
            if !file.managed_names(pid).contains(&me) {
                let message = format!("`{}` declares `{}` as manager, but `{}` does not manage it", me, p.name, p.name);
                self.error(ast.loc(id), message);
            }
            let ours = self.scope.as_ref().map(|s| s.send_semantics).unwrap_or(SendSemantics::Async);
            if ours > p.send_semantics {
                let message = format!(
                    "`{}` ({}) may not be more synchronous than its manager `{}` ({})",
                    me, ours, p.name, p.send_semantics
                );
                self.error(ast.loc(id), message);
            }
        }
    }

    fn visit_managed(&mut self, ast: &Ast, id: NodeId) {
        let Some(managed) = ast.as_managed(id) else { return };
        let me = self.scope_name();
        self.check_protocol_name(ast, id, &managed.name, "managee");
        if managed.name == me {
            return;
        }
        if let Some(file) = self.protocol_file(&managed.name) {
            let Some((pid, p)) = file.protocol() else { return };
            if !file.manager_names(pid).contains(&me) {
                let message = format!("`{}` manages `{}`, but `{}` does not list it as a manager", me, p.name, p.name);
                self.error(ast.loc(id), message);
            }
        }
    }

    fn visit_spawns(&mut self, ast: &Ast, id: NodeId) {
        if let Some(s) = ast.as_spawns(id) {
            let name = s.protocol.clone();
            self.check_protocol_name(ast, id, &name, "spawned protocol");
        }
    }

    fn visit_bridges(&mut self, ast: &Ast, id: NodeId) {
        if let Some(b) = ast.as_bridges(id) {
            let (parent, child) = (b.parent_side.clone(), b.child_side.clone());
            self.check_protocol_name(ast, id, &parent, "bridged protocol");
            self.check_protocol_name(ast, id, &child, "bridged protocol");
        }
    }

    fn visit_opens(&mut self, ast: &Ast, id: NodeId) {
        if let Some(o) = ast.as_opens(id) {
            let name = o.protocol.clone();
            self.check_protocol_name(ast, id, &name, "opened protocol");
        }
    }

    fn visit_message_decl(&mut self, ast: &Ast, id: NodeId) {
        let Some(msg) = ast.as_message_decl(id) else { return };
        let loc = ast.loc(id);
        self.decorate(id, Update::Progname(msg.pretty_msg_name()));

        if let Some(scope) = &self.scope {
            let (proto, semantics, nested) = (scope.name.clone(), scope.send_semantics, scope.nested);
            if msg.send_semantics > semantics {
                let message = format!(
                    "message `{}` is {} but protocol `{}` is only {}",
                    msg.name, msg.send_semantics, proto, semantics
                );
                self.error(loc, message);
            }
            if msg.nested > nested {
                let message = format!(
                    "message `{}` is nested({}) but protocol `{}` only allows nested({})",
                    msg.name,
                    msg.nested.keyword(),
                    proto,
                    nested.keyword()
                );
                self.error(loc, message);
            }
        }

        let outs = ast.params(id, ParamRole::Out);
        if !msg.has_reply() && !outs.is_empty() {
            self.error(loc, format!("async message `{}` cannot return values", msg.name));
        }
        if msg.compress().is_some() && msg.has_reply() {
            self.error(loc, format!("only async messages can be compressed; `{}` is {}", msg.name, msg.send_semantics));
        }

        let mut names = HashSet::new();
        for (pid, param) in ast.params(id, ParamRole::In).into_iter().chain(outs) {
            if !names.insert(param.name.as_str()) {
                let message = format!("duplicate parameter `{}` in message `{}`", param.name, msg.name);
                self.error(ast.loc(pid), message);
            }
        }
        visit::walk_message_decl(self, ast, id);
    }

    fn visit_param(&mut self, ast: &Ast, id: NodeId) {
        visit::walk_children(self, ast, id, &[NodeKind::TypeSpec]);
    }

    fn visit_transition(&mut self, ast: &Ast, id: NodeId) {
        let Some(t) = ast.as_transition(id) else { return };
        let (Some(trigger), Some(msg_name)) = (t.trigger, t.msg.as_deref()) else { return };
        let loc = ast.loc(id);
        let Some(scope) = &self.scope else { return };

        let decl = scope.messages.get(msg_name).and_then(|&mid| ast.as_message_decl(mid));
        let Some(msg) = decl else {
            let message = format!("transition on undeclared message `{}`", msg_name);
            self.error(loc, message);
            return;
        };
        let mut problems = Vec::new();
        if !msg.direction.allows(trigger.direction()) {
            problems.push(format!(
                "`{}` cannot `{}` message `{}`: it is declared in the other direction",
                scope.name, trigger, msg.name
            ));
        }
        if trigger.is_blocking() && msg.send_semantics.is_async() {
            problems.push(format!("`{}` only applies to sync or intr messages; `{}` is async", trigger, msg.name));
        }
        if !trigger.is_blocking() && !msg.send_semantics.is_async() {
            problems.push(format!("`{}` only applies to async messages; `{}` is {}", trigger, msg.name, msg.send_semantics));
        }

        let mut sentinels = Vec::new();
        for to in &t.to_states {
            if to.is_any() {
                problems.push("`__Any__` cannot be a transition destination".to_string());
            } else if to.is_dead() || to.is_dying() {
                if msg.is_dtor() {
                    sentinels.push(to.clone());
                } else {
                    problems.push(format!("only `__delete__` may transition to `{}`", to.name()));
                }
            } else if !scope.states.contains(to.name()) {
                problems.push(format!("transition to undeclared state `{}`", to.name()));
            }
        }

        // The null statement is only added when the source didn't write one.
        sentinels.retain(|s| !scope.states.contains(s.name()));
        for problem in problems {
            self.error(loc, problem);
        }
        self.sentinels.extend(sentinels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check(src: &str, file: &str) -> (Ast, Result<(), Diagnostics>) {
        let mut ast = parse(src, file).expect("parse");
        let result = typecheck(&mut ast, &IncludeCache::default());
        (ast, result)
    }

    #[test]
    fn decorates_protocol_and_messages() {
        let src = r#"
namespace mozilla { namespace dom {
sync protocol PTest {
parent:
  sync Query(int32_t x) returns (bool ok);
  async Note(nsCString s);
};
} }
"#;
        let (ast, result) = check(src, "PTest.ipdl");
        result.expect("valid protocol");
        let (pid, _) = ast.protocol().expect("protocol");
        assert_eq!(ast.node(pid).decor.fullname.as_deref(), Some("mozilla::dom::PTest"));
        assert_eq!(ast.node(pid).decor.shortname.as_deref(), Some("PTest"));
        let (mid, _) = ast.messages(pid)[0];
        assert_eq!(ast.node(mid).decor.progname.as_deref(), Some("Msg_Query"));
        let (param, _) = ast.params(mid, ParamRole::In)[0];
        let (ts, _) = ast.type_spec_of(param).expect("type");
        assert_eq!(ast.node(ts).decor.resolved, Some(TypeRef::Builtin("int32_t".into())));
        assert_eq!(ast.node(ast.root()).decor.errors, 0);
    }

    #[test]
    fn counts_errors_on_root() {
        let src = "protocol PTest { parent: async A(Bogus b); async A(); };";
        let (ast, result) = check(src, "PTest.ipdl");
        let errors = result.unwrap_err();
        assert!(errors.contains("unknown type `Bogus`"));
        assert!(errors.contains("duplicate message `A`"));
        assert_eq!(ast.node(ast.root()).decor.errors, errors.len());
    }

    #[test]
    fn delete_to_dead_gets_null_stmt() {
        let src = r#"
protocol PTest {
  manager PTest;
child:
  async __delete__();
start state A:
  send __delete__;
};
"#;
        let (ast, result) = check(src, "PTest.ipdl");
        result.expect("valid protocol");
        let (pid, _) = ast.protocol().expect("protocol");
        let dead = ast
            .children_of_kind(pid, &[NodeKind::TransitionStmt])
            .into_iter()
            .filter_map(|s| ast.as_transition_stmt(s))
            .any(|s| s.state.is_dead());
        assert!(dead);
    }
}
