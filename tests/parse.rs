//! Parser tests: syntax acceptance and rejection, tree shape and include
//! resolution.

use ipdl::ast::{IncludeKind, NodeKind, ParamRole, Side};
use ipdl::parser::BUILTIN_TYPES;
use ipdl::{parse, Direction, Nesting, ParseError, Parser, Priority, SendSemantics, State, Trigger};
use std::fs;
use tempfile::TempDir;

// ==================== Syntax: valid programs ====================

#[test]
fn parse_empty_header() {
    let ast = parse("", "Empty.ipdlh").expect("empty header parses");
    assert!(ast.protocol().is_none());
    let root = ast.root();
    assert_eq!(ast.children_of_kind(root, &[NodeKind::UsingStmt]).len(), BUILTIN_TYPES.len());
}

#[test]
fn parse_minimal_protocol() {
    let ast = parse("protocol PFoo { child: async Bar(); };", "PFoo.ipdl").expect("parse");
    let (pid, p) = ast.protocol().expect("protocol");
    assert_eq!(p.name, "PFoo");
    assert_eq!(p.send_semantics, SendSemantics::Async);
    assert_eq!(p.nested, Nesting::NotNested);
    let messages = ast.messages(pid);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1.name, "Bar");
    assert_eq!(messages[0].1.direction, Direction::Out);
}

#[test]
fn parse_full_protocol() {
    let src = r#"
include protocol PManager;
include "mozilla/dom/Foo.h";

using refcounted class mozilla::dom::Foo from "mozilla/dom/Foo.h";
using struct mozilla::void_t from "mozilla/ipc/IPCCore.h";

namespace mozilla {
namespace dom {

[ChildImpl=virtual, ParentImpl="FooParent"]
nested(inside_cpow) intr protocol PFoo
{
  manager PManager or PFoo;
  manages PFoo;
  parent spawns PFoo as child;
  bridges PManager, PFoo;
  child opens PManager;

parent:
  [LazySend] async Log(nsCString[] lines) compressall;
  prio(high) sync Query(nullable PFoo actor, int32_t x) returns (bool ok, uint32_t n);
  intr Nested();

child:
  nested(inside_sync) prio(high) async Ping() compress verify;

both:
  async __delete__();

start state Start:
  recv Log goto Start;
  call Query goto Start, Other;
  send Ping;
state Other:
  send __delete__;
};

}  // namespace dom
}  // namespace mozilla
"#;
    let ast = parse(src, "PFoo.ipdl").expect("parse");
    let root = ast.root();

    let includes = ast.children_of_kind(root, &[NodeKind::Include]);
    assert_eq!(includes.len(), 1);
    let inc = ast.as_include(includes[0]).expect("include");
    assert_eq!(inc.kind, IncludeKind::Protocol);
    assert_eq!(inc.file_name(), "PManager.ipdl");
    assert_eq!(ast.children_of_kind(root, &[NodeKind::CxxInclude]).len(), 1);

    let usings: Vec<_> = ast
        .children_of_kind(root, &[NodeKind::UsingStmt])
        .into_iter()
        .filter_map(|u| ast.as_using_stmt(u))
        .filter(|u| !u.builtin)
        .collect();
    assert_eq!(usings.len(), 2);
    assert!(usings[0].refcounted);
    assert_eq!(usings[0].type_id.full_name(), "mozilla::dom::Foo");
    assert_eq!(usings[1].header, "mozilla/ipc/IPCCore.h");

    let (pid, p) = ast.protocol().expect("protocol");
    assert_eq!(p.send_semantics, SendSemantics::Intr);
    assert_eq!(p.nested, Nesting::InsideCpowNested);
    assert_eq!(ast.namespaces(pid), vec!["mozilla", "dom"]);
    assert_eq!(ast.qualified_protocol_name(pid).as_deref(), Some("mozilla::dom::PFoo"));
    assert_eq!(ast.attribute_local(pid, "ChildImpl"), Some(Some("virtual")));
    assert_eq!(ast.attribute_local(pid, "ParentImpl"), Some(Some("FooParent")));
    assert_eq!(ast.manager_names(pid), vec!["PManager", "PFoo"]);
    assert_eq!(ast.managed_names(pid), vec!["PFoo"]);

    let spawns = ast.first_child_of_kind(pid, &[NodeKind::Spawns]).and_then(|s| ast.as_spawns(s).cloned());
    let spawns = spawns.expect("spawns");
    assert_eq!(spawns.side, Some(Side::Parent));
    assert_eq!(spawns.spawned_as, Some(Side::Child));
    let opens = ast.first_child_of_kind(pid, &[NodeKind::Opens]).and_then(|o| ast.as_opens(o).cloned());
    assert_eq!(opens.map(|o| (o.side, o.protocol)), Some((Some(Side::Child), "PManager".to_string())));

    let messages = ast.messages(pid);
    let names: Vec<_> = messages.iter().map(|(_, m)| m.name.as_str()).collect();
    assert_eq!(names, vec!["Log", "Query", "Nested", "Ping", "__delete__"]);

    let (log_id, log) = messages[0];
    assert_eq!(ast.attribute_local(log_id, "LazySend"), Some(None));
    assert!(log.compress().is_some());
    let (ts, t) = ast.type_spec_of(ast.params(log_id, ParamRole::In)[0].0).expect("type");
    assert!(t.array);
    assert_eq!(ast.kind(ts), NodeKind::TypeSpec);

    let (query_id, query) = messages[1];
    assert_eq!(query.priority, Priority::High);
    assert_eq!(query.send_semantics, SendSemantics::Sync);
    assert!(ast.type_spec_of(ast.params(query_id, ParamRole::In)[0].0).map(|(_, t)| t.nullable).unwrap_or(false));
    assert_eq!(ast.params(query_id, ParamRole::Out).len(), 2);

    let ping = messages[3].1;
    assert_eq!(ping.nested, Nesting::InsideSyncNested);
    assert_eq!(ping.priority, Priority::High);
    assert!(ping.verify());
    assert_eq!(messages[4].1.direction, Direction::InOut);

    let stmts = ast.children_of_kind(pid, &[NodeKind::TransitionStmt]);
    assert_eq!(stmts.len(), 2);
    let start = ast.as_transition_stmt(stmts[0]).expect("stmt");
    assert_eq!(start.state, State::new("Start", true));
    let transitions: Vec<_> = ast
        .children_of_kind(stmts[0], &[NodeKind::Transition])
        .into_iter()
        .filter_map(|t| ast.as_transition(t).cloned())
        .collect();
    assert_eq!(transitions.len(), 3);
    assert_eq!(transitions[1].trigger, Some(Trigger::Call));
    assert_eq!(transitions[1].to_states, vec![State::new("Start", false), State::new("Other", false)]);
    assert_eq!(transitions[2].to_states, vec![State::new("Start", false)]);
}

#[test]
fn parse_rpc_alias_and_comments() {
    let src = r#"
// line comment
rpc protocol PFoo { /* block */
parent:
  rpc Call() returns (int32_t x); // trailing
};
"#;
    let ast = parse(src, "PFoo.ipdl").expect("parse");
    let (pid, p) = ast.protocol().expect("protocol");
    assert_eq!(p.send_semantics, SendSemantics::Intr);
    assert_eq!(ast.messages(pid)[0].1.send_semantics, SendSemantics::Intr);
}

#[test]
fn state_without_transitions_gets_null_transition() {
    let src = "protocol PFoo { child: async A(); start state S: send A goto T; state T: };";
    let ast = parse(src, "PFoo.ipdl").expect("parse");
    let (pid, _) = ast.protocol().expect("protocol");
    let stmts = ast.children_of_kind(pid, &[NodeKind::TransitionStmt]);
    let last = ast.children_of_kind(stmts[1], &[NodeKind::Transition]);
    assert_eq!(last.len(), 1);
    assert!(ast.as_transition(last[0]).map(|t| t.is_null()).unwrap_or(false));
}

#[test]
fn every_node_but_the_root_has_a_parent() {
    let src = "namespace a { struct S { int32_t x; }; protocol PFoo { child: async A(S s); start state X: send A; }; }";
    let ast = parse(src, "PFoo.ipdl").expect("parse");
    let mut stack = vec![ast.root()];
    let mut count = 0;
    while let Some(id) = stack.pop() {
        count += 1;
        for &child in ast.children(id) {
            assert_eq!(ast.parent(child), Some(id));
            stack.push(child);
        }
    }
    assert_eq!(ast.parent(ast.root()), None);
    assert_eq!(count, ast.len());
}

// ==================== Syntax: invalid programs ====================

#[test]
fn reject_missing_semicolon() {
    assert!(parse("protocol PFoo { child: async Bar() }", "PFoo.ipdl").is_err());
}

#[test]
fn reject_message_without_semantics() {
    assert!(parse("protocol PFoo { child: Bar(); };", "PFoo.ipdl").is_err());
}

#[test]
fn reject_two_protocols() {
    let err = parse("protocol PA { }; protocol PB { };", "PA.ipdl").unwrap_err();
    assert!(err.to_string().contains("one protocol"), "{}", err);
}

#[test]
fn reject_keyword_as_name() {
    assert!(parse("protocol PFoo { child: async state(); };", "PFoo.ipdl").is_err());
}

#[test]
fn syntax_error_names_the_file() {
    match parse("protocol {", "PBroken.ipdl") {
        Err(ParseError::Syntax { file, .. }) => assert_eq!(file.to_string_lossy(), "PBroken.ipdl"),
        other => panic!("expected syntax error, got {:?}", other.map(|_| ())),
    }
}

// ==================== Includes ====================

#[test]
fn includes_resolve_from_sibling_dir_then_include_dirs() {
    let dir = TempDir::new().expect("tempdir");
    let src_dir = dir.path().join("src");
    let inc_dir = dir.path().join("inc");
    fs::create_dir_all(&src_dir).expect("mkdir");
    fs::create_dir_all(&inc_dir).expect("mkdir");
    fs::write(src_dir.join("Shared.ipdlh"), "struct Shared { int32_t x; };").expect("write");
    fs::write(
        inc_dir.join("PManager.ipdl"),
        "include protocol PFoo;\nprotocol PManager { manages PFoo; child: async A(); };",
    )
    .expect("write");
    let foo = src_dir.join("PFoo.ipdl");
    fs::write(
        &foo,
        "include protocol PManager;\ninclude Shared;\nprotocol PFoo { manager PManager; child: async __delete__(Shared s); };",
    )
    .expect("write");

    let mut parser = Parser::new(vec![inc_dir.clone(), src_dir.clone()]);
    let ast = parser.parse_file(&foo).expect("parse");
    let includes = parser.includes();
    // PFoo -> PManager -> PFoo is a cycle; each file is still parsed once.
    assert_eq!(includes.len(), 3);
    for inc in ast.children_of_kind(ast.root(), &[NodeKind::Include]) {
        let resolved = includes.resolve(&ast, inc).expect("resolved");
        assert!(resolved.translation_unit().is_some());
    }
}

#[test]
fn missing_include_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let foo = dir.path().join("PFoo.ipdl");
    fs::write(&foo, "include protocol PMissing;\nprotocol PFoo { child: async A(); };").expect("write");
    let mut parser = Parser::new(Vec::new());
    match parser.parse_file(&foo) {
        Err(ParseError::IncludeNotFound { name, file_name, location }) => {
            assert_eq!(name, "PMissing");
            assert_eq!(file_name, "PMissing.ipdl");
            assert_eq!(location.line, 1);
        }
        other => panic!("expected include error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = TempDir::new().expect("tempdir");
    let mut parser = Parser::new(Vec::new());
    assert!(matches!(parser.parse_file(&dir.path().join("PNope.ipdl")), Err(ParseError::Io { .. })));
}
