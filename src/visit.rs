//! Generic AST traversal.
//!
//! A [`Visitor`] has one method per [`NodeKind`]. [`accept`] dispatches on the
//! node's kind with an exhaustive match, so adding a node kind does not build
//! until every dispatch site decides what to do with it. Default methods walk
//! structural nodes in declaration order and do nothing on leaves; the
//! `walk_*` functions expose those defaults to visitors that override a
//! method but still want the structural recursion.

use crate::ast::{Ast, NodeId, NodeKind, ParamRole};
use crate::state::State;

/// Call the visitor method matching the kind of `id`.
pub fn accept<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) {
    match ast.kind(id) {
        NodeKind::TranslationUnit => visitor.visit_translation_unit(ast, id),
        NodeKind::CxxInclude => visitor.visit_cxx_include(ast, id),
        NodeKind::Include => visitor.visit_include(ast, id),
        NodeKind::UsingStmt => visitor.visit_using_stmt(ast, id),
        NodeKind::StructDecl => visitor.visit_struct_decl(ast, id),
        NodeKind::StructField => visitor.visit_struct_field(ast, id),
        NodeKind::UnionDecl => visitor.visit_union_decl(ast, id),
        NodeKind::Namespace => visitor.visit_namespace(ast, id),
        NodeKind::Protocol => visitor.visit_protocol(ast, id),
        NodeKind::Spawns => visitor.visit_spawns(ast, id),
        NodeKind::Bridges => visitor.visit_bridges(ast, id),
        NodeKind::Opens => visitor.visit_opens(ast, id),
        NodeKind::Manager => visitor.visit_manager(ast, id),
        NodeKind::Managed => visitor.visit_managed(ast, id),
        NodeKind::MessageDecl => visitor.visit_message_decl(ast, id),
        NodeKind::Param => visitor.visit_param(ast, id),
        NodeKind::TypeSpec => visitor.visit_type_spec(ast, id),
        NodeKind::TransitionStmt => visitor.visit_transition_stmt(ast, id),
        NodeKind::Transition => visitor.visit_transition(ast, id),
    }
}

pub trait Visitor {
    fn visit_translation_unit(&mut self, ast: &Ast, id: NodeId) {
        walk_translation_unit(self, ast, id);
    }

    fn visit_cxx_include(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_include(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_using_stmt(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_struct_decl(&mut self, ast: &Ast, id: NodeId) {
        walk_children(self, ast, id, &[NodeKind::StructField]);
    }

    fn visit_struct_field(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_union_decl(&mut self, ast: &Ast, id: NodeId) {
        walk_children(self, ast, id, &[NodeKind::TypeSpec]);
    }

    fn visit_namespace(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_protocol(&mut self, ast: &Ast, id: NodeId) {
        walk_protocol(self, ast, id);
    }

    fn visit_spawns(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_bridges(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_opens(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_manager(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_managed(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_message_decl(&mut self, ast: &Ast, id: NodeId) {
        walk_message_decl(self, ast, id);
    }

    fn visit_param(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_type_spec(&mut self, _ast: &Ast, _id: NodeId) {}

    fn visit_transition_stmt(&mut self, ast: &Ast, id: NodeId) {
        walk_transition_stmt(self, ast, id);
    }

    /// `owner` is the TransitionStmt or Transition the state belongs to.
    fn visit_state(&mut self, _ast: &Ast, _owner: NodeId, _state: &State) {}

    fn visit_transition(&mut self, ast: &Ast, id: NodeId) {
        walk_transition(self, ast, id);
    }
}

pub fn walk_children<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId, kinds: &[NodeKind]) {
    for child in ast.children_of_kind(id, kinds) {
        accept(visitor, ast, child);
    }
}

pub fn walk_translation_unit<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) {
    walk_children(visitor, ast, id, &[NodeKind::CxxInclude, NodeKind::Include]);
    walk_children(visitor, ast, id, &[NodeKind::StructDecl, NodeKind::UnionDecl]);
    walk_children(visitor, ast, id, &[NodeKind::UsingStmt]);
    walk_children(visitor, ast, id, &[NodeKind::Protocol]);
}

pub fn walk_protocol<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) {
    walk_children(visitor, ast, id, &[NodeKind::Namespace]);
    walk_children(visitor, ast, id, &[NodeKind::Spawns, NodeKind::Bridges, NodeKind::Opens]);
    walk_children(visitor, ast, id, &[NodeKind::Manager]);
    walk_children(visitor, ast, id, &[NodeKind::Managed]);
    walk_children(visitor, ast, id, &[NodeKind::MessageDecl]);
    walk_children(visitor, ast, id, &[NodeKind::TransitionStmt]);
}

pub fn walk_message_decl<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) {
    for role in [ParamRole::In, ParamRole::Out] {
        for (param, _) in ast.params(id, role) {
            accept(visitor, ast, param);
        }
    }
}

pub fn walk_transition_stmt<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) {
    if let Some(stmt) = ast.as_transition_stmt(id) {
        visitor.visit_state(ast, id, &stmt.state);
    }
    walk_children(visitor, ast, id, &[NodeKind::Transition]);
}

pub fn walk_transition<V: Visitor + ?Sized>(visitor: &mut V, ast: &Ast, id: NodeId) {
    if let Some(t) = ast.as_transition(id) {
        for state in &t.to_states {
            visitor.visit_state(ast, id, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    const SRC: &str = r#"
include "mozilla/Foo.h";
struct S { int32_t a; };
namespace mozilla {
protocol PTest {
parent:
  async Ping(int32_t x) ;
  sync Query(S s) returns (bool ok);
child:
  async __delete__();
start state START:
  recv Ping goto START;
  recv Query goto START;
};
}
"#;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<&'static str>,
    }

    impl Visitor for Recorder {
        fn visit_cxx_include(&mut self, _ast: &Ast, _id: NodeId) {
            self.seen.push("cxx_include");
        }
        fn visit_struct_decl(&mut self, ast: &Ast, id: NodeId) {
            self.seen.push("struct");
            walk_children(self, ast, id, &[NodeKind::StructField]);
        }
        fn visit_struct_field(&mut self, _ast: &Ast, _id: NodeId) {
            self.seen.push("field");
        }
        fn visit_namespace(&mut self, _ast: &Ast, _id: NodeId) {
            self.seen.push("namespace");
        }
        fn visit_message_decl(&mut self, ast: &Ast, id: NodeId) {
            self.seen.push("message");
            walk_message_decl(self, ast, id);
        }
        fn visit_param(&mut self, _ast: &Ast, _id: NodeId) {
            self.seen.push("param");
        }
        fn visit_state(&mut self, _ast: &Ast, _owner: NodeId, _state: &State) {
            self.seen.push("state");
        }
        fn visit_transition(&mut self, ast: &Ast, id: NodeId) {
            self.seen.push("transition");
            walk_transition(self, ast, id);
        }
    }

    #[test]
    fn default_walk_order() {
        let ast = parse(SRC, "PTest.ipdl").expect("parse");
        let mut rec = Recorder::default();
        accept(&mut rec, &ast, ast.root());
        assert_eq!(
            rec.seen,
            vec![
                "cxx_include",
                "struct",
                "field",
                "namespace",
                "message",
                "param",
                "message",
                "param",
                "param",
                "message",
                "state",
                "transition",
                "state",
                "transition",
                "state",
            ]
        );
    }

    /// Overrides every method without recursing.
    #[derive(Default)]
    struct OneShot {
        hits: Vec<NodeKind>,
    }

    impl Visitor for OneShot {
        fn visit_translation_unit(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::TranslationUnit);
        }
        fn visit_cxx_include(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::CxxInclude);
        }
        fn visit_include(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::Include);
        }
        fn visit_using_stmt(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::UsingStmt);
        }
        fn visit_struct_decl(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::StructDecl);
        }
        fn visit_struct_field(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::StructField);
        }
        fn visit_union_decl(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::UnionDecl);
        }
        fn visit_namespace(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::Namespace);
        }
        fn visit_protocol(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::Protocol);
        }
        fn visit_spawns(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::Spawns);
        }
        fn visit_bridges(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::Bridges);
        }
        fn visit_opens(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::Opens);
        }
        fn visit_manager(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::Manager);
        }
        fn visit_managed(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::Managed);
        }
        fn visit_message_decl(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::MessageDecl);
        }
        fn visit_param(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::Param);
        }
        fn visit_type_spec(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::TypeSpec);
        }
        fn visit_transition_stmt(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::TransitionStmt);
        }
        fn visit_transition(&mut self, _: &Ast, _: NodeId) {
            self.hits.push(NodeKind::Transition);
        }
    }

    #[test]
    fn accept_invokes_exactly_the_matching_handler() {
        let ast = parse(SRC, "PTest.ipdl").expect("parse");
        let mut ids = vec![ast.root()];
        let mut i = 0;
        while i < ids.len() {
            ids.extend_from_slice(ast.children(ids[i]));
            i += 1;
        }
        for id in ids {
            let mut v = OneShot::default();
            accept(&mut v, &ast, id);
            assert_eq!(v.hits, vec![ast.kind(id)]);
        }
    }
}
