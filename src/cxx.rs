//! C++ emission for one translation unit.
//!
//! Protocol files produce a message header (`P.h`), one actor header per
//! side (`PParent.h`, `PChild.h`) and the message constructors (`P.cpp`).
//! Header files produce one `H.h` with their struct and union definitions.
//! Headers go under directories named after the C++ namespaces.

use crate::ast::*;
use crate::config::MessageMetadata;
use crate::emit::write_if_modified;
use crate::error::IpdlError;
use crate::msgenum::gen_message_enum;
use crate::state::{Direction, SendSemantics};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file produced by code generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub path: PathBuf,
    /// False when the file already had these contents.
    pub changed: bool,
}

pub fn gen_cxx(
    ast: &Ast,
    headers_dir: &Path,
    cpp_dir: &Path,
    metadata: &MessageMetadata,
) -> Result<Vec<Written>, IpdlError> {
    let files = match ast.protocol() {
        Some((pid, _)) => protocol_files(ast, pid, headers_dir, cpp_dir, metadata)?,
        None => vec![header_file(ast, headers_dir)],
    };
    let mut written = Vec::with_capacity(files.len());
    for (path, contents) in files {
        let changed = write_if_modified(&path, &contents)?;
        written.push(Written { path, changed });
    }
    debug!(
        "{}: {} file(s), {} changed",
        ast.filename().display(),
        written.len(),
        written.iter().filter(|w| w.changed).count()
    );
    Ok(written)
}

const BANNER: &str = "//\n// Automatically generated by ipdlc.\n// Edit at your own risk\n//\n";

fn ns_dir(base: &Path, namespaces: &[String]) -> PathBuf {
    namespaces.iter().fold(base.to_path_buf(), |dir, ns| dir.join(ns))
}

fn include_path(namespaces: &[String], file: &str) -> String {
    namespaces
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(file))
        .collect::<Vec<_>>()
        .join("/")
}

fn open_namespaces(out: &mut String, namespaces: &[String]) {
    for ns in namespaces {
        let _ = writeln!(out, "namespace {} {{", ns);
    }
    if !namespaces.is_empty() {
        out.push('\n');
    }
}

fn close_namespaces(out: &mut String, namespaces: &[String]) {
    if !namespaces.is_empty() {
        out.push('\n');
    }
    for ns in namespaces.iter().rev() {
        let _ = writeln!(out, "}}  // namespace {}", ns);
    }
}

/// `#include` lines for the C++ passthrough includes and user usings.
fn preamble_includes(ast: &Ast) -> Vec<String> {
    let root = ast.root();
    let mut headers = Vec::new();
    for id in ast.children_of_kind(root, &[NodeKind::CxxInclude]) {
        if let Some(inc) = ast.as_cxx_include(id) {
            headers.push(inc.file.clone());
        }
    }
    for id in ast.children_of_kind(root, &[NodeKind::UsingStmt]) {
        if let Some(u) = ast.as_using_stmt(id) {
            if !u.header.is_empty() && !headers.contains(&u.header) {
                headers.push(u.header.clone());
            }
        }
    }
    for id in ast.children_of_kind(root, &[NodeKind::Include]) {
        if let Some(inc) = ast.as_include(id) {
            if inc.kind == IncludeKind::Header {
                headers.push(format!("{}.h", inc.name));
            }
        }
    }
    headers
}

/// C++ type for a TypeSpec, seen from `side` when it names an actor.
fn cxx_type(ast: &Ast, ts_id: NodeId, side: Side) -> String {
    let node = ast.node(ts_id);
    let Some(ts) = ast.as_type_spec(ts_id) else { return String::from("void") };
    let base = match &node.decor.resolved {
        Some(TypeRef::Actor(name)) => format!("{}{}*", name, side.suffix()),
        Some(TypeRef::Builtin(s)) | Some(TypeRef::Imported(s)) | Some(TypeRef::Struct(s)) | Some(TypeRef::Union(s)) => {
            s.clone()
        }
        None => ts.spec.full_name(),
    };
    if ts.array {
        format!("nsTArray<{}>", base)
    } else {
        base
    }
}

fn by_value(ast: &Ast, ts_id: NodeId) -> bool {
    let array = ast.as_type_spec(ts_id).map(|t| t.array).unwrap_or(false);
    !array
        && match &ast.node(ts_id).decor.resolved {
            Some(TypeRef::Actor(_)) => true,
            Some(TypeRef::Builtin(s)) => !s.contains("::") && !matches!(s.as_str(), "nsString" | "nsCString"),
            _ => false,
        }
}

fn param_list(ast: &Ast, message: NodeId, side: Side, with_outs: bool) -> String {
    let mut params = Vec::new();
    for (pid, p) in ast.params(message, ParamRole::In) {
        let Some((ts, _)) = ast.type_spec_of(pid) else { continue };
        let ty = cxx_type(ast, ts, side);
        if by_value(ast, ts) {
            params.push(format!("{} {}", ty, p.name));
        } else {
            params.push(format!("const {}& {}", ty, p.name));
        }
    }
    if with_outs {
        for (pid, p) in ast.params(message, ParamRole::Out) {
            let Some((ts, _)) = ast.type_spec_of(pid) else { continue };
            params.push(format!("{}* {}", cxx_type(ast, ts, side), p.name));
        }
    }
    params.join(", ")
}

fn protocol_files(
    ast: &Ast,
    pid: NodeId,
    headers_dir: &Path,
    cpp_dir: &Path,
    metadata: &MessageMetadata,
) -> Result<Vec<(PathBuf, String)>, IpdlError> {
    let codegen = |message: &str| IpdlError::Codegen { file: ast.filename().to_path_buf(), message: message.to_string() };
    let protocol = ast.as_protocol(pid).ok_or_else(|| codegen("missing protocol"))?;
    let msg_enum = gen_message_enum(ast).ok_or_else(|| codegen("no message enumeration"))?;
    let namespaces = ast.namespaces(pid);
    let name = protocol.name.as_str();
    let dir = ns_dir(headers_dir, &namespaces);

    // P.h
    let mut h = String::from(BANNER);
    let _ = writeln!(h, "\n#ifndef {0}_h\n#define {0}_h\n", name);
    h.push_str("#include \"mozilla/ipc/ProtocolUtils.h\"\n#include \"IPCMessageStart.h\"\n");
    for header in preamble_includes(ast) {
        let _ = writeln!(h, "#include \"{}\"", header);
    }
    h.push('\n');
    let mut ns = namespaces.clone();
    ns.push(name.to_string());
    open_namespaces(&mut h, &ns);
    h.push_str("enum MessageType {\n");
    for (id, value) in &msg_enum.idnums {
        match value {
            Some(v) => {
                let _ = writeln!(h, "  {} = {},", id, v);
            }
            None => {
                let _ = writeln!(h, "  {},", id);
            }
        }
    }
    h.push_str("};\n\n");
    for (_, msg) in ast.messages(pid) {
        let _ = writeln!(h, "mozilla::UniquePtr<IPC::Message> {}(int32_t routingId);", msg.pretty_msg_name());
        if msg.has_reply() {
            let _ = writeln!(h, "mozilla::UniquePtr<IPC::Message> {}(int32_t routingId);", msg.pretty_reply_name());
        }
    }
    close_namespaces(&mut h, &ns);
    let _ = writeln!(h, "\n#endif  // ifndef {}_h", name);

    let mut files = vec![(dir.join(format!("{}.h", name)), h)];
    for side in [Side::Parent, Side::Child] {
        files.push((
            dir.join(format!("{}{}.h", name, side.suffix())),
            actor_header(ast, pid, &namespaces, side),
        ));
    }

    // P.cpp
    let mut cpp = String::from(BANNER);
    let _ = writeln!(cpp, "\n#include \"{}\"\n", include_path(&namespaces, &format!("{}.h", name)));
    open_namespaces(&mut cpp, &ns);
    for (_, msg) in ast.messages(pid) {
        let capacity = metadata.segment_capacity(name, &msg.name).unwrap_or(0);
        let compression = match msg.compress() {
            Some(Modifier::CompressAll) => "COMPRESSION_ALL",
            Some(_) => "COMPRESSION_ENABLED",
            None => "COMPRESSION_NONE",
        };
        let ctor = if msg.is_dtor() { "DESTRUCTOR" } else { "NOT_CONSTRUCTOR_OR_DESTRUCTOR" };
        let sync = if msg.has_reply() { "SYNC" } else { "ASYNC" };
        let mut constructor = |ident: String, reply: &str| {
            let _ = writeln!(
                cpp,
                "mozilla::UniquePtr<IPC::Message> {0}(int32_t routingId) {{\n  \
                 return IPC::Message::IPDLMessage(routingId, {0}, {1}, IPC::Message::HeaderFlags(\
                 IPC::Message::{2}, IPC::Message::{3}, IPC::Message::{4}, IPC::Message::{5}, \
                 IPC::Message::{6}, IPC::Message::{7}));\n}}\n",
                ident,
                capacity,
                msg.nested.cxx_name(),
                msg.priority.cxx_name(),
                compression,
                ctor,
                sync,
                reply
            );
        };
        constructor(msg.pretty_msg_name(), "NOT_REPLY");
        if msg.has_reply() {
            constructor(msg.pretty_reply_name(), "REPLY");
        }
    }
    close_namespaces(&mut cpp, &ns);
    files.push((cpp_dir.join(format!("{}.cpp", name)), cpp));
    Ok(files)
}

/// `(sends, receives)` for `side` and a message of this direction.
fn sends(direction: Direction, side: Side) -> (bool, bool) {
    match side {
        Side::Parent => (direction.is_out(), direction.is_in()),
        Side::Child => (direction.is_in(), direction.is_out()),
    }
}

fn actor_header(ast: &Ast, pid: NodeId, namespaces: &[String], side: Side) -> String {
    let protocol_name = ast.as_protocol(pid).map(|p| p.name.clone()).unwrap_or_default();
    let class = format!("{}{}", protocol_name, side.suffix());
    let mut out = String::from(BANNER);
    let _ = writeln!(out, "\n#ifndef {0}_h\n#define {0}_h\n", class);
    let _ = writeln!(out, "#include \"{}\"", include_path(namespaces, &format!("{}.h", protocol_name)));
    for managee in ast.managed_names(pid) {
        let _ = writeln!(out, "#include \"{}{}.h\"", managee, side.suffix());
    }
    out.push('\n');
    open_namespaces(&mut out, namespaces);

    let _ = writeln!(out, "class {} : public mozilla::ipc::IProtocol {{", class);
    out.push_str(" public:\n");
    let mut receives = Vec::new();
    for (mid, msg) in ast.messages(pid) {
        let (outgoing, incoming) = sends(msg.direction, side);
        let intr = msg.send_semantics == SendSemantics::Intr;
        if outgoing {
            let verb = if intr { "Call" } else { "Send" };
            let _ = writeln!(out, "  bool {}{}({});", verb, msg.name, param_list(ast, mid, side, msg.has_reply()));
        }
        if incoming {
            let verb = if intr { "Answer" } else { "Recv" };
            receives.push(format!(
                "  virtual mozilla::ipc::IPCResult {}{}({}) = 0;",
                verb,
                msg.name,
                param_list(ast, mid, side, msg.has_reply())
            ));
        }
    }
    for managee in ast.managed_names(pid) {
        let _ = writeln!(out, "  void Managed{0}{1}(nsTArray<{0}{1}*>& aArr) const;", managee, side.suffix());
    }
    if !receives.is_empty() {
        out.push_str("\n protected:\n");
        for line in receives {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out.push_str("};\n");
    close_namespaces(&mut out, namespaces);
    let _ = writeln!(out, "\n#endif  // ifndef {}_h", class);
    out
}

fn header_file(ast: &Ast, headers_dir: &Path) -> (PathBuf, String) {
    let root = ast.root();
    let name = ast.translation_unit().map(|tu| tu.name.clone()).unwrap_or_default();
    let decls = ast.children_of_kind(root, &[NodeKind::StructDecl, NodeKind::UnionDecl]);
    let dir_namespaces = decls
        .first()
        .and_then(|&d| match &ast.node(d).data {
            NodeData::StructDecl(s) => Some(s.namespaces.clone()),
            NodeData::UnionDecl(u) => Some(u.namespaces.clone()),
            _ => None,
        })
        .unwrap_or_default();

    let guard = format!("{}_{}_h", dir_namespaces.join("_"), name);
    let guard = guard.trim_start_matches('_');
    let mut out = String::from(BANNER);
    let _ = writeln!(out, "\n#ifndef {0}\n#define {0}\n", guard);
    out.push_str("#include \"mozilla/Variant.h\"\n#include \"nsTArray.h\"\n");
    for header in preamble_includes(ast) {
        let _ = writeln!(out, "#include \"{}\"", header);
    }

    for decl in decls {
        out.push('\n');
        match &ast.node(decl).data {
            NodeData::StructDecl(s) => {
                open_namespaces(&mut out, &s.namespaces);
                struct_definition(&mut out, ast, decl, &s.name);
                close_namespaces(&mut out, &s.namespaces);
            }
            NodeData::UnionDecl(u) => {
                open_namespaces(&mut out, &u.namespaces);
                union_definition(&mut out, ast, decl, &u.name);
                close_namespaces(&mut out, &u.namespaces);
            }
            _ => {}
        }
    }
    let _ = writeln!(out, "\n#endif  // ifndef {}", guard);
    (ns_dir(headers_dir, &dir_namespaces).join(format!("{}.h", name)), out)
}

fn struct_definition(out: &mut String, ast: &Ast, id: NodeId, name: &str) {
    let fields: Vec<(String, String)> = ast
        .children_of_kind(id, &[NodeKind::StructField])
        .into_iter()
        .filter_map(|f| {
            let field = ast.as_struct_field(f)?;
            let (ts, _) = ast.type_spec_of(f)?;
            Some((field.name.clone(), cxx_type(ast, ts, Side::Parent)))
        })
        .collect();
    let _ = writeln!(out, "class {} final {{\n public:\n  {}() = default;", name, name);
    for (field, ty) in &fields {
        let _ = writeln!(out, "\n  {0}& {1}() {{ return {1}_; }}", ty, field);
        let _ = writeln!(out, "  const {0}& {1}() const {{ return {1}_; }}", ty, field);
    }
    if !fields.is_empty() {
        out.push_str("\n private:\n");
        for (field, ty) in &fields {
            let _ = writeln!(out, "  {} {}_;", ty, field);
        }
    }
    out.push_str("};\n");
}

fn union_definition(out: &mut String, ast: &Ast, id: NodeId, name: &str) {
    let members: Vec<String> = ast
        .children_of_kind(id, &[NodeKind::TypeSpec])
        .into_iter()
        .map(|ts| cxx_type(ast, ts, Side::Parent))
        .collect();
    let tag = |ty: &str| -> String {
        let cleaned: String = ty.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect();
        format!("T{}", cleaned)
    };
    let _ = writeln!(out, "class {} final {{\n public:\n  enum Type {{\n    T__None,", name);
    for ty in &members {
        let _ = writeln!(out, "    {},", tag(ty));
    }
    let last = members.last().map(|ty| tag(ty)).unwrap_or_else(|| "T__None".to_string());
    let _ = writeln!(out, "    T__Last = {}\n  }};\n", last);
    out.push_str("  Type type() const { return static_cast<Type>(mValue.tag()); }\n\n private:\n");
    let mut variant = vec!["mozilla::Nothing".to_string()];
    variant.extend(members);
    let _ = writeln!(out, "  mozilla::Variant<{}> mValue = mozilla::AsVariant(mozilla::Nothing());", variant.join(", "));
    out.push_str("};\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, IncludeCache};
    use crate::typecheck::typecheck;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn protocol_outputs_land_under_namespace_dirs() {
        let src = r#"
namespace mozilla { namespace dom {
sync protocol PBaz {
parent:
  sync Qux(nsCString key) returns (int32_t value);
child:
  async Note() compress;
};
} }
"#;
        let mut ast = parse(src, "PBaz.ipdl").expect("parse");
        typecheck(&mut ast, &IncludeCache::default()).expect("typecheck");
        let out = TempDir::new().expect("tempdir");
        let metadata = MessageMetadata::parse("[PBaz::Qux]\nsegment_capacity = 512\n", "md.ini").expect("metadata");
        let written = gen_cxx(&ast, &out.path().join("h"), &out.path().join("cpp"), &metadata).expect("gen");
        assert_eq!(written.len(), 4);
        assert!(written.iter().all(|w| w.changed));

        let parent = fs::read_to_string(out.path().join("h/mozilla/dom/PBazParent.h")).expect("parent");
        assert!(parent.contains("RecvQux(const nsCString& key, int32_t* value) = 0;"));
        assert!(parent.contains("bool SendNote();"));
        let child = fs::read_to_string(out.path().join("h/mozilla/dom/PBazChild.h")).expect("child");
        assert!(child.contains("bool SendQux(const nsCString& key, int32_t* value);"));

        let cpp = fs::read_to_string(out.path().join("cpp/PBaz.cpp")).expect("cpp");
        assert!(cpp.contains("IPDLMessage(routingId, Msg_Qux, 512,"));
        assert!(cpp.contains("COMPRESSION_ENABLED"));

        let again = gen_cxx(&ast, &out.path().join("h"), &out.path().join("cpp"), &metadata).expect("gen");
        assert!(again.iter().all(|w| !w.changed));
    }

    #[test]
    fn header_file_defines_structs_and_unions() {
        let src = "namespace mozilla { struct Pair { int32_t a; nsCString b; }; union Value { int32_t; Pair[]; }; }";
        let mut ast = parse(src, "Shared.ipdlh").expect("parse");
        typecheck(&mut ast, &IncludeCache::default()).expect("typecheck");
        let out = TempDir::new().expect("tempdir");
        gen_cxx(&ast, out.path(), out.path(), &MessageMetadata::default()).expect("gen");
        let h = fs::read_to_string(out.path().join("mozilla/Shared.h")).expect("header");
        assert!(h.contains("class Pair final"));
        assert!(h.contains("  int32_t a_;"));
        assert!(h.contains("    TnsTArray_mozilla__Pair_,"));
        assert!(h.contains("mozilla::Variant<mozilla::Nothing, int32_t, nsTArray<mozilla::Pair>>"));
    }
}
