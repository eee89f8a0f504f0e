//! Per-file results of code generation and their deterministic merge into
//! the global artifacts.
//!
//! Workers hand back a [`FileOutput`] by value. Nothing here depends on the
//! order the outputs arrive in: [`merge`] sorts every collection before the
//! renderers see it, so the emitted bytes are a function of the input set.

use crate::ast::{Ast, Modifier, NodeId, ParamRole, TypeSpec};
use crate::cxx::Written;
use crate::error::IpdlError;
use crate::msgenum::{gen_message_enum, MessageEnum};
use crate::state::{Direction, Nesting, Priority, SendSemantics};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Upper bound on protocol ids; message types keep the id in their top 16 bits.
pub const MAX_PROTOCOL_IDS: usize = 65536;

/// Message type constants the IPC layer defines outside any protocol.
pub const WELL_KNOWN_MESSAGES: &[&str] = &[
    "CHANNEL_OPENED",
    "SHMEM_DESTROYED",
    "SHMEM_CREATED",
    "GOODBYE",
    "CANCEL",
    "BUILD_ID",
];

const GENERATED_BANNER: &str = "// CODE GENERATED by ipdlc. Do not edit.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamShape {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageShape {
    pub name: String,
    pub direction: Direction,
    pub send_semantics: SendSemantics,
    pub nested: Nesting,
    pub priority: Priority,
    pub compress: Option<&'static str>,
    pub verify: bool,
    pub in_params: Vec<ParamShape>,
    pub out_params: Vec<ParamShape>,
}

/// Record written to `protocols.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolShape {
    pub name: String,
    pub namespaces: Vec<String>,
    pub send_semantics: SendSemantics,
    pub nested: Nesting,
    pub managers: Vec<String>,
    pub manages: Vec<String>,
    pub messages: Vec<MessageShape>,
}

/// A message type as it appears in the name table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageName {
    /// Enumerator in the generated table, e.g. `PFoo__Msg_Bar`.
    pub ident: String,
    /// Human readable name, e.g. `mozilla::dom::PFoo::Msg_Bar`.
    pub pretty: String,
}

impl MessageName {
    fn new(protocol: &str, qualified: &str, pretty_msg: &str) -> Self {
        MessageName {
            ident: format!("{}__{}", protocol, pretty_msg),
            pretty: format!("{}::{}", qualified, pretty_msg),
        }
    }
}

/// What one protocol contributes to the global artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMetadata {
    pub name: String,
    pub message_enum: MessageEnum,
    pub messages: Vec<MessageName>,
    /// Identifiers of sync and intr messages (not their replies).
    pub sync: Vec<String>,
    pub shape: ProtocolShape,
}

/// Result of generating one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutput {
    pub file: PathBuf,
    pub written: Vec<Written>,
    pub protocol: Option<ProtocolMetadata>,
}

fn param_shapes(ast: &Ast, message: NodeId, role: ParamRole) -> Vec<ParamShape> {
    ast.params(message, role)
        .into_iter()
        .map(|(pid, p)| ParamShape {
            name: p.name.clone(),
            type_name: ast.type_spec_of(pid).map(|(_, ts)| type_name(ts)).unwrap_or_default(),
        })
        .collect()
}

fn type_name(ts: &TypeSpec) -> String {
    let mut s = String::new();
    if ts.nullable {
        s.push_str("nullable ");
    }
    s.push_str(&ts.spec.full_name());
    if ts.array {
        s.push_str("[]");
    }
    s
}

/// Collect the global-artifact contribution of a checked protocol file.
pub fn protocol_metadata(ast: &Ast) -> Option<ProtocolMetadata> {
    let (pid, protocol) = ast.protocol()?;
    let message_enum = gen_message_enum(ast)?;
    let name = protocol.name.clone();
    let qualified = ast.qualified_protocol_name(pid).unwrap_or_else(|| name.clone());

    let mut messages = Vec::new();
    let mut sync = Vec::new();
    let mut shapes = Vec::new();
    for (mid, msg) in ast.messages(pid) {
        let msg_name = MessageName::new(&name, &qualified, &msg.pretty_msg_name());
        if !msg.send_semantics.is_async() {
            sync.push(msg_name.ident.clone());
        }
        messages.push(msg_name);
        if msg.has_reply() {
            messages.push(MessageName::new(&name, &qualified, &msg.pretty_reply_name()));
        }
        shapes.push(MessageShape {
            name: msg.name.clone(),
            direction: msg.direction,
            send_semantics: msg.send_semantics,
            nested: msg.nested,
            priority: msg.priority,
            compress: msg.compress().map(Modifier::keyword),
            verify: msg.verify(),
            in_params: param_shapes(ast, mid, ParamRole::In),
            out_params: param_shapes(ast, mid, ParamRole::Out),
        });
    }

    let shape = ProtocolShape {
        name: name.clone(),
        namespaces: ast.namespaces(pid),
        send_semantics: protocol.send_semantics,
        nested: protocol.nested,
        managers: ast.manager_names(pid),
        manages: ast.managed_names(pid),
        messages: shapes,
    };
    Some(ProtocolMetadata { name, message_enum, messages, sync, shape })
}

/// Every collection sorted, one entry per protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedMetadata {
    pub protocols: Vec<String>,
    pub enums: Vec<MessageEnum>,
    pub messages: Vec<MessageName>,
    pub sync: Vec<String>,
    pub shapes: Vec<ProtocolShape>,
}

/// Names both declaring files in path order.
pub(crate) fn duplicate_protocol(name: &str, first: &Path, second: &Path) -> IpdlError {
    let (a, b) = if first <= second { (first, second) } else { (second, first) };
    IpdlError::Consistency(format!(
        "protocol `{}` is declared in both {} and {}",
        name,
        a.display(),
        b.display()
    ))
}

pub fn merge(outputs: Vec<FileOutput>) -> Result<MergedMetadata, IpdlError> {
    let mut by_name: BTreeMap<String, (PathBuf, ProtocolMetadata)> = BTreeMap::new();
    for output in outputs {
        let Some(meta) = output.protocol else { continue };
        if let Some((other, _)) = by_name.get(&meta.name) {
            return Err(duplicate_protocol(&meta.name, other, &output.file));
        }
        by_name.insert(meta.name.clone(), (output.file, meta));
    }

    let mut merged = MergedMetadata::default();
    for (name, (_, meta)) in by_name {
        merged.protocols.push(name);
        merged.enums.push(meta.message_enum);
        merged.messages.extend(meta.messages);
        merged.sync.extend(meta.sync);
        merged.shapes.push(meta.shape);
    }
    merged.messages.sort();
    merged.sync.sort();
    Ok(merged)
}

/// `IPCMessageStart.h`: one id per protocol.
pub fn render_message_start(merged: &MergedMetadata) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", GENERATED_BANNER);
    out.push_str("\n#ifndef IPCMessageStart_h\n#define IPCMessageStart_h\n\n");
    out.push_str("enum IPCMessageStart {\n");
    for name in &merged.protocols {
        let _ = writeln!(out, "  {}MsgStart,", name);
    }
    out.push_str("\n  LastMsgIndex\n};\n\n");
    let _ = writeln!(
        out,
        "static_assert(LastMsgIndex <= {}, \"need to update IPC_MESSAGE_MACRO\");",
        MAX_PROTOCOL_IDS
    );
    out.push_str("\n#endif  // ifndef IPCMessageStart_h\n");
    out
}

/// `IPCMessageTypeName.cpp`: message type to name and sync lookups.
pub fn render_message_type_names(merged: &MergedMetadata) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", GENERATED_BANNER);
    out.push_str("#include <cstdint>\n\n");
    out.push_str("#include \"mozilla/ipc/ProtocolUtils.h\"\n");
    out.push_str("#include \"IPCMessageStart.h\"\n\n");
    out.push_str("using std::uint32_t;\n\n");

    out.push_str("namespace {\n\nenum IPCMessages {\n");
    for e in &merged.enums {
        for (name, value) in &e.idnums {
            match value {
                Some(v) => {
                    let _ = writeln!(out, "  {} = {},", name, v);
                }
                None if *name == e.end_name() => {}
                None => {
                    let _ = writeln!(out, "  {}__{},", e.protocol, name);
                }
            }
        }
    }
    out.push_str("};\n\n}  // anonymous namespace\n\n");

    out.push_str("namespace IPC {\n\n");
    out.push_str("bool IPCMessageTypeIsSync(uint32_t aMessageType) {\n");
    out.push_str("  switch (aMessageType) {\n");
    for ident in &merged.sync {
        let _ = writeln!(out, "    case {}:", ident);
    }
    if !merged.sync.is_empty() {
        out.push_str("      return true;\n");
    }
    out.push_str("    default:\n      return false;\n  }\n}\n\n");

    out.push_str("const char* StringFromIPCMessageType(uint32_t aMessageType) {\n");
    out.push_str("  switch (aMessageType) {\n");
    for msg in &merged.messages {
        let _ = writeln!(out, "    case {}:\n      return \"{}\";", msg.ident, msg.pretty);
    }
    for name in WELL_KNOWN_MESSAGES {
        let _ = writeln!(out, "    case {}_MESSAGE_TYPE:\n      return \"{}_MESSAGE\";", name, name);
    }
    out.push_str("    default:\n      return \"<unknown IPC msg name>\";\n  }\n}\n\n");
    out.push_str("}  // namespace IPC\n\n");

    out.push_str("namespace mozilla {\nnamespace ipc {\n\n");
    out.push_str("const char* ProtocolIdToName(IPCMessageStart aId) {\n");
    out.push_str("  switch (aId) {\n");
    for name in &merged.protocols {
        let _ = writeln!(out, "    case {}MsgStart:\n      return \"{}\";", name, name);
    }
    out.push_str("    default:\n      return \"<unknown protocol id>\";\n  }\n}\n\n");
    out.push_str("}  // namespace ipc\n}  // namespace mozilla\n");
    out
}

/// `protocols.json`: shape records sorted by protocol name.
pub fn render_protocols_json(merged: &MergedMetadata) -> Result<String, IpdlError> {
    let mut json = serde_json::to_string_pretty(&merged.shapes)?;
    json.push('\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn output(src: &str, file: &str) -> FileOutput {
        let ast = parse(src, file).expect("parse");
        FileOutput { file: PathBuf::from(file), written: Vec::new(), protocol: protocol_metadata(&ast) }
    }

    fn inputs() -> Vec<FileOutput> {
        vec![
            output(
                "namespace mozilla { namespace dom { protocol PFoo { child: async Bar(int32_t x); }; } }",
                "PFoo.ipdl",
            ),
            output("sync protocol PBaz { parent: sync Qux() returns (bool ok); };", "PBaz.ipdl"),
            output("struct S { int32_t a; };", "S.ipdlh"),
        ]
    }

    #[test]
    fn merge_is_order_independent() {
        let forward = merge(inputs()).expect("merge");
        let mut reversed_inputs = inputs();
        reversed_inputs.reverse();
        let reversed = merge(reversed_inputs).expect("merge");
        assert_eq!(forward, reversed);
        assert_eq!(forward.protocols, vec!["PBaz", "PFoo"]);
        assert_eq!(forward.sync, vec!["PBaz__Msg_Qux"]);
        let idents: Vec<_> = forward.messages.iter().map(|m| m.ident.as_str()).collect();
        assert_eq!(idents, vec!["PBaz__Msg_Qux", "PBaz__Reply_Qux", "PFoo__Msg_Bar"]);
    }

    #[test]
    fn message_start_lists_protocols_then_sentinel() {
        let merged = merge(inputs()).expect("merge");
        let header = render_message_start(&merged);
        let baz = header.find("PBazMsgStart,").expect("PBaz");
        let foo = header.find("PFooMsgStart,").expect("PFoo");
        let last = header.find("LastMsgIndex\n").expect("sentinel");
        assert!(baz < foo && foo < last);
        assert!(header.contains("static_assert(LastMsgIndex <= 65536"));
    }

    #[test]
    fn type_names_table() {
        let merged = merge(inputs()).expect("merge");
        let cpp = render_message_type_names(&merged);
        assert!(cpp.contains("  PBazStart = PBazMsgStart << 16,\n  PBaz__Msg_Qux,\n  PBaz__Reply_Qux,\n"));
        assert!(!cpp.contains("PBaz__PBazEnd"));
        let sync_fn = &cpp[cpp.find("IPCMessageTypeIsSync").expect("sync fn")..cpp.find("StringFromIPCMessageType").expect("name fn")];
        assert!(sync_fn.contains("case PBaz__Msg_Qux:"));
        assert!(!sync_fn.contains("PFoo"));
        assert!(cpp.contains("case PFoo__Msg_Bar:\n      return \"mozilla::dom::PFoo::Msg_Bar\";"));
        assert!(cpp.contains("return \"PBaz::Reply_Qux\";"));
        assert!(cpp.contains("case BUILD_ID_MESSAGE_TYPE:"));
        assert!(cpp.contains("case PFooMsgStart:\n      return \"PFoo\";"));
    }

    #[test]
    fn duplicate_protocol_is_a_consistency_error() {
        let outputs = vec![
            output("protocol PFoo { child: async Bar(); };", "a/PFoo.ipdl"),
            output("protocol PFoo { child: async Baz(); };", "b/PFoo.ipdl"),
        ];
        match merge(outputs) {
            Err(IpdlError::Consistency(msg)) => assert!(msg.contains("a/PFoo.ipdl and b/PFoo.ipdl")),
            other => panic!("expected consistency error, got {:?}", other),
        }
    }

    #[test]
    fn protocols_json_shape() {
        let merged = merge(inputs()).expect("merge");
        let json: serde_json::Value = serde_json::from_str(&render_protocols_json(&merged).expect("json")).expect("valid");
        assert_eq!(json[0]["name"], "PBaz");
        assert_eq!(json[0]["sendSemantics"], "sync");
        assert_eq!(json[0]["messages"][0]["outParams"][0]["type"], "bool");
        assert_eq!(json[1]["messages"][0]["direction"], "out");
        assert_eq!(json[1]["messages"][0]["nested"], "not");
    }
}
