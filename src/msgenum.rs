//! Per-protocol message identifier enumeration.

use crate::ast::Ast;

/// The identifiers allocated to one protocol, in declaration order. Only the
/// first entry carries an explicit value; the rest count up from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnum {
    pub protocol: String,
    pub idnums: Vec<(String, Option<String>)>,
}

impl MessageEnum {
    pub fn start_name(&self) -> String {
        format!("{}Start", self.protocol)
    }

    pub fn end_name(&self) -> String {
        format!("{}End", self.protocol)
    }

    /// Identifiers of the messages proper, without the Start/End markers.
    pub fn message_ids(&self) -> impl Iterator<Item = &str> {
        let last = self.idnums.len().saturating_sub(1);
        self.idnums[1.min(last)..last].iter().map(|(name, _)| name.as_str())
    }
}

/// `None` for files without a protocol.
pub fn gen_message_enum(ast: &Ast) -> Option<MessageEnum> {
    let (pid, protocol) = ast.protocol()?;
    let name = protocol.name.clone();
    let mut idnums = vec![(format!("{}Start", name), Some(format!("{}MsgStart << 16", name)))];
    for (_, msg) in ast.messages(pid) {
        idnums.push((msg.pretty_msg_name(), None));
        if msg.has_reply() {
            idnums.push((msg.pretty_reply_name(), None));
        }
    }
    idnums.push((format!("{}End", name), None));
    Some(MessageEnum { protocol: name, idnums })
}
