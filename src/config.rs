//! INI inputs: the sync message allow-list and per-message metadata.

use crate::ast::{Ast, Loc};
use crate::error::{ConfigError, Diagnostic, Diagnostics, IpdlError};
use pest::Parser as _;
use pest_derive::Parser as PestParser;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(PestParser)]
#[grammar = "config.pest"]
struct IniParser;

/// Platforms an allow-list entry may be restricted to.
pub const PLATFORMS: &[&str] = &["win", "linux", "mac", "android"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniEntry {
    pub key: String,
    pub value: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
    pub name: String,
    pub line: usize,
    pub entries: Vec<IniEntry>,
}

impl IniSection {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|e| e.key == key).map(|e| e.value.as_str())
    }
}

/// Split an INI document into sections. Only syntax is checked here.
pub fn parse_ini(text: &str, origin: &str) -> Result<Vec<IniSection>, ConfigError> {
    let syntax = |message: String| ConfigError::Syntax { origin: origin.to_string(), message };
    let file = IniParser::parse(Rule::file, text)
        .map_err(|e| syntax(e.to_string()))?
        .next()
        .ok_or_else(|| syntax("empty document".to_string()))?;

    let mut sections: Vec<IniSection> = Vec::new();
    for pair in file.into_inner() {
        let line = pair.as_span().start_pos().line_col().0;
        match pair.as_rule() {
            Rule::section => {
                let name = pair.into_inner().next().map(|p| p.as_str().trim().to_string()).unwrap_or_default();
                sections.push(IniSection { name, line, entries: Vec::new() });
            }
            Rule::entry => {
                let mut key = String::new();
                let mut value = String::new();
                for inner in pair.into_inner() {
                    match inner.as_rule() {
                        Rule::key => key = inner.as_str().to_string(),
                        Rule::value => value = inner.as_str().trim().to_string(),
                        Rule::continuation => {
                            let more = inner.as_str().trim();
                            if !value.is_empty() {
                                value.push(' ');
                            }
                            value.push_str(more);
                        }
                        _ => {}
                    }
                }
                let section = sections
                    .last_mut()
                    .ok_or_else(|| syntax(format!("line {}: `{}` appears before any [section]", line, key)))?;
                section.entries.push(IniEntry { key, value, line });
            }
            _ => {}
        }
    }
    Ok(sections)
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })
}

/// `Protocol::Message` key used by both files.
pub fn message_key(protocol: &str, message: &str) -> String {
    format!("{}::{}", protocol, message)
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_message_key(s: &str) -> bool {
    match s.split_once("::") {
        Some((p, m)) => is_ident(p) && is_ident(m),
        None => false,
    }
}

/// Reviewed list of the sync and intr messages allowed to exist.
#[derive(Debug, Clone)]
pub struct SyncAllowList {
    origin: Arc<str>,
    sections: Vec<IniSection>,
}

impl SyncAllowList {
    pub fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        Ok(SyncAllowList { origin: Arc::from(origin), sections: parse_ini(text, origin)? })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&read_config(path)?, &path.display().to_string())
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn loc(&self, line: usize) -> Loc {
        Loc::new(self.origin.clone(), line)
    }

    fn section(&self, key: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.section(key).is_some()
    }

    /// The reviewed description, when the entry has a non-empty one.
    pub fn description(&self, key: &str) -> Option<&str> {
        self.section(key).and_then(|s| s.get("description")).filter(|d| !d.is_empty())
    }

    pub fn platforms(&self, key: &str) -> Vec<&str> {
        self.section(key)
            .and_then(|s| s.get("platform"))
            .map(|p| p.split(',').map(str::trim).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Every section name, in file order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    /// Structural problems with the list itself.
    pub fn check_format(&self) -> Result<(), Diagnostics> {
        let mut diags = Vec::new();
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for section in &self.sections {
            let loc = self.loc(section.line);
            if !is_message_key(&section.name) {
                diags.push(Diagnostic::new(
                    loc.clone(),
                    format!("[{}]: section names must have the form Protocol::Message", section.name),
                ));
            }
            if let Some(first) = seen.insert(&section.name, section.line) {
                diags.push(Diagnostic::new(
                    loc.clone(),
                    format!("[{}]: duplicate section (first at line {})", section.name, first),
                ));
            }
            let mut keys = BTreeSet::new();
            for entry in &section.entries {
                let entry_loc = self.loc(entry.line);
                if !keys.insert(entry.key.as_str()) {
                    diags.push(Diagnostic::new(entry_loc.clone(), format!("[{}]: duplicate key `{}`", section.name, entry.key)));
                }
                match entry.key.as_str() {
                    "description" => {}
                    "platform" => {
                        for platform in entry.value.split(',').map(str::trim) {
                            if !PLATFORMS.contains(&platform) {
                                diags.push(Diagnostic::new(
                                    entry_loc.clone(),
                                    format!("[{}]: unknown platform `{}`", section.name, platform),
                                ));
                            }
                        }
                    }
                    other => diags.push(Diagnostic::new(
                        entry_loc,
                        format!("[{}]: unknown key `{}`", section.name, other),
                    )),
                }
            }
            if section.get("description").map(str::is_empty).unwrap_or(true) {
                diags.push(Diagnostic::new(loc, format!("[{}]: missing or empty description", section.name)));
            }
        }
        Diagnostics(diags).into_result()
    }
}

/// Every sync or intr message of `ast` must be allow-listed with a description.
pub fn check_sync_messages(ast: &Ast, list: &SyncAllowList) -> Result<(), Diagnostics> {
    let Some((pid, protocol)) = ast.protocol() else {
        return Ok(());
    };
    let mut diags = Vec::new();
    for (mid, msg) in ast.messages(pid) {
        if msg.send_semantics.is_async() {
            continue;
        }
        let key = message_key(&protocol.name, &msg.name);
        let problem = if !list.contains(&key) {
            "is not in"
        } else if list.description(&key).is_none() {
            "has no description in"
        } else {
            continue;
        };
        diags.push(Diagnostic::new(
            ast.loc(mid).clone(),
            format!(
                "{} message `{}` {} the sync message list {}; new sync messages need review",
                msg.send_semantics,
                key,
                problem,
                list.origin()
            ),
        ));
    }
    Diagnostics(diags).into_result()
}

/// Allow-list entries naming no declared sync message.
pub fn check_stale_entries(list: &SyncAllowList, declared: &BTreeSet<String>) -> Result<(), IpdlError> {
    let stale: BTreeSet<&str> = list.keys().filter(|k| !declared.contains(*k)).collect();
    if stale.is_empty() {
        return Ok(());
    }
    let names: Vec<&str> = stale.into_iter().collect();
    Err(IpdlError::Consistency(format!(
        "{} lists messages that no protocol declares as sync: {}",
        list.origin(),
        names.join(", ")
    )))
}

/// Per-message hints passed through to code generation.
#[derive(Debug, Clone, Default)]
pub struct MessageMetadata {
    segment_capacity: BTreeMap<String, u32>,
}

impl MessageMetadata {
    pub fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let mut segment_capacity = BTreeMap::new();
        for section in parse_ini(text, origin)? {
            let entry_error = |line: usize, message: String| ConfigError::Entry {
                origin: origin.to_string(),
                line,
                section: section.name.clone(),
                message,
            };
            if !is_message_key(&section.name) {
                return Err(entry_error(section.line, "expected Protocol::Message".to_string()));
            }
            for entry in &section.entries {
                match entry.key.as_str() {
                    "segment_capacity" => {
                        let size = entry
                            .value
                            .parse::<u32>()
                            .map_err(|e| entry_error(entry.line, format!("segment_capacity: {}", e)))?;
                        segment_capacity.insert(section.name.clone(), size);
                    }
                    other => return Err(entry_error(entry.line, format!("unknown key `{}`", other))),
                }
            }
        }
        Ok(MessageMetadata { segment_capacity })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&read_config(path)?, &path.display().to_string())
    }

    pub fn segment_capacity(&self, protocol: &str, message: &str) -> Option<u32> {
        self.segment_capacity.get(&message_key(protocol, message)).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.segment_capacity.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.segment_capacity.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "\
# Reviewed sync messages
[PBaz::Qux]
description = Needed to fetch the
  initial state synchronously.
platform = win,linux

[PBaz::Empty]
description =
";

    #[test]
    fn parses_sections_and_continuations() {
        let list = SyncAllowList::parse(LIST, "sync-messages.ini").expect("parse");
        assert_eq!(list.keys().collect::<Vec<_>>(), vec!["PBaz::Qux", "PBaz::Empty"]);
        assert_eq!(
            list.description("PBaz::Qux"),
            Some("Needed to fetch the initial state synchronously.")
        );
        assert_eq!(list.platforms("PBaz::Qux"), vec!["win", "linux"]);
        assert_eq!(list.description("PBaz::Empty"), None);
    }

    #[test]
    fn format_check_reports_each_problem() {
        let text = "[Bad]\ndescription = x\n[P::M]\ndescription = y\nplatform = beos\ncolour = red\n[P::M]\n";
        let list = SyncAllowList::parse(text, "sync.ini").expect("parse");
        let errors = list.check_format().unwrap_err();
        assert!(errors.contains("Protocol::Message"));
        assert!(errors.contains("unknown platform `beos`"));
        assert!(errors.contains("unknown key `colour`"));
        assert!(errors.contains("duplicate section"));
        assert!(errors.contains("missing or empty description"));
        assert!(errors.iter().all(|d| &*d.loc.file == "sync.ini"));
    }

    #[test]
    fn entry_before_section_is_a_syntax_error() {
        assert!(matches!(
            SyncAllowList::parse("description = x\n", "x.ini"),
            Err(ConfigError::Syntax { .. })
        ));
    }

    #[test]
    fn stale_entries() {
        let list = SyncAllowList::parse(LIST, "sync.ini").expect("parse");
        let declared: BTreeSet<String> = ["PBaz::Qux".to_string(), "PBaz::Empty".to_string()].into();
        assert!(check_stale_entries(&list, &declared).is_ok());
        let declared: BTreeSet<String> = ["PBaz::Qux".to_string()].into();
        let err = check_stale_entries(&list, &declared).unwrap_err();
        assert!(err.to_string().contains("PBaz::Empty"));
    }

    #[test]
    fn metadata_segment_capacity() {
        let md = MessageMetadata::parse("[PFoo::Bar]\nsegment_capacity = 4096\n", "md.ini").expect("parse");
        assert_eq!(md.segment_capacity("PFoo", "Bar"), Some(4096));
        assert_eq!(md.segment_capacity("PFoo", "Baz"), None);
        assert!(MessageMetadata::parse("[PFoo::Bar]\nsegment_capacity = lots\n", "md.ini").is_err());
    }
}
