//! Multi-file build: parse, check, gate, generate in parallel, merge.
//!
//! Every phase before code generation runs over all inputs and aborts the
//! invocation on the first failing phase, so nothing is written unless every
//! file made it through. Generation fans out over a bounded thread pool; each
//! task owns nothing but a shared borrow of its AST and hands its result back
//! by value. The global artifacts are rendered from the sorted merge.

use crate::ast::Ast;
use crate::config::{check_stale_entries, check_sync_messages, message_key, MessageMetadata, SyncAllowList};
use crate::cxx::{gen_cxx, Written};
use crate::emit::write_if_modified;
use crate::error::{Diagnostics, IpdlError};
use crate::merge::{
    duplicate_protocol, merge, protocol_metadata, render_message_start, render_message_type_names, render_protocols_json,
    FileOutput, MAX_PROTOCOL_IDS,
};
use crate::parser::Parser;
use crate::typecheck::typecheck;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info, warn};

/// Upper bound on codegen threads, whatever the machine offers.
pub const MAX_WORKERS: usize = 8;

pub const MESSAGE_START_HEADER: &str = "IPCMessageStart.h";
pub const MESSAGE_TYPE_NAMES: &str = "IPCMessageTypeName.cpp";

#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    pub files: Vec<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub headers_dir: PathBuf,
    pub cpp_dir: PathBuf,
    pub sync_msg_list: PathBuf,
    pub msg_metadata: Option<PathBuf>,
    /// Defaults to `<cpp_dir>/protocols.json`.
    pub protocols_json: Option<PathBuf>,
    /// Worker threads; `None` picks `min(available parallelism, MAX_WORKERS)`.
    pub jobs: Option<usize>,
}

impl BuildConfig {
    pub fn protocols_json_path(&self) -> PathBuf {
        self.protocols_json
            .clone()
            .unwrap_or_else(|| self.cpp_dir.join("protocols.json"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub files: usize,
    pub protocols: usize,
    pub sync_messages: usize,
    /// Every file generated this run, global artifacts last.
    pub written: Vec<Written>,
}

impl BuildSummary {
    pub fn changed(&self) -> usize {
        self.written.iter().filter(|w| w.changed).count()
    }
}

pub fn worker_count(jobs: Option<usize>) -> usize {
    match jobs {
        Some(n) => n.max(1),
        None => thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_WORKERS),
    }
}

pub fn build(config: &BuildConfig) -> Result<BuildSummary, IpdlError> {
    // Phase 1: parse.
    info!("parsing {} file(s)", config.files.len());
    let mut parser = Parser::new(config.include_dirs.clone());
    let mut asts = Vec::with_capacity(config.files.len());
    for file in &config.files {
        debug!("parsing {}", file.display());
        asts.push(parser.parse_file(file)?);
    }
    let includes = parser.into_includes();

    // Phase 2: type-check every file before giving up, then report the first.
    info!("type checking");
    let mut failures = Vec::new();
    for ast in &mut asts {
        if let Err(errors) = typecheck(ast, &includes) {
            failures.push((ast.filename().to_path_buf(), errors));
        }
    }
    if let Some((file, errors)) = failures.into_iter().next() {
        return Err(IpdlError::Type { file, errors });
    }

    // Phase 3: sync message governance.
    info!("checking sync messages against {}", config.sync_msg_list.display());
    let allow_list = SyncAllowList::load(&config.sync_msg_list)?;
    let mut ungoverned = Vec::new();
    for ast in &asts {
        if let Err(errors) = check_sync_messages(ast, &allow_list) {
            ungoverned.extend(errors.0);
        }
    }
    if !ungoverned.is_empty() {
        return Err(IpdlError::Governance(Diagnostics(ungoverned)));
    }

    // Phase 4: the allow-list itself.
    allow_list.check_format().map_err(IpdlError::Governance)?;

    // Stale entries and duplicate protocols fail the build before anything is written.
    check_unique_protocols(&asts)?;
    let declared = declared_sync_messages(&asts);
    check_stale_entries(&allow_list, &declared)?;

    let metadata = match &config.msg_metadata {
        Some(path) => MessageMetadata::load(path)?,
        None => MessageMetadata::default(),
    };
    warn_unused_metadata(&asts, &metadata);

    // Phase 5: per-file codegen on the pool.
    let workers = worker_count(config.jobs);
    info!("generating code for {} file(s) on {} thread(s)", asts.len(), workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("ipdl-codegen-{}", i))
        .build()
        .map_err(|e| IpdlError::Pool(e.to_string()))?;
    let outputs: Vec<FileOutput> = pool.install(|| {
        asts.par_iter()
            .map(|ast| generate(ast, &config.headers_dir, &config.cpp_dir, &metadata))
            .collect::<Result<Vec<_>, IpdlError>>()
    })?;

    // Phase 6: merge and emit the global artifacts.
    let mut written: Vec<Written> = outputs.iter().flat_map(|o| o.written.iter().cloned()).collect();
    let merged = merge(outputs)?;
    info!("merged {} protocol(s), {} sync message(s)", merged.protocols.len(), merged.sync.len());
    if merged.protocols.len() > MAX_PROTOCOL_IDS {
        warn!(
            "{} protocols exceed the {} available protocol ids; the generated static_assert will fail",
            merged.protocols.len(),
            MAX_PROTOCOL_IDS
        );
    }

    let artifacts = [
        (config.headers_dir.join(MESSAGE_START_HEADER), render_message_start(&merged)),
        (config.cpp_dir.join(MESSAGE_TYPE_NAMES), render_message_type_names(&merged)),
        (config.protocols_json_path(), render_protocols_json(&merged)?),
    ];
    for (path, contents) in artifacts {
        let changed = write_if_modified(&path, &contents)?;
        written.push(Written { path, changed });
    }

    let summary = BuildSummary {
        files: asts.len(),
        protocols: merged.protocols.len(),
        sync_messages: merged.sync.len(),
        written,
    };
    info!(
        "done: {} file(s), {} output(s), {} changed",
        summary.files,
        summary.written.len(),
        summary.changed()
    );
    Ok(summary)
}

/// One codegen task: per-file C++ plus the protocol's metadata record.
fn generate(ast: &Ast, headers_dir: &Path, cpp_dir: &Path, metadata: &MessageMetadata) -> Result<FileOutput, IpdlError> {
    let written = gen_cxx(ast, headers_dir, cpp_dir, metadata)?;
    Ok(FileOutput {
        file: ast.filename().to_path_buf(),
        written,
        protocol: protocol_metadata(ast),
    })
}

/// Each protocol name may be declared by one file only.
pub fn check_unique_protocols(asts: &[Ast]) -> Result<(), IpdlError> {
    let mut declared: Vec<(&str, &Path)> = asts
        .iter()
        .filter_map(|ast| ast.protocol().map(|(_, p)| (p.name.as_str(), ast.filename())))
        .collect();
    declared.sort();
    match declared.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        Some(pair) => Err(duplicate_protocol(pair[0].0, pair[0].1, pair[1].1)),
        None => Ok(()),
    }
}

/// `Protocol::Message` for every sync or intr message across all files.
pub fn declared_sync_messages(asts: &[Ast]) -> BTreeSet<String> {
    let mut declared = BTreeSet::new();
    for ast in asts {
        let Some((pid, protocol)) = ast.protocol() else { continue };
        for (_, msg) in ast.messages(pid) {
            if !msg.send_semantics.is_async() {
                declared.insert(message_key(&protocol.name, &msg.name));
            }
        }
    }
    declared
}

fn warn_unused_metadata(asts: &[Ast], metadata: &MessageMetadata) {
    if metadata.is_empty() {
        return;
    }
    let mut known = BTreeSet::new();
    for ast in asts {
        if let Some((pid, protocol)) = ast.protocol() {
            for (_, msg) in ast.messages(pid) {
                known.insert(message_key(&protocol.name, &msg.name));
            }
        }
    }
    for key in metadata.keys().filter(|k| !known.contains(*k)) {
        warn!("message metadata for `{}` matches no declared message", key);
    }
}
