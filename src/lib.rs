//! # ipdl — IPDL compiler front-end and build driver
//!
//! IPDL describes cross-process message protocols: which side may send which
//! message, whether the sender blocks for a reply, at what priority and
//! nesting level it is delivered, and a per-protocol state machine saying
//! which messages are legal in which state. This crate parses `.ipdl` and
//! `.ipdlh` files with a PEST grammar, type-checks them, gates new sync
//! messages behind a reviewed allow-list, generates C++ for every file on a
//! bounded thread pool and merges the per-protocol results into global
//! artifacts whose bytes do not depend on scheduling order.
//!
//! ## Pipeline
//!
//! 1. [`parser`]: text to [`ast::Ast`], includes resolved.
//! 2. [`typecheck`]: semantic rules and decorations.
//! 3. [`config`]: sync message allow-list gate and its format check.
//! 4. [`cxx`] and [`msgenum`]: per-file C++ and message ids, in parallel.
//! 5. [`merge`]: sorted merge, `IPCMessageStart.h`, `IPCMessageTypeName.cpp`
//!    and `protocols.json`, written through [`emit::write_if_modified`].
//!
//! [`driver::build`] runs all of it.
//!
//! ## Example IPDL
//!
//! ```text
//! include protocol PBrowser;
//!
//! namespace mozilla {
//! namespace dom {
//!
//! sync protocol PBaz {
//!   manages PBrowser;
//!
//! parent:
//!   sync Qux(nsCString key) returns (int32_t value);
//!
//! child:
//!   async Bar();
//!
//! start state Idle:
//!   recv Qux goto Idle;
//!   send Bar goto Idle;
//! };
//!
//! } // namespace dom
//! } // namespace mozilla
//! ```

pub mod ast;
pub mod config;
pub mod cxx;
pub mod driver;
pub mod emit;
pub mod error;
pub mod merge;
pub mod msgenum;
pub mod parser;
pub mod state;
pub mod typecheck;
pub mod visit;

pub use ast::{Ast, NodeId, NodeKind};
pub use driver::{build, BuildConfig, BuildSummary};
pub use error::{Diagnostic, Diagnostics, IpdlError, ParseError};
pub use parser::{parse, IncludeCache, Parser};
pub use state::{Direction, Nesting, Priority, SendSemantics, State, Transition, Trigger};
pub use typecheck::typecheck;
pub use visit::{accept, Visitor};
