//! Compile IPDL files to C++ and the global message tables.
//!
//! Usage:
//!   ipdlc -I ipc/ipdl --sync-msg-list sync-messages.ini \
//!         --outheaders-dir out/ipdl/_ipdlheaders --outcpp-dir out/ipdl PFoo.ipdl PBaz.ipdl ...

use anyhow::{Context, Result};
use clap::Parser;
use ipdl::{build, BuildConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "ipdlc")]
#[command(about = "IPDL compiler and build driver")]
struct Args {
    /// .ipdl and .ipdlh files to compile
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Directory searched for included protocols and headers (repeatable)
    #[arg(short = 'I', long = "include")]
    include_dirs: Vec<PathBuf>,

    /// Reviewed list of sync messages
    #[arg(long)]
    sync_msg_list: PathBuf,

    /// Per-message hints such as segment_capacity
    #[arg(long)]
    msg_metadata: Option<PathBuf>,

    /// Where generated headers go
    #[arg(long)]
    outheaders_dir: PathBuf,

    /// Where generated .cpp files go
    #[arg(long)]
    outcpp_dir: PathBuf,

    /// Path of protocols.json (defaults to <outcpp-dir>/protocols.json)
    #[arg(long)]
    protocols_json: Option<PathBuf>,

    /// Codegen threads (defaults to available parallelism, at most 8)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: Args) -> Result<()> {
    let config = BuildConfig {
        files: args.files,
        include_dirs: args.include_dirs,
        headers_dir: args.outheaders_dir,
        cpp_dir: args.outcpp_dir,
        sync_msg_list: args.sync_msg_list,
        msg_metadata: args.msg_metadata,
        protocols_json: args.protocols_json,
        jobs: args.jobs,
    };
    let summary = build(&config).context("IPDL compilation failed")?;
    info!(
        "{} protocol(s) in {} file(s); {} of {} output(s) changed",
        summary.protocols,
        summary.files,
        summary.changed(),
        summary.written.len()
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins over --verbose.
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
