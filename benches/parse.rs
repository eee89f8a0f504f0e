//! Benchmark: parse and type-check a synthetic protocol with many messages
//! and states, and merge metadata for many protocols.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ipdl::merge::{merge, protocol_metadata, render_message_type_names, FileOutput};
use ipdl::{parse, typecheck, IncludeCache};
use std::fmt::Write as _;
use std::path::PathBuf;

fn synthetic_protocol(name: &str, messages: usize) -> String {
    let mut src = String::from("namespace mozilla {\nnamespace bench {\n\n");
    let _ = writeln!(src, "intr protocol {} {{\nparent:", name);
    for i in 0..messages {
        match i % 3 {
            0 => {
                let _ = writeln!(src, "  async Async{}(int32_t a, nsCString b);", i);
            }
            1 => {
                let _ = writeln!(src, "  sync Sync{}(uint64_t id) returns (bool ok);", i);
            }
            _ => {
                let _ = writeln!(src, "  intr Intr{}(double x) returns (double y);", i);
            }
        }
    }
    src.push_str("\nstart state S0:\n");
    for i in 0..messages {
        let trigger = match i % 3 {
            0 => "recv",
            _ => "answer",
        };
        let kind = match i % 3 {
            0 => "Async",
            1 => "Sync",
            _ => "Intr",
        };
        let _ = writeln!(src, "  {} {}{} goto S0;", trigger, kind, i);
    }
    src.push_str("};\n\n}\n}\n");
    src
}

fn bench_parse(c: &mut Criterion) {
    let src = synthetic_protocol("PBench", 300);

    c.bench_function("parse_300_messages", |b| {
        b.iter(|| parse(black_box(&src), "PBench.ipdl").expect("parse"));
    });

    c.bench_function("parse_typecheck_300_messages", |b| {
        let includes = IncludeCache::default();
        b.iter(|| {
            let mut ast = parse(black_box(&src), "PBench.ipdl").expect("parse");
            typecheck(&mut ast, &includes).expect("typecheck");
            ast
        });
    });

    let outputs: Vec<FileOutput> = (0..200)
        .map(|i| {
            let name = format!("PBench{}", i);
            let ast = parse(&synthetic_protocol(&name, 12), format!("{}.ipdl", name)).expect("parse");
            FileOutput { file: PathBuf::from(format!("{}.ipdl", name)), written: Vec::new(), protocol: protocol_metadata(&ast) }
        })
        .collect();
    c.bench_function("merge_render_200_protocols", |b| {
        b.iter(|| {
            let merged = merge(black_box(outputs.clone())).expect("merge");
            render_message_type_names(&merged)
        });
    });
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
