//! Parser fuzz target: feed arbitrary text to the IPDL parser and, when it
//! parses, to the type-checker. Neither may panic.
//! Build with: cargo fuzz run parser_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    if let Ok(mut ast) = ipdl::parse(s, "PFuzz.ipdl") {
        let _ = ipdl::typecheck(&mut ast, &ipdl::IncludeCache::default());
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run parser_fuzz");
}
