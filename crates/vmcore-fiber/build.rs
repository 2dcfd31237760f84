use std::env;

fn main() {
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    println!("cargo:rerun-if-changed=src/arch/x86_64.s");

    if arch != "x86_64" {
        // The spec scopes this engine to x86-64; other architectures get a
        // build-time error rather than a silently-wrong switch routine.
        panic!("vmcore-fiber: no native context-switch routine for target_arch={arch}");
    }

    let mut build = cc::Build::new();
    build.file("src/arch/x86_64.s");
    build.compile("vmcore_fiber_switch");
}
