use std::{env, path::PathBuf};

fn main() {
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap();
    if target_arch == "x86_64" && target_os == "none" {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let linker_script = manifest_dir.join("kernel.ld");
        println!("cargo:rerun-if-changed={}", linker_script.display());
        println!("cargo::rustc-link-arg=-T{}", linker_script.display());
        println!("cargo::rustc-link-arg=-no-pie");
    }
}
