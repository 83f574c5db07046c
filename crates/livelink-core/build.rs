//! Build script for livelink-core
//!
//! ## Requirements
//!
//! - **Rust**: 1.77 or newer (dependency MSRV; `div_ceil`, `next_multiple_of`)
//! - **Windows**: needed for loaded-module discovery and relinking; other
//!   targets build the readers and the rebuild loop

fn main()
{
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 77, 0);

        if rustc_version < min_rust_version {
            panic!(
                "livelink-core requires Rust {} or newer, found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        println!("cargo:warning=could not verify Rust version");
    }

    println!("cargo:rerun-if-changed=build.rs");
}
