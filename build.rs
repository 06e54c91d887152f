//! Build script for onnx-modifier
//!
//! Generates the ONNX IR types from `proto/onnx.proto` using prost-build.

use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_path = PathBuf::from("proto/onnx.proto");

    if !proto_path.exists() {
        return Err(format!(
            "ONNX proto file not found at: {}\n\
             The proto2 schema is expected under proto/ next to Cargo.toml.",
            proto_path.display()
        )
        .into());
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    // Use a vendored protoc when none is provided via the environment.
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let mut config = prost_build::Config::new();

    // Deterministic ordering for any map fields
    config.btree_map(["."]);
    config.out_dir(&out_dir);
    config.compile_protos(&[&proto_path], &["proto/"])?;

    println!("cargo:rerun-if-changed=proto/onnx.proto");
    println!("cargo:rerun-if-changed=build.rs");

    Ok(())
}
