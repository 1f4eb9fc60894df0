fn main() -> std::io::Result<()> {
    prost_build::compile_protos(&["proto/update_metadata.proto"], &["proto/"])?;
    println!("cargo:rerun-if-changed=proto/update_metadata.proto");
    Ok(())
}
