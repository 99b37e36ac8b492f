fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true) // Used by the CLI and integration tests
        .compile_protos(&["proto/album.proto"], &["proto/"])?;
    println!("cargo:rerun-if-changed=proto/album.proto");
    Ok(())
}
