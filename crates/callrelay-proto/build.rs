fn main() -> Result<(), Box<dyn std::error::Error>> {
    // - logs.proto: LogService (gateway calls the accepted/rejected sinks)
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/logs.proto"], &["proto/"])?;

    println!("cargo:rerun-if-changed=proto/logs.proto");

    Ok(())
}
