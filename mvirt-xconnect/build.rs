fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Client only; the dataplane agent serves the configurator API.
    tonic_prost_build::configure()
        .build_server(false)
        .compile_protos(&["proto/ligato/configurator/configurator.proto"], &["proto"])?;
    Ok(())
}
