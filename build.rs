fn main() -> Result<(), Box<dyn std::error::Error>> {
    let protos = [
        "proto/vtrpc.proto",
        "proto/query.proto",
        "proto/vtgate.proto",
        "proto/psdb/v1alpha1/database.proto",
    ];
    for proto in protos {
        println!("cargo:rerun-if-changed={proto}");
    }
    println!("cargo:rerun-if-changed=proto");

    // No system protoc required.
    let protoc = protoc_bin_vendored::protoc_bin_path()
        .map_err(|err| format!("vendored protoc unavailable: {err}"))?;
    std::env::set_var("PROTOC", protoc);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&protos, &["proto"])?;

    Ok(())
}
