fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_files = [
        "proto/lorix/v1/common.proto",
        "proto/lorix/v1/application_server.proto",
        "proto/lorix/v1/network_server.proto",
    ];

    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    let well_known = protoc_bin_vendored::include_path()?;

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&proto_files, &[std::path::Path::new("proto"), well_known.as_path()])?;

    for proto_file in proto_files {
        println!("cargo:rerun-if-changed={proto_file}");
    }
    Ok(())
}
