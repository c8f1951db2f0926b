// Build script for the symphony-proto wire contract.
// Handles protobuf code generation for the node <-> conductor stream.

fn main() {
    // Use vendored protoc from protobuf-src so the build doesn't require a
    // system protoc install.
    std::env::set_var("PROTOC", protobuf_src::protoc());

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .out_dir("src/generated")
        .compile_protos(&["proto/symphony.proto"], &["proto"])
        .unwrap_or_else(|e| panic!("failed to compile symphony.proto: {e}"));

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/");
}
