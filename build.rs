fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Server stubs only; clients are generated from the same files by the web app
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile_protos(
            &[
                "proto/common.proto",
                "proto/auth.proto",
                "proto/user.proto",
                "proto/workspace.proto",
                "proto/member.proto",
                "proto/invitation.proto",
                "proto/health.proto",
            ],
            &["proto"],
        )?;

    // Rerun if proto files change
    println!("cargo:rerun-if-changed=proto/");
    println!("cargo:rerun-if-changed=migrations/");

    Ok(())
}
