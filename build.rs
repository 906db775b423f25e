use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // Ensure a working `protoc` is available across all CI runners by using a vendored binary.
    if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
        std::env::set_var("PROTOC", &path);
        eprintln!("build.rs: Using vendored protoc at {}", path.display());
    }

    println!("cargo:rerun-if-env-changed=MESHTASTIC_PROTO_DIR");
    println!("cargo:rerun-if-changed=protos");

    // The directory must be named `meshtastic` so that imports of the form
    // `meshtastic/mesh.proto` resolve against its parent.
    let proto_dir = env::var("MESHTASTIC_PROTO_DIR").unwrap_or_else(|_| "protos/meshtastic".into());
    let proto_root = PathBuf::from(&proto_dir);

    fn collect_protos(dir: &Path, acc: &mut Vec<PathBuf>) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    collect_protos(&path, acc);
                } else if path.extension().and_then(|e| e.to_str()) == Some("proto") {
                    acc.push(path);
                }
            }
        }
    }

    let mut protos = Vec::new();
    collect_protos(&proto_root, &mut protos);
    if protos.is_empty() {
        panic!(
            "No Meshtastic .proto files found in '{}'. Set MESHTASTIC_PROTO_DIR to a directory named `meshtastic`.",
            proto_root.display()
        );
    }
    protos.sort();
    protos.dedup();

    let include = proto_root
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| proto_root.clone());
    eprintln!(
        "build.rs: Compiling {} proto files (include path {})",
        protos.len(),
        include.display()
    );

    let mut config = prost_build::Config::new();
    config.bytes(["."]);
    config
        .compile_protos(&protos, &[include])
        .expect("Failed to compile protos");
}
