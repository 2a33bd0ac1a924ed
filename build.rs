use std::env;
use std::fs;
use std::path::Path;

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let abi_version_path = Path::new(&out_dir).join("abi_version.rs");

    // Read ABI version from Cargo.toml metadata
    let cargo_manifest = env::var("CARGO_MANIFEST_DIR").unwrap();
    let cargo_toml_path = Path::new(&cargo_manifest).join("Cargo.toml");
    let cargo_toml_content = fs::read_to_string(&cargo_toml_path)
        .expect("Failed to read Cargo.toml");

    let cargo_toml: toml::Value = cargo_toml_content.parse()
        .expect("Failed to parse Cargo.toml");

    let abi_version = cargo_toml
        .get("package")
        .and_then(|p| p.get("metadata"))
        .and_then(|m| m.get("pluginrt"))
        .and_then(|g| g.get("abi_version"))
        .and_then(|v| v.as_integer())
        .expect("Failed to find package.metadata.pluginrt.abi_version in Cargo.toml");

    let version_content = format!(
        "// Auto-generated native runtime ABI version from Cargo.toml metadata\n\
         // Source: package.metadata.pluginrt.abi_version = {}\n\
         pub const ABI_VERSION: u32 = {};\n",
        abi_version, abi_version
    );

    fs::write(&abi_version_path, version_content)
        .expect("Failed to write abi_version.rs");

    println!("cargo:rerun-if-changed=Cargo.toml");
}
