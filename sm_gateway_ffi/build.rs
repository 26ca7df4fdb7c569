use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");

    let crate_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => return,
    };

    let result = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("SM_GATEWAY_FFI_H")
        .with_documentation(true)
        .generate();

    match result {
        Ok(bindings) => {
            bindings.write_to_file(crate_dir.join("sm_gateway.h"));
        }
        // 头文件生成失败不影响库本身的构建
        Err(e) => println!("cargo:warning=Unable to generate C header: {}", e),
    }
}
