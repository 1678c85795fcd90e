use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Extensions resolve the capi_* entry points against the running binary.
    match env::var("CARGO_CFG_TARGET_OS").as_deref() {
        Ok("linux") | Ok("freebsd") => {
            println!("cargo:rustc-link-arg-bins=-Wl,--export-dynamic");
        }
        Ok("macos") => {
            println!("cargo:rustc-link-arg-bins=-Wl,-export_dynamic");
        }
        _ => {}
    }
}
