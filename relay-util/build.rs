//! Compile time configurations for the util crate
fn main() {
    // the RELAY_PKG_NAME variable is used to create the local folder under
    // `~/.config` holding persisted configuration. Do not change the name
    // unless you know what you are doing as this means any prior assignment
    // will no longer be found and the device will try to provision again.
    println!("cargo::rustc-env=RELAY_PKG_NAME=cloud-relay");
}
