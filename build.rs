//! Build script to track include_str! dependencies.
//! This ensures cargo rebuilds when template files change.

fn main() {
    // Track the config template written by `ticketdesk init`
    println!("cargo:rerun-if-changed=resources/config.toml");
}
