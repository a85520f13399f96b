fn main() {
    // Exposes PKG_VERSION, RUSTC_VERSION and friends to `vwap_forecast::build_info`
    built::write_built_file().expect("Failed to generate build info");
}
