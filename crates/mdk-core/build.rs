fn main() {
    // MobileDevice is a private framework and is not on the default search path.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        for dir in [
            "/Library/Apple/System/Library/PrivateFrameworks",
            "/System/Library/PrivateFrameworks",
        ] {
            println!("cargo:rustc-link-search=framework={dir}");
        }
    }
}
