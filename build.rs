fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_LIBPAM");

    // the conversation bridge itself only speaks the libpam ABI; the library
    // is needed once we start transactions
    if std::env::var_os("CARGO_FEATURE_LIBPAM").is_some() {
        println!("cargo:rustc-link-lib=pam");
    }
}
