fn main() {
    #[cfg(feature = "uhd")]
    {
        println!("cargo:rustc-link-lib=uhd");
    }
}
