use dotenv::dotenv;

/// Load .env from the working directory, falling back to the crate root so the
/// admin binary behaves the same under `cargo run` and from an installed path.
pub fn ensure_dotenv() {
    if dotenv().is_ok() {
        return;
    }
    let root = env!("CARGO_MANIFEST_DIR");
    let candidate = format!("{}/.env", root);
    let _ = dotenv::from_filename(candidate);
}
