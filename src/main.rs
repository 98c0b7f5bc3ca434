//! bookforge CLI binary.
//!
//! Minimal entrypoint; all logic is in the library and main only invokes
//! cli::run(), mapping failure to a nonzero exit.

#[tokio::main]
async fn main() {
    if let Err(err) = bookforge::cli::run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
