#[tokio::main]
async fn main() {
    if let Err(err) = ks_api::run().await {
        eprintln!("ks-api failed: {err}");
        std::process::exit(1);
    }
}
