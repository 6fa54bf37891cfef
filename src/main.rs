#[tokio::main]
async fn main() {
    if let Err(e) = tonecraft::run().await {
        eprintln!("tonecraft: {e}");
        std::process::exit(1);
    }
}
