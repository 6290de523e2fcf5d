#[tokio::main]
async fn main() {
    if let Err(e) = clinilink_lib::run().await {
        eprintln!("clinilink: {e}");
        std::process::exit(1);
    }
}
