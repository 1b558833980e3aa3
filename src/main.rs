#[tokio::main]
async fn main() -> anyhow::Result<()> {
    deskpilot::run().await
}
