//! Grid Hub - Entry Point
//!
//! Control plane: submission API, monitor WebSocket fan-out, webhook
//! delivery and the stale-worker janitor.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    grid_hub::run().await
}
