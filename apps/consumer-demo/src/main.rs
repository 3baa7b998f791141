//! Consumer Demo - Entry Point
//!
//! Runs an order-processing component over the in-memory transport.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    consumer_demo::run().await
}
