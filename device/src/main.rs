mod hardware;
mod host;
mod mqtt;
mod radio_bridge;
mod storage;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
