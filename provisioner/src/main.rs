//! Sends Wi-Fi credentials to a device over its radio bridge and reports how
//! the join went.

use std::time::Duration;

use anyhow::{bail, Context};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::info;

use ortus_common::{
    rpc::{self, CMD_SET_WIFI_CREDENTIALS},
    BridgeRecord, Characteristic, ImprovError, ImprovState, RecordDecoder,
};

/// Longer than the device's own provisioning timeout so its verdict arrives.
const SESSION_TIMEOUT: Duration = Duration::from_secs(70);
/// Bytes per write, the payload of a default BLE ATT write.
const WRITE_CHUNK: usize = 20;

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Provisioned(String),
    Failed(ImprovError),
}

/// Follows the device's characteristic stream for one session.
#[derive(Debug, Default)]
struct SessionWatch {
    started: bool,
}

impl SessionWatch {
    fn observe(&mut self, record: &BridgeRecord) -> anyhow::Result<Option<Outcome>> {
        let first = record.value.first().copied();
        match record.characteristic {
            Characteristic::State => {
                if let Some(state) = first.and_then(ImprovState::from_byte) {
                    info!(state = state.as_str(), "device state");
                    if state == ImprovState::Provisioning {
                        self.started = true;
                    }
                }
            }
            Characteristic::Error => match first.and_then(ImprovError::from_byte) {
                None | Some(ImprovError::None) => {}
                Some(error) => return Ok(Some(Outcome::Failed(error))),
            },
            // Results replayed from an earlier session arrive before ours starts.
            Characteristic::RpcResult if self.started => {
                let frame = rpc::decode_frame(&record.value).context("malformed rpc result")?;
                let summary = String::from_utf8_lossy(frame.payload).into_owned();
                return Ok(Some(Outcome::Provisioned(summary)));
            }
            _ => {}
        }
        Ok(None)
    }
}

fn credential_writes(ssid: &str, password: &str) -> anyhow::Result<Vec<Vec<u8>>> {
    let payload = rpc::encode_credentials(ssid, password)?;
    let frame = rpc::encode_frame(CMD_SET_WIFI_CREDENTIALS, &payload)?;
    Ok(frame
        .chunks(WRITE_CHUNK)
        .map(|chunk| BridgeRecord::new(Characteristic::RpcCommand, chunk).encode())
        .collect())
}

async fn provision(addr: &str, ssid: &str, password: &str) -> anyhow::Result<Outcome> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to radio bridge at {addr}"))?;
    info!(%addr, %ssid, "sending credentials");

    for write in credential_writes(ssid, password)? {
        stream.write_all(&write).await?;
    }
    stream.flush().await?;

    let mut watch = SessionWatch::default();
    let mut decoder = RecordDecoder::new();
    let mut buf = [0u8; 256];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            bail!("device closed the connection");
        }
        decoder.push(&buf[..n]);
        while let Some(record) = decoder.next_record() {
            if let Some(outcome) = watch.observe(&record)? {
                return Ok(outcome);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let addr = std::env::var("ORTUS_RADIO_ADDR").unwrap_or_else(|_| "127.0.0.1:4677".to_string());
    let ssid = std::env::var("ORTUS_SSID").context("ORTUS_SSID must be set")?;
    let password = std::env::var("ORTUS_PASSWORD").unwrap_or_default();

    let outcome = tokio::time::timeout(SESSION_TIMEOUT, provision(&addr, &ssid, &password))
        .await
        .context("timed out waiting for the device")??;

    match outcome {
        Outcome::Provisioned(summary) => {
            info!(%summary, "device provisioned");
            Ok(())
        }
        Outcome::Failed(error) => bail!(
            "provisioning failed: {} (0x{:02x})",
            error.describe(),
            error.as_byte()
        ),
    }
}
