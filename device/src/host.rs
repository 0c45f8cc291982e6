use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use ortus_common::{
    store::{STATE_NAMESPACE, WIFI_NAMESPACE},
    CredentialStore, Device, DeviceStateStore, Millis, NetworkConfig, Peripherals,
    RadioCommandAdapter, RuntimeConfig, StateSynchronizer, WifiConnectionManager,
};

use crate::{
    hardware::{self, HostOta, LoggingActuators, SimulatedSensors, SimulatedWifi},
    mqtt::{MqttCommandAdapter, MqttSettings},
    radio_bridge::RadioBridge,
    storage::JsonFileStore,
    ws::WebSocketCommandAdapter,
};

const LOOP_PERIOD: Duration = Duration::from_millis(50);
const DEFAULT_WATER_RAW: u16 = 2_600;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = data_dir();
    let mut runtime = load_runtime_config(&data_dir.join("runtime.json"))
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config from store: {err:#}");
            RuntimeConfig::default()
        });
    apply_env_overrides(&mut runtime.network, |key| std::env::var(key).ok());
    runtime.sanitize();
    if runtime.timezone.parse::<Tz>().is_err() {
        warn!(timezone = %runtime.timezone, "unknown timezone; using UTC");
        runtime.timezone = "UTC".to_string();
    }

    let mac = hardware::host_mac(&hardware::hostname());
    let mut credentials = CredentialStore::new(JsonFileStore::open(&data_dir, WIFI_NAMESPACE));
    if env_flag("ORTUS_FORGET_WIFI") {
        match credentials.clear() {
            Ok(()) => info!("stored Wi-Fi credentials erased"),
            Err(err) => warn!("failed to erase Wi-Fi credentials: {err}"),
        }
    }
    let wifi = WifiConnectionManager::new(SimulatedWifi::new(mac), credentials, &runtime.device);
    let mac_string = wifi.snapshot().mac_string();
    let device_id = runtime
        .network
        .device_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| mac_string.clone());

    let bridge = RadioBridge::bind(SocketAddr::from(([0, 0, 0, 0], runtime.network.radio_port)))
        .await?;

    let water_raw = std::env::var("ORTUS_SIM_WATER_RAW")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_WATER_RAW);
    let mut sync = StateSynchronizer::new(
        &runtime.device,
        DeviceStateStore::new(JsonFileStore::open(&data_dir, STATE_NAMESPACE)),
        Peripherals {
            sensors: Box::new(SimulatedSensors::new(water_raw)),
            actuators: Box::new(LoggingActuators),
            ota: Box::new(HostOta),
        },
    );

    sync.add_adapter(Box::new(RadioCommandAdapter::new(bridge.control)));
    sync.add_adapter(Box::new(MqttCommandAdapter::new(
        MqttSettings {
            host: runtime.network.mqtt_host.clone(),
            port: runtime.network.mqtt_port,
            user: runtime.network.mqtt_user.clone(),
            pass: runtime.network.mqtt_pass.clone(),
            retry_interval_ms: runtime.device.mqtt_retry_interval_ms,
            presence_interval_ms: runtime.device.presence_interval_ms,
        },
        &device_id,
        &mac_string,
    )));
    let web_root = PathBuf::from(format!("{}/web", env!("CARGO_MANIFEST_DIR")));
    sync.add_adapter(Box::new(WebSocketCommandAdapter::new(
        runtime.network.ws_port,
        web_root,
        Duration::from_millis(runtime.device.mqtt_retry_interval_ms as u64),
    )));

    let mut device = Device::new(&runtime.device, bridge.provisioning, wifi, sync);
    info!(
        %device_id,
        radio = %bridge.local_addr,
        data_dir = %data_dir.display(),
        "device starting"
    );
    device.begin(monotonic_ms());

    let mut interval = tokio::time::interval(LOOP_PERIOD);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                device.tick(monotonic_ms(), now_in_timezone(&runtime.timezone));
            }
            result = &mut shutdown => {
                result.context("failed to listen for shutdown signal")?;
                info!("shutting down");
                break;
            }
        }
    }
    Ok(())
}

fn data_dir() -> PathBuf {
    std::env::var("ORTUS_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.ortus"))
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config {}", path.display()))?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn apply_env_overrides(network: &mut NetworkConfig, lookup: impl Fn(&str) -> Option<String>) {
    let port = |key: &str| lookup(key).and_then(|value| value.parse::<u16>().ok());

    if let Some(host) = lookup("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = port("MQTT_PORT") {
        network.mqtt_port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(port) = port("ORTUS_WS_PORT") {
        network.ws_port = port;
    }
    if let Some(port) = port("ORTUS_RADIO_PORT") {
        network.radio_port = port;
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

/// Milliseconds since start, wrapping like the hardware tick counter.
fn monotonic_ms() -> Millis {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as Millis
}
