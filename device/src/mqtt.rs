use std::time::Duration;

use anyhow::{bail, Context};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ortus_common::{
    time::interval_due,
    topics::{
        STATUS_OFFLINE, STATUS_ONLINE, SWITCH_OFF, SWITCH_ON, TEMPERATURE_UNAVAILABLE,
        WATER_EMPTY, WATER_OK,
    },
    CommandAdapter, CommandSink, DeviceCommand, DeviceState, DeviceTopics, LightSchedule,
    LinkSnapshot, Millis,
};

pub const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const DEFAULT_PUMP_SECS: u32 = 60;
const REQUEST_CAPACITY: usize = 64;

/// Broker settings resolved from config and environment.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub retry_interval_ms: Millis,
    pub presence_interval_ms: Millis,
}

#[derive(Debug)]
enum Inbound {
    Connected,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
}

#[derive(Debug, Serialize)]
struct Presence<'a> {
    ip: &'a str,
    mac: &'a str,
    uptime: u32,
}

#[derive(Debug, Serialize)]
struct ScheduleState {
    enabled: bool,
    from_hour: u8,
    from_minute: u8,
    to_hour: u8,
    to_minute: u8,
}

#[derive(Debug, Deserialize)]
struct PumpRequest {
    duration: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OtaRequest {
    url: String,
}

/// Broker transport. The rumqttc event loop runs on its own task and hands
/// connection events and publishes to [`tick`](CommandAdapter::tick) through
/// a channel.
pub struct MqttCommandAdapter {
    settings: MqttSettings,
    client_id: String,
    topics: DeviceTopics,
    sink: Option<CommandSink>,
    client: Option<AsyncClient>,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,
    connected: bool,
    link: Option<LinkSnapshot>,
    last_presence: Option<Millis>,
}

impl MqttCommandAdapter {
    pub fn new(settings: MqttSettings, device_id: &str, mac: &str) -> Self {
        Self {
            settings,
            client_id: format!("ESP32-{}", mac.replace(':', "")),
            topics: DeviceTopics::new(device_id),
            sink: None,
            client: None,
            inbound: None,
            connected: false,
            link: None,
            last_presence: None,
        }
    }

    fn publish(&self, topic: &str, retain: bool, payload: String) {
        let Some(client) = &self.client else {
            return;
        };
        if let Err(err) = client.try_publish(topic, QoS::AtLeastOnce, retain, payload) {
            warn!(%topic, "mqtt publish dropped: {err}");
        }
    }

    fn publish_presence(&mut self, now: Millis) {
        let Some(link) = &self.link else {
            return;
        };
        let presence = Presence {
            ip: &link.ip_string(),
            mac: &link.mac_string(),
            uptime: now / 1000,
        };
        match serde_json::to_string(&presence) {
            Ok(payload) => {
                let topic = self.topics.presence.clone();
                self.publish(&topic, false, payload);
                self.last_presence = Some(now);
            }
            Err(err) => warn!("failed to encode presence: {err}"),
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound, now: Millis) {
        match inbound {
            Inbound::Connected => {
                self.connected = true;
                if let Some(sink) = &self.sink {
                    sink.subscriber_connected();
                }
                self.publish_presence(now);
            }
            Inbound::Disconnected => {
                if self.connected {
                    info!("mqtt disconnected; pausing presence");
                }
                self.connected = false;
            }
            Inbound::Message { topic, payload } => {
                match decode_command(&self.topics, &topic, &payload) {
                    Ok(Some(command)) => {
                        if let Some(sink) = &self.sink {
                            sink.dispatch(command);
                        }
                    }
                    Ok(None) => debug!(%topic, "ignoring publish on unhandled topic"),
                    Err(err) => warn!(%topic, "mqtt message handling error: {err:#}"),
                }
            }
        }
    }
}

impl CommandAdapter for MqttCommandAdapter {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn set_command_sink(&mut self, sink: CommandSink) {
        self.sink = Some(sink);
    }

    fn begin(&mut self) {
        if self.client.is_some() {
            return;
        }

        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        options.set_last_will(LastWill::new(
            self.topics.status.clone(),
            STATUS_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        if !self.settings.user.is_empty() {
            options.set_credentials(self.settings.user.clone(), self.settings.pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_mqtt_loop(
            client.clone(),
            eventloop,
            self.topics.clone(),
            tx,
            Duration::from_millis(self.settings.retry_interval_ms as u64),
        );

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            client_id = %self.client_id,
            "mqtt transport started"
        );
        self.client = Some(client);
        self.inbound = Some(rx);
    }

    fn tick(&mut self, now: Millis) {
        let mut drained = Vec::new();
        if let Some(inbound) = self.inbound.as_mut() {
            while let Ok(message) = inbound.try_recv() {
                drained.push(message);
            }
        }
        for message in drained {
            self.handle_inbound(message, now);
        }

        if self.connected
            && interval_due(now, self.last_presence, self.settings.presence_interval_ms)
        {
            self.publish_presence(now);
        }
    }

    fn notify_state(&mut self, state: &DeviceState) {
        for (topic, payload) in encode_state_messages(&self.topics, state) {
            self.publish(&topic, true, payload);
        }
    }

    fn link_changed(&mut self, link: &LinkSnapshot) {
        self.link = Some(*link);
    }
}

fn spawn_mqtt_loop(
    client: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
    topics: DeviceTopics,
    tx: mpsc::UnboundedSender<Inbound>,
    retry: Duration,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    let inbound = Inbound::Message {
                        topic: message.topic,
                        payload: message.payload.to_vec(),
                    };
                    if tx.send(inbound).is_err() {
                        break;
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    if let Err(err) = on_connected(&client, &topics).await {
                        warn!("mqtt session setup failed: {err:#}");
                    }
                    if tx.send(Inbound::Connected).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    if tx.send(Inbound::Disconnected).is_err() {
                        break;
                    }
                    tokio::time::sleep(retry).await;
                }
            }
        }
    });
}

/// Subscriptions do not survive a clean session, so they are renewed on
/// every connect.
async fn on_connected(client: &AsyncClient, topics: &DeviceTopics) -> anyhow::Result<()> {
    client
        .publish(topics.status.clone(), QoS::AtLeastOnce, true, STATUS_ONLINE)
        .await?;
    for topic in topics.command_topics() {
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("subscribe {topic}"))?;
    }
    Ok(())
}

/// Maps a publish on one of the command topics to a command. Unknown topics
/// yield `Ok(None)`.
pub fn decode_command(
    topics: &DeviceTopics,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<Option<DeviceCommand>> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        bail!("payload too large ({} bytes)", payload.len());
    }
    let text = std::str::from_utf8(payload).context("payload is not UTF-8")?;
    let text = text.trim();

    let command = if topic == topics.light_command {
        let value = text
            .parse::<i32>()
            .with_context(|| format!("invalid brightness {text:?}"))?;
        DeviceCommand::SetBrightness { value }
    } else if topic == topics.schedule_command {
        let schedule: LightSchedule =
            serde_json::from_str(text).context("invalid schedule JSON")?;
        DeviceCommand::ScheduleLights { schedule }
    } else if topic == topics.pump_command {
        DeviceCommand::TriggerPump {
            duration_secs: decode_pump_duration(text)?,
        }
    } else if topic == topics.ota_command {
        DeviceCommand::OtaUpdate {
            url: decode_ota_url(text)?,
        }
    } else {
        return Ok(None);
    };
    Ok(Some(command))
}

fn decode_pump_duration(text: &str) -> anyhow::Result<u32> {
    if let Ok(secs) = text.parse::<u32>() {
        return Ok(secs);
    }
    let request: PumpRequest = serde_json::from_str(text)
        .with_context(|| format!("invalid pump duration {text:?}"))?;
    Ok(request.duration.unwrap_or(DEFAULT_PUMP_SECS))
}

fn decode_ota_url(text: &str) -> anyhow::Result<String> {
    let url = if text.starts_with('{') {
        serde_json::from_str::<OtaRequest>(text)
            .context("invalid OTA request")?
            .url
    } else {
        text.to_string()
    };
    if url.is_empty() {
        bail!("empty OTA url");
    }
    Ok(url)
}

/// Retained state topics with their payloads.
pub fn encode_state_messages(topics: &DeviceTopics, state: &DeviceState) -> Vec<(String, String)> {
    let switch = |on: bool| if on { SWITCH_ON } else { SWITCH_OFF }.to_string();

    let schedule = match state.schedule {
        Some(s) => ScheduleState {
            enabled: s.enabled,
            from_hour: s.from_hour,
            from_minute: s.from_minute,
            to_hour: s.to_hour,
            to_minute: s.to_minute,
        },
        None => ScheduleState {
            enabled: false,
            from_hour: 0,
            from_minute: 0,
            to_hour: 0,
            to_minute: 0,
        },
    };
    let schedule = serde_json::to_string(&schedule).unwrap_or_default();

    let temperature = match state.temperature_c {
        Some(celsius) => format!("{celsius:.2}"),
        None => TEMPERATURE_UNAVAILABLE.to_string(),
    };
    let water = if state.water_empty { WATER_EMPTY } else { WATER_OK };

    vec![
        (topics.light_state.clone(), state.brightness.to_string()),
        (topics.schedule_state.clone(), schedule),
        (topics.pump_state.clone(), switch(state.pump_active)),
        (topics.fan_state.clone(), switch(state.fan_active)),
        (topics.temperature_state.clone(), temperature),
        (topics.water_level_state.clone(), water.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use ortus_common::WifiStatus;
    use pretty_assertions::assert_eq;

    use super::*;

    fn topics() -> DeviceTopics {
        DeviceTopics::new("AA:BB:CC:DD:EE:FF")
    }

    fn adapter() -> MqttCommandAdapter {
        MqttCommandAdapter::new(
            MqttSettings {
                host: "localhost".to_string(),
                port: 1883,
                user: String::new(),
                pass: String::new(),
                retry_interval_ms: 5_000,
                presence_interval_ms: 60_000,
            },
            "AA:BB:CC:DD:EE:FF",
            "AA:BB:CC:DD:EE:FF",
        )
    }

    #[test]
    fn presence_stops_after_broker_drops() {
        let mut mqtt = adapter();
        mqtt.link_changed(&LinkSnapshot {
            status: WifiStatus::Connected,
            mac: [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
            ip: Some(std::net::Ipv4Addr::new(10, 0, 0, 7)),
        });

        mqtt.handle_inbound(Inbound::Connected, 1_000);
        assert!(mqtt.connected);
        assert_eq!(mqtt.last_presence, Some(1_000));

        mqtt.handle_inbound(Inbound::Disconnected, 2_000);
        assert!(!mqtt.connected);
        mqtt.tick(120_000);
        assert_eq!(mqtt.last_presence, Some(1_000));

        mqtt.handle_inbound(Inbound::Connected, 130_000);
        assert_eq!(mqtt.last_presence, Some(130_000));
    }

    #[test]
    fn brightness_payload_is_an_integer() {
        let topics = topics();
        assert_eq!(
            decode_command(&topics, &topics.light_command, b" 75\n").unwrap(),
            Some(DeviceCommand::SetBrightness { value: 75 })
        );
        assert!(decode_command(&topics, &topics.light_command, b"bright").is_err());
    }

    #[test]
    fn schedule_payload_defaults_to_enabled() {
        let topics = topics();
        let payload = br#"{"from_hour":6,"from_minute":30,"to_hour":20,"to_minute":0}"#;
        assert_eq!(
            decode_command(&topics, &topics.schedule_command, payload).unwrap(),
            Some(DeviceCommand::ScheduleLights {
                schedule: LightSchedule {
                    from_hour: 6,
                    from_minute: 30,
                    to_hour: 20,
                    to_minute: 0,
                    enabled: true,
                }
            })
        );
        assert!(decode_command(&topics, &topics.schedule_command, b"{\"from_hour\":300}").is_err());
    }

    #[test]
    fn pump_accepts_seconds_or_duration_object() {
        let topics = topics();
        let decode = |payload: &[u8]| decode_command(&topics, &topics.pump_command, payload);

        assert_eq!(
            decode(b"45").unwrap(),
            Some(DeviceCommand::TriggerPump { duration_secs: 45 })
        );
        assert_eq!(
            decode(br#"{"duration":90}"#).unwrap(),
            Some(DeviceCommand::TriggerPump { duration_secs: 90 })
        );
        assert_eq!(
            decode(b"{}").unwrap(),
            Some(DeviceCommand::TriggerPump { duration_secs: 60 })
        );
        assert!(decode(b"-3").is_err());
    }

    #[test]
    fn ota_accepts_bare_url_or_object() {
        let topics = topics();
        let url = "https://updates.example.com/ortus.bin";
        let expected = Some(DeviceCommand::OtaUpdate {
            url: url.to_string(),
        });

        assert_eq!(
            decode_command(&topics, &topics.ota_command, url.as_bytes()).unwrap(),
            expected
        );
        let wrapped = format!(r#"{{"url":"{url}"}}"#);
        assert_eq!(
            decode_command(&topics, &topics.ota_command, wrapped.as_bytes()).unwrap(),
            expected
        );
        assert!(decode_command(&topics, &topics.ota_command, b"  ").is_err());
    }

    #[test]
    fn oversized_and_foreign_payloads() {
        let topics = topics();
        let big = vec![b'1'; MAX_MQTT_PAYLOAD_BYTES + 1];
        assert!(decode_command(&topics, &topics.light_command, &big).is_err());
        assert!(decode_command(&topics, &topics.light_command, &[0xFF, 0xFE]).is_err());
        assert_eq!(
            decode_command(&topics, "AA:BB:CC:DD:EE:FF/sensor/fan/state", b"ON").unwrap(),
            None
        );
    }

    #[test]
    fn state_messages_cover_every_state_topic() {
        let topics = topics();
        let state = DeviceState {
            brightness: 40,
            schedule: Some(LightSchedule::new((6, 0), (20, 15))),
            pump_active: true,
            fan_active: false,
            temperature_c: Some(23.456),
            water_empty: true,
            ..DeviceState::default()
        };

        let messages = encode_state_messages(&topics, &state);
        let get = |topic: &str| {
            messages
                .iter()
                .find(|(t, _)| t == topic)
                .map(|(_, p)| p.as_str())
        };

        assert_eq!(get(&topics.light_state), Some("40"));
        assert_eq!(
            get(&topics.schedule_state),
            Some(r#"{"enabled":true,"from_hour":6,"from_minute":0,"to_hour":20,"to_minute":15}"#)
        );
        assert_eq!(get(&topics.pump_state), Some("ON"));
        assert_eq!(get(&topics.fan_state), Some("OFF"));
        assert_eq!(get(&topics.temperature_state), Some("23.46"));
        assert_eq!(get(&topics.water_level_state), Some("EMPTY"));
    }

    #[test]
    fn missing_temperature_reads_unavailable() {
        let topics = topics();
        let messages = encode_state_messages(&topics, &DeviceState::default());
        assert!(messages
            .iter()
            .any(|(t, p)| t == &topics.temperature_state && p == "unavailable"));
    }
}
