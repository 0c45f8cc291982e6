pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

pub const SWITCH_ON: &str = "ON";
pub const SWITCH_OFF: &str = "OFF";
pub const WATER_EMPTY: &str = "EMPTY";
pub const WATER_OK: &str = "OK";
pub const TEMPERATURE_UNAVAILABLE: &str = "unavailable";

/// Broker topics for one device, rooted at its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    pub status: String,
    pub presence: String,
    pub light_command: String,
    pub light_state: String,
    pub schedule_command: String,
    pub schedule_state: String,
    pub pump_command: String,
    pub pump_state: String,
    pub fan_state: String,
    pub temperature_state: String,
    pub water_level_state: String,
    pub ota_command: String,
}

impl DeviceTopics {
    pub fn new(device_id: &str) -> Self {
        let sensor = |kind: &str, leaf: &str| format!("{device_id}/sensor/{kind}/{leaf}");
        Self {
            status: format!("{device_id}/status"),
            presence: format!("{device_id}/presence"),
            light_command: sensor("light", "command"),
            light_state: sensor("light", "state"),
            schedule_command: sensor("light/schedule", "command"),
            schedule_state: sensor("light/schedule", "state"),
            pump_command: sensor("pump", "command"),
            pump_state: sensor("pump", "state"),
            fan_state: sensor("fan", "state"),
            temperature_state: sensor("temperature", "state"),
            water_level_state: sensor("water_level", "state"),
            ota_command: format!("{device_id}/ota/command"),
        }
    }

    pub fn command_topics(&self) -> [&str; 4] {
        [
            &self.light_command,
            &self.schedule_command,
            &self.pump_command,
            &self.ota_command,
        ]
    }
}
