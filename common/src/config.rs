use serde::{Deserialize, Serialize};

use crate::time::Millis;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub provisioning_timeout_ms: Millis,
    pub error_display_ms: Millis,
    pub wifi_retry_interval_ms: Millis,
    pub temp_poll_interval_ms: Millis,
    pub temp_delta_threshold_c: f32,
    pub min_valid_temp_c: f32,
    pub max_valid_temp_c: f32,
    pub water_poll_interval_ms: Millis,
    pub water_empty_threshold: u16,
    pub water_hysteresis: u16,
    pub fan_on_temp_c: f32,
    pub fan_off_temp_c: f32,
    pub max_pump_duration_secs: u32,
    pub pump_requires_water: bool,
    pub schedule_eval_interval_ms: Millis,
    pub presence_interval_ms: Millis,
    pub mqtt_retry_interval_ms: Millis,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            provisioning_timeout_ms: 60_000,
            error_display_ms: 5_000,
            wifi_retry_interval_ms: 10_000,
            temp_poll_interval_ms: 5_000,
            temp_delta_threshold_c: 0.5,
            min_valid_temp_c: -50.0,
            max_valid_temp_c: 150.0,
            water_poll_interval_ms: 1_000,
            water_empty_threshold: 1_500,
            water_hysteresis: 100,
            fan_on_temp_c: 28.0,
            fan_off_temp_c: 25.0,
            max_pump_duration_secs: 300,
            pump_requires_water: true,
            schedule_eval_interval_ms: 30_000,
            presence_interval_ms: 60_000,
            mqtt_retry_interval_ms: 5_000,
        }
    }
}

impl DeviceConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if self.fan_off_temp_c > self.fan_on_temp_c {
            warn_reset("fan thresholds");
            self.fan_on_temp_c = defaults.fan_on_temp_c;
            self.fan_off_temp_c = defaults.fan_off_temp_c;
        }
        if !self.temp_delta_threshold_c.is_finite() || self.temp_delta_threshold_c < 0.0 {
            self.temp_delta_threshold_c = defaults.temp_delta_threshold_c;
        }
        if self.min_valid_temp_c >= self.max_valid_temp_c {
            warn_reset("valid temperature range");
            self.min_valid_temp_c = defaults.min_valid_temp_c;
            self.max_valid_temp_c = defaults.max_valid_temp_c;
        }

        self.max_pump_duration_secs = self.max_pump_duration_secs.clamp(1, 3_600);
        self.water_hysteresis = self.water_hysteresis.min(self.water_empty_threshold);
        self.provisioning_timeout_ms = self.provisioning_timeout_ms.max(1_000);
        self.wifi_retry_interval_ms = self.wifi_retry_interval_ms.max(1_000);
        self.mqtt_retry_interval_ms = self.mqtt_retry_interval_ms.max(1_000);
    }
}

fn warn_reset(what: &str) {
    tracing::warn!("invalid {what} in device config; using defaults");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub ws_port: u16,
    pub radio_port: u16,
    /// Overrides the MAC-derived identity used in topic names.
    pub device_id: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            ws_port: 8081,
            radio_port: 4677,
            device_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    pub timezone: String,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.device.sanitize();
        if self.timezone.trim().is_empty() {
            self.timezone = "UTC".to_string();
        }
    }
}
