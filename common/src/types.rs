use serde::{Deserialize, Serialize};

use crate::time::Millis;

/// Temperatures closer than this compare equal.
pub const TEMPERATURE_EPSILON_C: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightSchedule {
    pub from_hour: u8,
    pub from_minute: u8,
    pub to_hour: u8,
    pub to_minute: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub brightness: u8,
    pub schedule: Option<LightSchedule>,
    pub pump_active: bool,
    /// Runtime-only; never persisted or broadcast.
    pub pump_stop_at: Option<Millis>,
    pub fan_active: bool,
    pub temperature_c: Option<f32>,
    pub water_empty: bool,
}

impl DeviceState {
    pub fn set_brightness(&mut self, value: i32) -> bool {
        let clamped = value.clamp(0, 100) as u8;
        if self.brightness != clamped {
            self.brightness = clamped;
            true
        } else {
            false
        }
    }

    pub fn payload(&self) -> StatePayload {
        StatePayload {
            brightness: self.brightness,
            schedule: self.schedule,
            pump_active: self.pump_active,
            fan_active: self.fan_active,
            temperature: self.temperature_c,
            water_empty: self.water_empty,
        }
    }
}

impl PartialEq for DeviceState {
    fn eq(&self, other: &Self) -> bool {
        let temps_equal = match (self.temperature_c, other.temperature_c) {
            (None, None) => true,
            (Some(a), Some(b)) => (a - b).abs() < TEMPERATURE_EPSILON_C,
            _ => false,
        };

        self.brightness == other.brightness
            && self.schedule == other.schedule
            && self.pump_active == other.pump_active
            && self.fan_active == other.fan_active
            && self.water_empty == other.water_empty
            && temps_equal
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    SetBrightness { value: i32 },
    ScheduleLights { schedule: LightSchedule },
    TriggerPump { duration_secs: u32 },
    OtaUpdate { url: String },
}

impl DeviceCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetBrightness { .. } => "set_brightness",
            Self::ScheduleLights { .. } => "schedule_lights",
            Self::TriggerPump { .. } => "trigger_pump",
            Self::OtaUpdate { .. } => "ota_update",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRecord {
    pub ssid: String,
    pub password: String,
}

impl CredentialRecord {
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }
}

/// Wire view of [`DeviceState`] shared by the JSON transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub brightness: u8,
    pub schedule: Option<LightSchedule>,
    #[serde(rename = "pumpActive")]
    pub pump_active: bool,
    #[serde(rename = "fanActive")]
    pub fan_active: bool,
    pub temperature: Option<f32>,
    #[serde(rename = "waterEmpty")]
    pub water_empty: bool,
}
