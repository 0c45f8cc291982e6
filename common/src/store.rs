use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CredentialRecord, DeviceState, LightSchedule};

pub const STATE_NAMESPACE: &str = "dev_state";
pub const WIFI_NAMESPACE: &str = "wifi";

const KEY_BRIGHTNESS: &str = "brightness";
const KEY_HAS_SCHEDULE: &str = "has_schedule";
const KEY_FROM_HOUR: &str = "from_hour";
const KEY_FROM_MINUTE: &str = "from_minute";
const KEY_TO_HOUR: &str = "to_hour";
const KEY_TO_MINUTE: &str = "to_minute";
const KEY_SCHEDULE_ENABLED: &str = "schedule_enabled";
const KEY_INITIALIZED: &str = "initialized";

const KEY_SSID: &str = "ssid";
const KEY_PASSWORD: &str = "password";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage namespace {0} is unavailable")]
    Unavailable(String),
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

/// One namespace of a non-volatile key-value medium. Writes are staged until
/// `commit`.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<StoredValue>;
    fn set(&mut self, key: &str, value: StoredValue) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;

    fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(StoredValue::Int(value)) => value,
            _ => default,
        }
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(StoredValue::Bool(value)) => value,
            _ => default,
        }
    }

    fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(StoredValue::Str(value)) => Some(value),
            _ => None,
        }
    }
}

/// Volatile store; counts commits so callers can observe write suppression.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, StoredValue>,
    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> usize {
        self.commits
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.commits += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PersistedSnapshot {
    brightness: u8,
    schedule: Option<LightSchedule>,
}

impl PersistedSnapshot {
    fn of(state: &DeviceState) -> Self {
        Self {
            brightness: state.brightness,
            schedule: state.schedule,
        }
    }
}

/// Persists the durable part of [`DeviceState`] and suppresses redundant
/// writes. Without a backend every call is a no-op.
pub struct DeviceStateStore<S> {
    backend: Option<S>,
    last_saved: Option<PersistedSnapshot>,
}

impl<S: KeyValueStore> DeviceStateStore<S> {
    pub fn new(opened: Result<S, StoreError>) -> Self {
        let backend = match opened {
            Ok(backend) => Some(backend),
            Err(err) => {
                tracing::warn!(error = %err, "device state storage unavailable; state will not persist");
                None
            }
        };
        Self {
            backend,
            last_saved: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend(&self) -> Option<&S> {
        self.backend.as_ref()
    }

    pub fn load(&mut self) -> Option<DeviceState> {
        let backend = self.backend.as_ref()?;
        if !backend.get_bool(KEY_INITIALIZED, false) {
            return None;
        }

        let brightness = backend.get_int(KEY_BRIGHTNESS, 0).clamp(0, 100) as u8;
        let schedule = if backend.get_bool(KEY_HAS_SCHEDULE, false) {
            let schedule = LightSchedule {
                from_hour: stored_u8(backend, KEY_FROM_HOUR),
                from_minute: stored_u8(backend, KEY_FROM_MINUTE),
                to_hour: stored_u8(backend, KEY_TO_HOUR),
                to_minute: stored_u8(backend, KEY_TO_MINUTE),
                enabled: backend.get_bool(KEY_SCHEDULE_ENABLED, true),
            };
            if schedule.validate() {
                Some(schedule)
            } else {
                tracing::warn!(?schedule, "discarding invalid stored schedule");
                None
            }
        } else {
            None
        };

        let state = DeviceState {
            brightness,
            schedule,
            ..DeviceState::default()
        };
        self.last_saved = Some(PersistedSnapshot::of(&state));
        Some(state)
    }

    /// Returns whether a write happened.
    pub fn save(&mut self, state: &DeviceState) -> bool {
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };

        let snapshot = PersistedSnapshot::of(state);
        if self.last_saved == Some(snapshot) {
            return false;
        }

        match write_snapshot(backend, &snapshot) {
            Ok(()) => {
                self.last_saved = Some(snapshot);
                tracing::debug!(brightness = snapshot.brightness, "device state persisted");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to persist device state");
                false
            }
        }
    }
}

fn stored_u8<S: KeyValueStore>(backend: &S, key: &str) -> u8 {
    u8::try_from(backend.get_int(key, 0)).unwrap_or(u8::MAX)
}

fn write_snapshot<S: KeyValueStore>(
    backend: &mut S,
    snapshot: &PersistedSnapshot,
) -> Result<(), StoreError> {
    backend.set(KEY_BRIGHTNESS, StoredValue::Int(snapshot.brightness as i64))?;
    backend.set(
        KEY_HAS_SCHEDULE,
        StoredValue::Bool(snapshot.schedule.is_some()),
    )?;
    if let Some(schedule) = snapshot.schedule {
        backend.set(KEY_FROM_HOUR, StoredValue::Int(schedule.from_hour as i64))?;
        backend.set(KEY_FROM_MINUTE, StoredValue::Int(schedule.from_minute as i64))?;
        backend.set(KEY_TO_HOUR, StoredValue::Int(schedule.to_hour as i64))?;
        backend.set(KEY_TO_MINUTE, StoredValue::Int(schedule.to_minute as i64))?;
        backend.set(KEY_SCHEDULE_ENABLED, StoredValue::Bool(schedule.enabled))?;
    }
    backend.set(KEY_INITIALIZED, StoredValue::Bool(true))?;
    backend.commit()
}

/// Wi-Fi credentials. The record is cached so a failed write still lets the
/// current boot connect.
pub struct CredentialStore<S> {
    backend: Option<S>,
    cached: CredentialRecord,
}

impl<S: KeyValueStore> CredentialStore<S> {
    pub fn new(opened: Result<S, StoreError>) -> Self {
        match opened {
            Ok(backend) => {
                let cached = CredentialRecord {
                    ssid: backend.get_str(KEY_SSID).unwrap_or_default(),
                    password: backend.get_str(KEY_PASSWORD).unwrap_or_default(),
                };
                Self {
                    backend: Some(backend),
                    cached,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "credential storage unavailable; credentials will not persist");
                Self {
                    backend: None,
                    cached: CredentialRecord::default(),
                }
            }
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.cached.is_configured()
    }

    pub fn record(&self) -> &CredentialRecord {
        &self.cached
    }

    pub fn save(&mut self, record: &CredentialRecord) -> Result<(), StoreError> {
        self.cached = record.clone();
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable(WIFI_NAMESPACE.to_string()))?;
        backend.set(KEY_SSID, StoredValue::Str(record.ssid.clone()))?;
        backend.set(KEY_PASSWORD, StoredValue::Str(record.password.clone()))?;
        backend.commit()
    }

    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.cached = CredentialRecord::default();
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable(WIFI_NAMESPACE.to_string()))?;
        backend.remove(KEY_SSID)?;
        backend.remove(KEY_PASSWORD)?;
        backend.commit()
    }
}
