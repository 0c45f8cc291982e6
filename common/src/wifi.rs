use std::net::Ipv4Addr;

use crate::{
    config::DeviceConfig,
    store::{CredentialStore, KeyValueStore},
    time::{interval_due, Millis},
    types::CredentialRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiStatus {
    Idle,
    Connecting,
    Connected,
    ConnectFailed,
    NoSsidAvailable,
    Disconnected,
}

impl WifiStatus {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

pub trait WifiDriver {
    fn status(&self) -> WifiStatus;
    fn begin(&mut self, ssid: &str, password: &str);
    fn disconnect(&mut self);
    fn mac_address(&self) -> [u8; 6];
    fn local_ip(&self) -> Option<Ipv4Addr>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub status: WifiStatus,
    pub mac: [u8; 6],
    pub ip: Option<Ipv4Addr>,
}

impl LinkSnapshot {
    pub fn is_up(&self) -> bool {
        self.status.is_connected()
    }

    pub fn mac_string(&self) -> String {
        self.mac
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn ip_string(&self) -> String {
        self.ip.unwrap_or(Ipv4Addr::UNSPECIFIED).to_string()
    }

    /// `mac=<MAC>;ip=<IP>`, the provisioning success payload.
    pub fn summary(&self) -> String {
        format!("mac={};ip={}", self.mac_string(), self.ip_string())
    }
}

pub struct WifiConnectionManager<D, S> {
    driver: D,
    credentials: CredentialStore<S>,
    retry_interval_ms: Millis,
    last_attempt: Option<Millis>,
    missing_logged: bool,
    wait_logged: bool,
}

impl<D: WifiDriver, S: KeyValueStore> WifiConnectionManager<D, S> {
    pub fn new(driver: D, credentials: CredentialStore<S>, config: &DeviceConfig) -> Self {
        Self {
            driver,
            credentials,
            retry_interval_ms: config.wifi_retry_interval_ms,
            last_attempt: None,
            missing_logged: false,
            wait_logged: false,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn credentials(&self) -> &CredentialStore<S> {
        &self.credentials
    }

    /// Starts a connection attempt when one is allowed. Returns whether the
    /// driver was asked to connect.
    pub fn connect(&mut self, now: Millis) -> bool {
        if self.driver.status().is_connected() {
            return false;
        }

        if !self.credentials.has_credentials() {
            if !self.missing_logged {
                tracing::info!("no Wi-Fi credentials stored; waiting for provisioning");
                self.missing_logged = true;
            }
            return false;
        }
        self.missing_logged = false;

        if !interval_due(now, self.last_attempt, self.retry_interval_ms) {
            if !self.wait_logged {
                tracing::debug!(
                    retry_ms = self.retry_interval_ms,
                    "waiting before next Wi-Fi attempt"
                );
                self.wait_logged = true;
            }
            return false;
        }
        self.wait_logged = false;

        self.last_attempt = Some(now);
        let record = self.credentials.record();
        tracing::info!(ssid = %record.ssid, "connecting to Wi-Fi");
        self.driver.begin(&record.ssid, &record.password);
        true
    }

    pub fn force_reconnect(&mut self, now: Millis) -> bool {
        self.last_attempt = None;
        self.missing_logged = false;
        self.wait_logged = false;
        self.driver.disconnect();
        self.connect(now)
    }

    pub fn apply_credentials(&mut self, record: &CredentialRecord, now: Millis) -> bool {
        if let Err(err) = self.credentials.save(record) {
            tracing::warn!(error = %err, "failed to persist Wi-Fi credentials");
        }
        self.force_reconnect(now)
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        let status = self.driver.status();
        LinkSnapshot {
            status,
            mac: self.driver.mac_address(),
            ip: if status.is_connected() {
                self.driver.local_ip()
            } else {
                None
            },
        }
    }
}
