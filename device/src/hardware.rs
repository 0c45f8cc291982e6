//! Simulated peripherals for running the firmware on a workstation.

use std::{
    net::{Ipv4Addr, UdpSocket},
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use ortus_common::{
    ports::validate_update_url, ActuatorPort, OtaError, OtaUpdater, SensorPort, WifiDriver,
    WifiStatus,
};

const JOIN_DELAY: Duration = Duration::from_millis(1_500);
const WPA_MIN_PASSPHRASE: usize = 8;

/// Station interface that "joins" any network after a short delay. Open
/// networks (empty password) and WPA passphrases are accepted; anything in
/// between is rejected the way an access point would.
pub struct SimulatedWifi {
    mac: [u8; 6],
    ip: Ipv4Addr,
    join: Option<(Instant, WifiStatus)>,
}

impl SimulatedWifi {
    pub fn new(mac: [u8; 6]) -> Self {
        Self {
            mac,
            ip: host_ipv4().unwrap_or(Ipv4Addr::LOCALHOST),
            join: None,
        }
    }
}

impl WifiDriver for SimulatedWifi {
    fn status(&self) -> WifiStatus {
        match self.join {
            None => WifiStatus::Idle,
            Some((started, outcome)) if started.elapsed() >= JOIN_DELAY => outcome,
            Some(_) => WifiStatus::Connecting,
        }
    }

    fn begin(&mut self, ssid: &str, password: &str) {
        let outcome = if ssid.is_empty() {
            WifiStatus::NoSsidAvailable
        } else if !password.is_empty() && password.len() < WPA_MIN_PASSPHRASE {
            WifiStatus::ConnectFailed
        } else {
            WifiStatus::Connected
        };
        info!(%ssid, ?outcome, "simulated join started");
        self.join = Some((Instant::now(), outcome));
    }

    fn disconnect(&mut self) {
        if self.join.take().is_some() {
            info!("simulated station disconnected");
        }
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        Some(self.ip)
    }
}

/// Address of the interface that routes to the outside world. Connecting a
/// UDP socket sends nothing.
fn host_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Stable locally administered unicast MAC derived from the host name.
pub fn host_mac(hostname: &str) -> [u8; 6] {
    let digest = Sha256::digest(hostname.as_bytes());
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&digest[..6]);
    mac[0] = (mac[0] | 0x02) & 0xFE;
    mac
}

pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "ortus-host".to_string())
}

/// Greenhouse air that swings slowly between roughly 22 and 29 °C.
pub struct SimulatedSensors {
    started: Instant,
    water_raw: u16,
}

impl SimulatedSensors {
    pub fn new(water_raw: u16) -> Self {
        Self {
            started: Instant::now(),
            water_raw,
        }
    }
}

impl SensorPort for SimulatedSensors {
    fn read_temperature_c(&mut self) -> Option<f32> {
        let phase = self.started.elapsed().as_secs_f32() / 120.0;
        Some(25.5 + 3.5 * phase.sin())
    }

    fn read_water_raw(&mut self) -> u16 {
        self.water_raw
    }
}

/// Actuators that only log what the hardware would do.
#[derive(Default)]
pub struct LoggingActuators;

impl ActuatorPort for LoggingActuators {
    fn set_light_level(&mut self, percent: u8) {
        info!(percent, "light output");
    }

    fn set_pump(&mut self, on: bool) {
        info!(on, "pump relay");
    }

    fn set_fan(&mut self, on: bool) {
        info!(on, "fan relay");
    }
}

/// Firmware updates need the flash partition table of a real board.
#[derive(Default)]
pub struct HostOta;

impl OtaUpdater for HostOta {
    fn begin_update(&mut self, url: &str) -> Result<(), OtaError> {
        validate_update_url(url)?;
        warn!(%url, "firmware update requested on host build");
        Err(OtaError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn host_mac_is_stable_and_locally_administered() {
        let mac = host_mac("greenhouse-01");
        assert_eq!(mac, host_mac("greenhouse-01"));
        assert_ne!(mac, host_mac("greenhouse-02"));
        assert_eq!(mac[0] & 0x02, 0x02);
        assert_eq!(mac[0] & 0x01, 0x00);
    }

    #[test]
    fn join_outcome_follows_passphrase_rules() {
        let mut wifi = SimulatedWifi::new([0x02, 0, 0, 0, 0, 1]);
        assert_eq!(wifi.status(), WifiStatus::Idle);

        wifi.begin("greenhouse", "short");
        assert_eq!(wifi.status(), WifiStatus::Connecting);
        wifi.join = Some((Instant::now() - JOIN_DELAY, WifiStatus::ConnectFailed));
        assert_eq!(wifi.status(), WifiStatus::ConnectFailed);

        wifi.begin("", "irrelevant");
        assert_eq!(wifi.join.map(|(_, outcome)| outcome), Some(WifiStatus::NoSsidAvailable));

        wifi.begin("greenhouse", "long enough passphrase");
        assert_eq!(wifi.join.map(|(_, outcome)| outcome), Some(WifiStatus::Connected));

        wifi.disconnect();
        assert_eq!(wifi.status(), WifiStatus::Idle);
    }

    #[test]
    fn host_ota_rejects_bad_urls_before_refusing() {
        let mut ota = HostOta;
        assert!(matches!(
            ota.begin_update("ftp://firmware"),
            Err(OtaError::InvalidUrl(_))
        ));
        assert!(matches!(
            ota.begin_update("https://updates.example.com/ortus.bin"),
            Err(OtaError::Unsupported)
        ));
    }
}
