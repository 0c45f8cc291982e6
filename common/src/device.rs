use chrono::{DateTime, FixedOffset};

use crate::{
    config::DeviceConfig,
    gatt::{Characteristic, CAPABILITY_WIFI, IMPROV_VERSION},
    provisioning::{ProvisioningEvent, ProvisioningPort, ProvisioningProtocol},
    store::KeyValueStore,
    sync::StateSynchronizer,
    time::Millis,
    wifi::{LinkSnapshot, WifiConnectionManager, WifiDriver},
};

/// The cooperative device loop: provisioning, Wi-Fi and the state
/// synchronizer advanced in a fixed order on every tick.
pub struct Device<P, D, C, S> {
    provisioning: ProvisioningProtocol,
    port: P,
    wifi: WifiConnectionManager<D, C>,
    sync: StateSynchronizer<S>,
    last_link: Option<LinkSnapshot>,
}

impl<P, D, C, S> Device<P, D, C, S>
where
    P: ProvisioningPort,
    D: WifiDriver,
    C: KeyValueStore,
    S: KeyValueStore,
{
    pub fn new(
        config: &DeviceConfig,
        port: P,
        wifi: WifiConnectionManager<D, C>,
        sync: StateSynchronizer<S>,
    ) -> Self {
        Self {
            provisioning: ProvisioningProtocol::new(config),
            port,
            wifi,
            sync,
            last_link: None,
        }
    }

    pub fn provisioning(&self) -> &ProvisioningProtocol {
        &self.provisioning
    }

    pub fn wifi(&self) -> &WifiConnectionManager<D, C> {
        &self.wifi
    }

    pub fn wifi_mut(&mut self) -> &mut WifiConnectionManager<D, C> {
        &mut self.wifi
    }

    pub fn sync(&self) -> &StateSynchronizer<S> {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut StateSynchronizer<S> {
        &mut self.sync
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn begin(&mut self, now: Millis) {
        self.port
            .publish(Characteristic::Version, IMPROV_VERSION.as_bytes());
        self.port
            .publish(Characteristic::Capabilities, &[CAPABILITY_WIFI]);

        self.wifi.connect(now);
        let link = self.wifi.snapshot();
        self.provisioning.begin(&link, now);
        self.flush_provisioning(now);

        self.sync.begin();
        self.observe_link(link);
        tracing::info!(mac = %link.mac_string(), "device started");
    }

    pub fn tick(&mut self, now: Millis, wall_clock: Option<DateTime<FixedOffset>>) {
        while let Some(bytes) = self.port.poll_write() {
            self.provisioning.feed(&bytes, now);
        }
        self.flush_provisioning(now);

        self.wifi.connect(now);
        let link = self.wifi.snapshot();
        self.observe_link(link);

        self.provisioning.poll_progress(now, &link);
        self.flush_provisioning(now);

        self.sync.tick(now, wall_clock);
    }

    fn flush_provisioning(&mut self, now: Millis) {
        for event in self.provisioning.drain_events() {
            match event {
                ProvisioningEvent::StateChanged(state) => {
                    tracing::debug!(state = state.as_str(), "provisioning state");
                    self.port
                        .publish(Characteristic::State, &[state.as_byte()]);
                }
                ProvisioningEvent::ErrorChanged(error) => {
                    self.port
                        .publish(Characteristic::Error, &[error.as_byte()]);
                }
                ProvisioningEvent::CredentialsReceived(record) => {
                    self.wifi.apply_credentials(&record, now);
                }
                ProvisioningEvent::RpcResult(frame) => {
                    self.port.publish(Characteristic::RpcResult, &frame);
                }
            }
        }
    }

    fn observe_link(&mut self, link: LinkSnapshot) {
        if self.last_link == Some(link) {
            return;
        }

        let was_up = self.last_link.map(|l| l.is_up()).unwrap_or(false);
        if link.is_up() && !was_up {
            tracing::info!(ip = %link.ip_string(), "Wi-Fi connected");
        } else if !link.is_up() && was_up {
            tracing::warn!(status = ?link.status, "Wi-Fi link lost");
        }

        self.sync.on_link_change(&link);
        self.last_link = Some(link);
    }
}
