pub mod adapter;
pub mod config;
pub mod control;
pub mod device;
pub mod gatt;
pub mod ports;
pub mod provisioning;
pub mod radio;
pub mod rpc;
pub mod schedule;
pub mod store;
pub mod sync;
pub mod time;
pub mod topics;
pub mod types;
pub mod wifi;

pub use adapter::{CommandAdapter, CommandSink, SyncEvent};
pub use config::{DeviceConfig, NetworkConfig, RuntimeConfig};
pub use device::Device;
pub use gatt::{BridgeRecord, Characteristic, RecordDecoder};
pub use ports::{ActuatorPort, OtaError, OtaUpdater, SensorPort};
pub use provisioning::{
    ImprovError, ImprovState, ProvisioningEvent, ProvisioningPort, ProvisioningProtocol,
};
pub use radio::{RadioCommandAdapter, RadioLink};
pub use rpc::FrameError;
pub use store::{
    CredentialStore, DeviceStateStore, KeyValueStore, MemoryStore, StoreError, StoredValue,
};
pub use sync::{Peripherals, StateSynchronizer};
pub use time::Millis;
pub use topics::DeviceTopics;
pub use types::{CredentialRecord, DeviceCommand, DeviceState, LightSchedule, StatePayload};
pub use wifi::{LinkSnapshot, WifiConnectionManager, WifiDriver, WifiStatus};
