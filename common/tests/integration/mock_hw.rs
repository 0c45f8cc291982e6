//! Mock hardware for integration tests. Every mock shares its recorder
//! through `Rc<RefCell<_>>` so tests can inspect it after handing the mock
//! over to the device.

use std::{cell::RefCell, collections::VecDeque, net::Ipv4Addr, rc::Rc};

use ortus_common::{
    ActuatorPort, Characteristic, CommandAdapter, CommandSink, DeviceState, Millis, OtaError,
    OtaUpdater, ProvisioningPort, SensorPort, WifiDriver, WifiStatus,
};

pub const MAC: [u8; 6] = [0x24, 0x6F, 0x28, 0x01, 0xAB, 0xCD];

// ── Sensors, actuators, OTA ───────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    Light(u8),
    Pump(bool),
    Fan(bool),
}

#[derive(Default)]
pub struct Bench {
    pub temperature: Option<f32>,
    pub water_raw: u16,
    pub calls: Vec<ActuatorCall>,
}

#[allow(dead_code)]
impl Bench {
    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            temperature: Some(22.0),
            water_raw: 3_000,
            calls: Vec::new(),
        }))
    }

    pub fn light_level(&self) -> Option<u8> {
        self.calls.iter().rev().find_map(|c| match c {
            ActuatorCall::Light(level) => Some(*level),
            _ => None,
        })
    }
}

pub struct MockSensors(pub Rc<RefCell<Bench>>);
pub struct MockActuators(pub Rc<RefCell<Bench>>);
pub struct MockOta;

impl SensorPort for MockSensors {
    fn read_temperature_c(&mut self) -> Option<f32> {
        self.0.borrow().temperature
    }

    fn read_water_raw(&mut self) -> u16 {
        self.0.borrow().water_raw
    }
}

impl ActuatorPort for MockActuators {
    fn set_light_level(&mut self, percent: u8) {
        self.0.borrow_mut().calls.push(ActuatorCall::Light(percent));
    }

    fn set_pump(&mut self, on: bool) {
        self.0.borrow_mut().calls.push(ActuatorCall::Pump(on));
    }

    fn set_fan(&mut self, on: bool) {
        self.0.borrow_mut().calls.push(ActuatorCall::Fan(on));
    }
}

impl OtaUpdater for MockOta {
    fn begin_update(&mut self, _url: &str) -> Result<(), OtaError> {
        Err(OtaError::Unsupported)
    }
}

// ── Wi-Fi ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct WifiSim {
    pub status: Option<WifiStatus>,
    /// Status a join attempt lands in; `Connecting` when unset.
    pub join_outcome: Option<WifiStatus>,
    pub attempts: Vec<(String, String)>,
}

pub struct MockWifi(pub Rc<RefCell<WifiSim>>);

impl WifiDriver for MockWifi {
    fn status(&self) -> WifiStatus {
        self.0.borrow().status.unwrap_or(WifiStatus::Idle)
    }

    fn begin(&mut self, ssid: &str, password: &str) {
        let mut sim = self.0.borrow_mut();
        sim.attempts.push((ssid.to_string(), password.to_string()));
        sim.status = Some(sim.join_outcome.unwrap_or(WifiStatus::Connecting));
    }

    fn disconnect(&mut self) {
        self.0.borrow_mut().status = Some(WifiStatus::Disconnected);
    }

    fn mac_address(&self) -> [u8; 6] {
        MAC
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        Some(Ipv4Addr::new(192, 168, 4, 20))
    }
}

// ── Radio ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct RadioSim {
    pub writes: VecDeque<Vec<u8>>,
    pub published: Vec<(Characteristic, Vec<u8>)>,
}

#[allow(dead_code)]
impl RadioSim {
    pub fn last_value(&self, characteristic: Characteristic) -> Option<&[u8]> {
        self.published
            .iter()
            .rev()
            .find(|(c, _)| *c == characteristic)
            .map(|(_, v)| v.as_slice())
    }

    pub fn count(&self, characteristic: Characteristic) -> usize {
        self.published
            .iter()
            .filter(|(c, _)| *c == characteristic)
            .count()
    }
}

pub struct MockRadio(pub Rc<RefCell<RadioSim>>);

impl ProvisioningPort for MockRadio {
    fn poll_write(&mut self) -> Option<Vec<u8>> {
        self.0.borrow_mut().writes.pop_front()
    }

    fn publish(&mut self, characteristic: Characteristic, value: &[u8]) {
        self.0
            .borrow_mut()
            .published
            .push((characteristic, value.to_vec()));
    }
}

// ── Transports ────────────────────────────────────────────────

#[derive(Default)]
pub struct TransportLog {
    pub sink: Option<CommandSink>,
    pub started: bool,
    pub pushed: Vec<DeviceState>,
}

pub struct MockTransport {
    pub name: &'static str,
    pub log: Rc<RefCell<TransportLog>>,
}

impl CommandAdapter for MockTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    fn set_command_sink(&mut self, sink: CommandSink) {
        self.log.borrow_mut().sink = Some(sink);
    }

    fn begin(&mut self) {
        self.log.borrow_mut().started = true;
    }

    fn tick(&mut self, _now: Millis) {}

    fn notify_state(&mut self, state: &DeviceState) {
        self.log.borrow_mut().pushed.push(state.clone());
    }
}
