//! Radio provisioning through to transports coming online.

use std::{cell::RefCell, rc::Rc};

use ortus_common::{
    rpc::{self, CMD_SET_WIFI_CREDENTIALS},
    Characteristic, CredentialStore, Device, DeviceConfig, DeviceStateStore, ImprovError,
    ImprovState, MemoryStore, Peripherals, StateSynchronizer, WifiConnectionManager, WifiStatus,
};

use crate::mock_hw::{
    Bench, MockActuators, MockOta, MockRadio, MockSensors, MockTransport, MockWifi, RadioSim,
    TransportLog, WifiSim,
};

type TestDevice = Device<MockRadio, MockWifi, MemoryStore, MemoryStore>;

struct Rig {
    device: TestDevice,
    radio: Rc<RefCell<RadioSim>>,
    wifi: Rc<RefCell<WifiSim>>,
    mqtt: Rc<RefCell<TransportLog>>,
}

fn rig() -> Rig {
    let config = DeviceConfig::default();
    let bench = Bench::shared();
    let radio = Rc::new(RefCell::new(RadioSim::default()));
    let wifi = Rc::new(RefCell::new(WifiSim::default()));
    let mqtt = Rc::new(RefCell::new(TransportLog::default()));

    let manager = WifiConnectionManager::new(
        MockWifi(wifi.clone()),
        CredentialStore::new(Ok(MemoryStore::new())),
        &config,
    );
    let mut sync = StateSynchronizer::new(
        &config,
        DeviceStateStore::new(Ok(MemoryStore::new())),
        Peripherals {
            sensors: Box::new(MockSensors(bench.clone())),
            actuators: Box::new(MockActuators(bench)),
            ota: Box::new(MockOta),
        },
    );
    sync.add_adapter(Box::new(MockTransport {
        name: "mqtt",
        log: mqtt.clone(),
    }));

    let device = Device::new(&config, MockRadio(radio.clone()), manager, sync);
    Rig {
        device,
        radio,
        wifi,
        mqtt,
    }
}

fn write_credentials(radio: &Rc<RefCell<RadioSim>>, ssid: &str, password: &str) {
    let payload = rpc::encode_credentials(ssid, password).unwrap();
    let frame = rpc::encode_frame(CMD_SET_WIFI_CREDENTIALS, &payload).unwrap();
    let mut sim = radio.borrow_mut();
    for chunk in frame.chunks(20) {
        sim.writes.push_back(chunk.to_vec());
    }
}

#[test]
fn begin_publishes_static_and_initial_values() {
    let mut rig = rig();
    rig.device.begin(0);

    let radio = rig.radio.borrow();
    assert_eq!(
        radio.last_value(Characteristic::Version),
        Some(&b"improv-wifi v1"[..])
    );
    assert_eq!(radio.last_value(Characteristic::Capabilities), Some(&[0x01][..]));
    assert_eq!(radio.last_value(Characteristic::State), Some(&[0x00][..]));
    assert_eq!(radio.last_value(Characteristic::Error), Some(&[0x00][..]));
    assert!(!rig.mqtt.borrow().started);
}

#[test]
fn provisioning_connects_and_starts_transports() {
    let mut rig = rig();
    rig.device.begin(0);

    write_credentials(&rig.radio, "greenhouse-iot", "correct horse battery");
    rig.device.tick(100, None);

    assert_eq!(rig.device.provisioning().state(), ImprovState::Provisioning);
    assert_eq!(
        rig.wifi.borrow().attempts,
        vec![(
            "greenhouse-iot".to_string(),
            "correct horse battery".to_string()
        )]
    );
    assert!(rig.device.wifi().credentials().has_credentials());

    rig.wifi.borrow_mut().status = Some(WifiStatus::Connected);
    rig.device.tick(1_600, None);

    assert_eq!(rig.device.provisioning().state(), ImprovState::Provisioned);
    let expected = rpc::encode_frame(
        CMD_SET_WIFI_CREDENTIALS,
        b"mac=24:6F:28:01:AB:CD;ip=192.168.4.20",
    )
    .unwrap();
    {
        let radio = rig.radio.borrow();
        assert_eq!(radio.last_value(Characteristic::RpcResult), Some(&expected[..]));
        assert_eq!(radio.last_value(Characteristic::State), Some(&[0x04][..]));
    }

    let mqtt = rig.mqtt.borrow();
    assert!(mqtt.started);
    assert!(!mqtt.pushed.is_empty());

    drop(mqtt);
    rig.device.tick(1_700, None);
    assert_eq!(rig.radio.borrow().count(Characteristic::RpcResult), 1);
}

#[test]
fn failed_join_times_out_with_wifi_failed() {
    let mut rig = rig();
    rig.device.begin(0);

    rig.wifi.borrow_mut().join_outcome = Some(WifiStatus::ConnectFailed);
    write_credentials(&rig.radio, "greenhouse-iot", "wrong-password");
    rig.device.tick(0, None);

    rig.device.tick(30_000, None);
    assert_eq!(rig.device.provisioning().state(), ImprovState::Provisioning);

    rig.device.tick(60_001, None);
    assert_eq!(rig.device.provisioning().state(), ImprovState::Error);
    assert_eq!(rig.device.provisioning().error(), ImprovError::WifiFailed);
    assert_eq!(
        rig.radio.borrow().last_value(Characteristic::Error),
        Some(&[0x06][..])
    );

    rig.device.tick(65_001, None);
    assert_eq!(rig.device.provisioning().state(), ImprovState::Ready);
}

#[test]
fn malformed_write_reports_invalid_rpc() {
    let mut rig = rig();
    rig.device.begin(0);

    // ssid length overruns the payload; checksum is valid
    rig.radio
        .borrow_mut()
        .writes
        .push_back(vec![0x01, 0x03, 0x05, b'a', b'b', 0xCC]);
    rig.device.tick(10, None);

    assert_eq!(rig.device.provisioning().error(), ImprovError::InvalidRpc);
    assert!(rig.wifi.borrow().attempts.is_empty());
}
