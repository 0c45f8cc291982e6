//! Multi-transport command flow through the synchronizer.

use std::{cell::RefCell, rc::Rc};

use ortus_common::{
    DeviceCommand, DeviceConfig, DeviceStateStore, LightSchedule, MemoryStore, Peripherals,
    StateSynchronizer,
};

use crate::mock_hw::{Bench, MockActuators, MockOta, MockSensors, MockTransport, TransportLog};

struct Rig {
    sync: StateSynchronizer<MemoryStore>,
    bench: Rc<RefCell<Bench>>,
    ws: Rc<RefCell<TransportLog>>,
    mqtt: Rc<RefCell<TransportLog>>,
}

fn rig() -> Rig {
    let bench = Bench::shared();
    let peripherals = Peripherals {
        sensors: Box::new(MockSensors(bench.clone())),
        actuators: Box::new(MockActuators(bench.clone())),
        ota: Box::new(MockOta),
    };
    let mut sync = StateSynchronizer::new(
        &DeviceConfig::default(),
        DeviceStateStore::new(Ok(MemoryStore::new())),
        peripherals,
    );

    let ws = Rc::new(RefCell::new(TransportLog::default()));
    let mqtt = Rc::new(RefCell::new(TransportLog::default()));
    sync.add_adapter(Box::new(MockTransport {
        name: "ws",
        log: ws.clone(),
    }));
    sync.add_adapter(Box::new(MockTransport {
        name: "mqtt",
        log: mqtt.clone(),
    }));
    sync.begin();
    sync.begin_transports();

    Rig {
        sync,
        bench,
        ws,
        mqtt,
    }
}

fn dispatch(log: &Rc<RefCell<TransportLog>>, command: DeviceCommand) {
    let sink = log.borrow().sink.clone().expect("sink registered");
    assert!(sink.dispatch(command));
}

#[test]
fn socket_brightness_reaches_every_transport() {
    let mut rig = rig();
    rig.sync.tick(0, None);
    let ws_before = rig.ws.borrow().pushed.len();
    let mqtt_before = rig.mqtt.borrow().pushed.len();

    dispatch(&rig.ws, DeviceCommand::SetBrightness { value: 150 });
    rig.sync.tick(50, None);

    assert_eq!(rig.sync.state().brightness, 100);
    assert_eq!(rig.sync.store().backend().unwrap().commits(), 1);
    assert_eq!(rig.bench.borrow().light_level(), Some(100));

    for log in [&rig.ws, &rig.mqtt] {
        let log = log.borrow();
        assert!(log.started);
        assert_eq!(log.pushed.last().unwrap().brightness, 100);
    }
    assert_eq!(rig.ws.borrow().pushed.len(), ws_before + 1);
    assert_eq!(rig.mqtt.borrow().pushed.len(), mqtt_before + 1);
}

#[test]
fn repeated_brightness_is_written_and_pushed_once() {
    let mut rig = rig();
    rig.sync.tick(0, None);

    for _ in 0..3 {
        dispatch(&rig.mqtt, DeviceCommand::SetBrightness { value: 30 });
    }
    let before = rig.ws.borrow().pushed.len();
    rig.sync.tick(50, None);

    assert_eq!(rig.sync.store().backend().unwrap().commits(), 1);
    assert_eq!(rig.ws.borrow().pushed.len(), before + 1);
}

#[test]
fn subscriber_connect_forces_full_state() {
    let mut rig = rig();
    rig.sync.tick(0, None);
    let before = rig.mqtt.borrow().pushed.len();

    let sink = rig.ws.borrow().sink.clone().unwrap();
    sink.subscriber_connected();
    rig.sync.tick(50, None);

    assert_eq!(rig.mqtt.borrow().pushed.len(), before + 1);
}

#[test]
fn schedule_from_one_transport_is_seen_by_the_other() {
    let mut rig = rig();
    let schedule = LightSchedule::new((6, 0), (20, 0));

    dispatch(&rig.ws, DeviceCommand::ScheduleLights { schedule });
    rig.sync.tick(0, None);

    assert_eq!(
        rig.mqtt.borrow().pushed.last().unwrap().schedule,
        Some(schedule)
    );
}

#[test]
fn idle_loop_does_not_rebroadcast() {
    let mut rig = rig();
    rig.sync.tick(0, None);
    let before = rig.ws.borrow().pushed.len();

    for now in (100..10_000).step_by(100) {
        rig.sync.tick(now, None);
    }

    assert_eq!(rig.ws.borrow().pushed.len(), before);
}
