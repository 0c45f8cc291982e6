//! Property tests for frame reassembly and state invariants.

use ortus_common::{
    config::DeviceConfig,
    provisioning::{ImprovError, ImprovState, ProvisioningEvent, ProvisioningProtocol},
    rpc::{self, CMD_SET_WIFI_CREDENTIALS},
    store::{DeviceStateStore, MemoryStore},
    types::{DeviceCommand, LightSchedule},
    wifi::{LinkSnapshot, WifiStatus},
    ActuatorPort, OtaError, OtaUpdater, Peripherals, SensorPort, StateSynchronizer,
};
use proptest::prelude::*;

fn idle_link() -> LinkSnapshot {
    LinkSnapshot {
        status: WifiStatus::Idle,
        mac: [0x02, 0, 0, 0, 0, 1],
        ip: None,
    }
}

fn started_protocol() -> ProvisioningProtocol {
    let mut protocol = ProvisioningProtocol::new(&DeviceConfig::default());
    protocol.begin(&idle_link(), 0);
    protocol.drain_events();
    protocol
}

#[derive(Debug, Clone)]
enum FrameCase {
    Credentials(String, String),
    Unknown(u8, Vec<u8>),
    Corrupt(String, String),
}

fn arb_frame() -> impl Strategy<Value = FrameCase> {
    prop_oneof![
        ("[a-z0-9]{1,32}", "[ -~]{0,63}").prop_map(|(s, p)| FrameCase::Credentials(s, p)),
        (2u8..=255u8, proptest::collection::vec(any::<u8>(), 0..40))
            .prop_map(|(c, p)| FrameCase::Unknown(c, p)),
        ("[a-z]{1,16}", "[a-z]{8,16}").prop_map(|(s, p)| FrameCase::Corrupt(s, p)),
    ]
}

fn build(case: &FrameCase) -> Vec<u8> {
    match case {
        FrameCase::Credentials(ssid, password) => {
            let payload = rpc::encode_credentials(ssid, password).unwrap();
            rpc::encode_frame(CMD_SET_WIFI_CREDENTIALS, &payload).unwrap()
        }
        FrameCase::Unknown(command, payload) => rpc::encode_frame(*command, payload).unwrap(),
        FrameCase::Corrupt(ssid, password) => {
            let payload = rpc::encode_credentials(ssid, password).unwrap();
            let mut frame = rpc::encode_frame(CMD_SET_WIFI_CREDENTIALS, &payload).unwrap();
            let last = frame.len() - 1;
            frame[last] = frame[last].wrapping_add(1);
            frame
        }
    }
}

fn chunk(stream: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts
        .iter()
        .map(|c| c % (stream.len() + 1))
        .collect();
    points.push(0);
    points.push(stream.len());
    points.sort_unstable();
    points.dedup();
    points.windows(2).map(|w| stream[w[0]..w[1]].to_vec()).collect()
}

struct NullSensors;
struct NullActuators;
struct NullOta;

impl SensorPort for NullSensors {
    fn read_temperature_c(&mut self) -> Option<f32> {
        None
    }

    fn read_water_raw(&mut self) -> u16 {
        4_095
    }
}

impl ActuatorPort for NullActuators {
    fn set_light_level(&mut self, _percent: u8) {}
    fn set_pump(&mut self, _on: bool) {}
    fn set_fan(&mut self, _on: bool) {}
}

impl OtaUpdater for NullOta {
    fn begin_update(&mut self, _url: &str) -> Result<(), OtaError> {
        Err(OtaError::Unsupported)
    }
}

proptest! {
    /// Any chunking of the same byte stream yields the same events.
    #[test]
    fn reassembly_is_fragmentation_invariant(
        frames in proptest::collection::vec(arb_frame(), 1..6),
        cuts in proptest::collection::vec(any::<usize>(), 0..24),
    ) {
        let stream: Vec<u8> = frames.iter().flat_map(build).collect();

        let mut whole = started_protocol();
        whole.feed(&stream, 0);
        let expected = whole.drain_events();

        let mut split = started_protocol();
        for piece in chunk(&stream, &cuts) {
            split.feed(&piece, 0);
        }

        prop_assert_eq!(split.drain_events(), expected);
        prop_assert_eq!(split.state(), whole.state());
        prop_assert_eq!(split.error(), whole.error());
    }

    /// A checksum mismatch never delivers credentials.
    #[test]
    fn bad_checksum_never_delivers_credentials(
        ssid in "[a-z]{1,20}",
        password in "[a-z]{8,20}",
        delta in 1u8..=255u8,
    ) {
        let payload = rpc::encode_credentials(&ssid, &password).unwrap();
        let mut frame = rpc::encode_frame(CMD_SET_WIFI_CREDENTIALS, &payload).unwrap();
        let last = frame.len() - 1;
        frame[last] = frame[last].wrapping_add(delta);

        let mut protocol = started_protocol();
        protocol.feed(&frame, 0);

        prop_assert!(!protocol
            .drain_events()
            .iter()
            .any(|e| matches!(e, ProvisioningEvent::CredentialsReceived(_))));
        prop_assert_eq!(protocol.state(), ImprovState::Error);
        prop_assert_eq!(protocol.error(), ImprovError::InvalidRpc);
    }

    /// Credential parsing is total over arbitrary payloads.
    #[test]
    fn credential_parsing_never_panics(payload in proptest::collection::vec(any::<u8>(), 0..300)) {
        if let Ok(record) = rpc::decode_credentials(&payload) {
            prop_assert!(record.ssid.len() < payload.len());
        }
    }

    #[test]
    fn brightness_always_clamped(values in proptest::collection::vec(any::<i32>(), 1..20)) {
        let peripherals = Peripherals {
            sensors: Box::new(NullSensors),
            actuators: Box::new(NullActuators),
            ota: Box::new(NullOta),
        };
        let mut sync = StateSynchronizer::new(
            &DeviceConfig::default(),
            DeviceStateStore::new(Ok(MemoryStore::new())),
            peripherals,
        );
        sync.begin();

        for value in values {
            sync.handle_command(DeviceCommand::SetBrightness { value }, 0);
            prop_assert!(sync.state().brightness <= 100);
            prop_assert_eq!(sync.state().brightness as i32, value.clamp(0, 100));
        }
    }

    /// The window matches a minute-by-minute walk from `from` to `to`.
    #[test]
    fn schedule_window_matches_walk(
        fh in 0u8..24, fm in 0u8..60, th in 0u8..24, tm in 0u8..60,
        minute in 0u16..1440,
    ) {
        let schedule = LightSchedule::new((fh, fm), (th, tm));
        let from = schedule.start_minutes();
        let to = schedule.end_minutes();

        let mut walk = false;
        let mut cursor = from;
        while cursor != to {
            if cursor == minute {
                walk = true;
                break;
            }
            cursor = (cursor + 1) % 1440;
        }

        prop_assert_eq!(schedule.is_on_at(minute), walk);
    }
}
