//! Command transport over the radio control service. Control writes use the
//! same `[id][len][payload][checksum]` framing as provisioning RPCs.

use thiserror::Error;

use crate::{
    adapter::{CommandAdapter, CommandSink},
    rpc::{self, FrameError},
    time::Millis,
    types::{DeviceCommand, DeviceState, LightSchedule},
};

pub const CTRL_SET_BRIGHTNESS: u8 = 0x10;
pub const CTRL_SCHEDULE_LIGHTS: u8 = 0x11;
pub const CTRL_TRIGGER_PUMP: u8 = 0x12;
pub const STATE_FRAME: u8 = 0x20;

/// Temperature slot value meaning "no reading".
pub const NO_TEMPERATURE: i16 = i16::MIN;

const FLAG_PUMP: u8 = 0x01;
const FLAG_FAN: u8 = 0x02;
const FLAG_WATER_EMPTY: u8 = 0x04;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("unknown control command {0:#04x}")]
    UnknownCommand(u8),
    #[error("control command {command:#04x} has a {len}-byte payload")]
    BadPayload { command: u8, len: usize },
}

/// Radio side of the control service.
pub trait RadioLink {
    /// Next value written to the control-command characteristic.
    fn poll_control_write(&mut self) -> Option<Vec<u8>>;
    fn has_subscriber(&self) -> bool;
    fn notify_device_state(&mut self, value: &[u8]);
}

pub fn decode_control_frame(bytes: &[u8]) -> Result<DeviceCommand, ControlError> {
    let frame = rpc::decode_frame(bytes)?;
    let bad_payload = || ControlError::BadPayload {
        command: frame.command,
        len: frame.payload.len(),
    };

    match frame.command {
        CTRL_SET_BRIGHTNESS => match frame.payload {
            [value] => Ok(DeviceCommand::SetBrightness {
                value: *value as i32,
            }),
            _ => Err(bad_payload()),
        },
        CTRL_SCHEDULE_LIGHTS => match frame.payload {
            [from_hour, from_minute, to_hour, to_minute, enabled] => {
                Ok(DeviceCommand::ScheduleLights {
                    schedule: LightSchedule {
                        from_hour: *from_hour,
                        from_minute: *from_minute,
                        to_hour: *to_hour,
                        to_minute: *to_minute,
                        enabled: *enabled != 0,
                    },
                })
            }
            _ => Err(bad_payload()),
        },
        CTRL_TRIGGER_PUMP => match frame.payload {
            [hi, lo] => Ok(DeviceCommand::TriggerPump {
                duration_secs: u16::from_be_bytes([*hi, *lo]) as u32,
            }),
            _ => Err(bad_payload()),
        },
        other => Err(ControlError::UnknownCommand(other)),
    }
}

/// Payload: `[brightness][flags][temp_hi][temp_lo][has_schedule][fh][fm][th][tm][enabled]`
/// with the temperature in signed centi-degrees.
pub fn encode_state_frame(state: &DeviceState) -> Vec<u8> {
    let mut flags = 0;
    if state.pump_active {
        flags |= FLAG_PUMP;
    }
    if state.fan_active {
        flags |= FLAG_FAN;
    }
    if state.water_empty {
        flags |= FLAG_WATER_EMPTY;
    }

    let centi = state
        .temperature_c
        .map(|t| (t * 100.0).round().clamp(i16::MIN as f32 + 1.0, i16::MAX as f32) as i16)
        .unwrap_or(NO_TEMPERATURE);

    let mut payload = vec![state.brightness, flags];
    payload.extend_from_slice(&centi.to_be_bytes());
    match state.schedule {
        Some(s) => payload.extend_from_slice(&[
            1,
            s.from_hour,
            s.from_minute,
            s.to_hour,
            s.to_minute,
            s.enabled as u8,
        ]),
        None => payload.extend_from_slice(&[0; 6]),
    }

    // Ten payload bytes always fit in a frame.
    rpc::encode_frame(STATE_FRAME, &payload).unwrap_or_default()
}

pub struct RadioCommandAdapter<L> {
    link: L,
    sink: Option<CommandSink>,
    pending: Option<Vec<u8>>,
    subscribed: bool,
}

impl<L: RadioLink> RadioCommandAdapter<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            sink: None,
            pending: None,
            subscribed: false,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl<L: RadioLink> CommandAdapter for RadioCommandAdapter<L> {
    fn name(&self) -> &'static str {
        "radio"
    }

    fn set_command_sink(&mut self, sink: CommandSink) {
        self.sink = Some(sink);
    }

    fn requires_network(&self) -> bool {
        false
    }

    fn begin(&mut self) {
        tracing::info!("radio control service started");
    }

    fn tick(&mut self, _now: Millis) {
        while let Some(bytes) = self.link.poll_control_write() {
            match decode_control_frame(&bytes) {
                Ok(command) => {
                    if let Some(sink) = &self.sink {
                        sink.dispatch(command);
                    }
                }
                Err(err) => tracing::warn!(error = %err, "dropping radio control write"),
            }
        }

        let subscribed = self.link.has_subscriber();
        if subscribed && !self.subscribed {
            if let Some(sink) = &self.sink {
                sink.subscriber_connected();
            }
        }
        self.subscribed = subscribed;

        if subscribed {
            if let Some(frame) = self.pending.take() {
                self.link.notify_device_state(&frame);
            }
        }
    }

    fn notify_state(&mut self, state: &DeviceState) {
        self.pending = Some(encode_state_frame(state));
    }
}
