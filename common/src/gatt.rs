//! Radio service layout and the record format the host bridge uses to carry
//! characteristic reads, writes and notifications over a byte stream.

pub const IMPROV_SERVICE_UUID: &str = "00004677-0000-1000-8000-00805f9b34fb";
pub const IMPROV_VERSION_UUID: &str = "00467768-6228-2272-4663-277478268000";
pub const IMPROV_STATE_UUID: &str = "00467768-6228-2272-4663-277478268001";
pub const IMPROV_ERROR_UUID: &str = "00467768-6228-2272-4663-277478268002";
pub const IMPROV_RPC_COMMAND_UUID: &str = "00467768-6228-2272-4663-277478268003";
pub const IMPROV_RPC_RESULT_UUID: &str = "00467768-6228-2272-4663-277478268004";
pub const IMPROV_CAPABILITIES_UUID: &str = "00467768-6228-2272-4663-277478268005";

pub const CONTROL_SERVICE_UUID: &str = "4f525455-0000-1000-8000-00805f9b34fb";
pub const CONTROL_COMMAND_UUID: &str = "4f525455-0001-1000-8000-00805f9b34fb";
pub const DEVICE_STATE_UUID: &str = "4f525455-0002-1000-8000-00805f9b34fb";

pub const IMPROV_VERSION: &str = "improv-wifi v1";
pub const CAPABILITY_WIFI: u8 = 0x01;

/// Bridge records carry at most this many value bytes.
pub const MAX_RECORD_VALUE: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Characteristic {
    Version = 0,
    State = 1,
    Error = 2,
    RpcCommand = 3,
    RpcResult = 4,
    Capabilities = 5,
    ControlCommand = 6,
    DeviceState = 7,
}

impl Characteristic {
    pub const ALL: [Characteristic; 8] = [
        Self::Version,
        Self::State,
        Self::Error,
        Self::RpcCommand,
        Self::RpcResult,
        Self::Capabilities,
        Self::ControlCommand,
        Self::DeviceState,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as u8 == id)
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn uuid(self) -> &'static str {
        match self {
            Self::Version => IMPROV_VERSION_UUID,
            Self::State => IMPROV_STATE_UUID,
            Self::Error => IMPROV_ERROR_UUID,
            Self::RpcCommand => IMPROV_RPC_COMMAND_UUID,
            Self::RpcResult => IMPROV_RPC_RESULT_UUID,
            Self::Capabilities => IMPROV_CAPABILITIES_UUID,
            Self::ControlCommand => CONTROL_COMMAND_UUID,
            Self::DeviceState => DEVICE_STATE_UUID,
        }
    }

    /// Centrals may only write these.
    pub fn is_writable(self) -> bool {
        matches!(self, Self::RpcCommand | Self::ControlCommand)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRecord {
    pub characteristic: Characteristic,
    pub value: Vec<u8>,
}

impl BridgeRecord {
    pub fn new(characteristic: Characteristic, value: &[u8]) -> Self {
        Self {
            characteristic,
            value: value.to_vec(),
        }
    }

    /// `[characteristic_id][len][value]`; values longer than a record can
    /// carry are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.value.len().min(MAX_RECORD_VALUE);
        let mut out = Vec::with_capacity(len + 2);
        out.push(self.characteristic.id());
        out.push(len as u8);
        out.extend_from_slice(&self.value[..len]);
        out
    }
}

/// Incremental decoder for a stream of bridge records.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Records with an unknown characteristic id are skipped.
    pub fn next_record(&mut self) -> Option<BridgeRecord> {
        loop {
            if self.buffer.len() < 2 {
                return None;
            }
            let len = self.buffer[1] as usize;
            if self.buffer.len() < len + 2 {
                return None;
            }

            let raw: Vec<u8> = self.buffer.drain(..len + 2).collect();
            match Characteristic::from_id(raw[0]) {
                Some(characteristic) => {
                    return Some(BridgeRecord {
                        characteristic,
                        value: raw[2..].to_vec(),
                    })
                }
                None => tracing::warn!(id = raw[0], "dropping record for unknown characteristic"),
            }
        }
    }
}
