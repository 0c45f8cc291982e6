use crate::{
    config::DeviceConfig,
    gatt::Characteristic,
    rpc::{self, FrameAssembler, CMD_SET_WIFI_CREDENTIALS, MAX_PAYLOAD_LEN},
    time::{elapsed, Millis},
    types::CredentialRecord,
    wifi::{LinkSnapshot, WifiStatus},
};

/// Session state as carried on the state characteristic. Values 1 and 2 are
/// the authorization states, which this device never enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImprovState {
    Ready = 0x00,
    Provisioning = 0x03,
    Provisioned = 0x04,
    Error = 0x05,
}

impl ImprovState {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        [Self::Ready, Self::Provisioning, Self::Provisioned, Self::Error]
            .into_iter()
            .find(|state| state.as_byte() == byte)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Provisioning => "provisioning",
            Self::Provisioned => "provisioned",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImprovError {
    None = 0x00,
    InvalidRpc = 0x01,
    UnknownRpc = 0x02,
    WifiFailed = 0x06,
    WifiTimeout = 0x07,
}

impl ImprovError {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        [
            Self::None,
            Self::InvalidRpc,
            Self::UnknownRpc,
            Self::WifiFailed,
            Self::WifiTimeout,
        ]
        .into_iter()
        .find(|error| error.as_byte() == byte)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::None => "no error",
            Self::InvalidRpc => "invalid rpc packet",
            Self::UnknownRpc => "unknown rpc command",
            Self::WifiFailed => "unable to connect to the network",
            Self::WifiTimeout => "timed out connecting to the network",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    StateChanged(ImprovState),
    ErrorChanged(ImprovError),
    CredentialsReceived(CredentialRecord),
    /// A complete frame for the rpc-result characteristic.
    RpcResult(Vec<u8>),
}

/// Radio side of the provisioning service.
pub trait ProvisioningPort {
    /// Next chunk written by a central to the rpc-command characteristic.
    fn poll_write(&mut self) -> Option<Vec<u8>>;
    fn publish(&mut self, characteristic: Characteristic, value: &[u8]);
}

pub struct ProvisioningProtocol {
    timeout_ms: Millis,
    error_display_ms: Millis,
    state: ImprovState,
    error: ImprovError,
    assembler: FrameAssembler,
    started_at: Option<Millis>,
    last_state_change: Millis,
    success_reported: bool,
    link_was_up: bool,
    events: Vec<ProvisioningEvent>,
}

impl ProvisioningProtocol {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            timeout_ms: config.provisioning_timeout_ms,
            error_display_ms: config.error_display_ms,
            state: ImprovState::Ready,
            error: ImprovError::None,
            assembler: FrameAssembler::new(),
            started_at: None,
            last_state_change: 0,
            success_reported: false,
            link_was_up: false,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> ImprovState {
        self.state
    }

    pub fn error(&self) -> ImprovError {
        self.error
    }

    pub fn is_provisioning(&self) -> bool {
        self.started_at.is_some()
    }

    /// Picks the initial state from the link and announces state and error.
    pub fn begin(&mut self, link: &LinkSnapshot, now: Millis) {
        self.state = if link.is_up() {
            ImprovState::Provisioned
        } else {
            ImprovState::Ready
        };
        self.error = ImprovError::None;
        self.last_state_change = now;
        self.link_was_up = link.is_up();
        self.success_reported = link.is_up();
        self.events.push(ProvisioningEvent::StateChanged(self.state));
        self.events.push(ProvisioningEvent::ErrorChanged(self.error));
        tracing::info!(state = self.state.as_str(), "provisioning service started");
    }

    pub fn feed(&mut self, bytes: &[u8], now: Millis) {
        self.assembler.push(bytes);

        while let Some(next) = self.assembler.next_frame() {
            match next {
                Ok(frame) => self.handle_frame(&frame, now),
                Err(err) => {
                    tracing::warn!(error = %err, "discarding rpc buffer");
                    self.fail(ImprovError::InvalidRpc, now);
                    break;
                }
            }
        }
    }

    fn handle_frame(&mut self, bytes: &[u8], now: Millis) {
        let frame = match rpc::decode_frame(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting rpc frame");
                self.fail(ImprovError::InvalidRpc, now);
                return;
            }
        };

        if frame.command != CMD_SET_WIFI_CREDENTIALS {
            tracing::warn!(command = frame.command, "unknown rpc command");
            self.fail(ImprovError::UnknownRpc, now);
            return;
        }

        match rpc::decode_credentials(frame.payload) {
            Ok(record) => {
                tracing::info!(ssid = %record.ssid, "received Wi-Fi credentials");
                self.events
                    .push(ProvisioningEvent::CredentialsReceived(record));
                self.set_error(ImprovError::None);
                self.set_state(ImprovState::Provisioning, now);
                self.started_at = Some(now);
                self.success_reported = false;
            }
            Err(err) => {
                tracing::warn!(error = %err, "malformed credentials payload");
                self.fail(ImprovError::InvalidRpc, now);
            }
        }
    }

    /// Advances timeout, success and link-following logic. Call once per
    /// loop iteration.
    pub fn poll_progress(&mut self, now: Millis, link: &LinkSnapshot) {
        let link_came_up = link.is_up() && !self.link_was_up;
        self.link_was_up = link.is_up();

        if let Some(started_at) = self.started_at {
            if link.is_up() {
                self.started_at = None;
                self.enter_provisioned(link, now);
            } else if elapsed(now, started_at) > self.timeout_ms {
                let error = match link.status {
                    WifiStatus::ConnectFailed | WifiStatus::NoSsidAvailable => {
                        ImprovError::WifiFailed
                    }
                    _ => ImprovError::WifiTimeout,
                };
                tracing::warn!(?error, status = ?link.status, "provisioning timed out");
                self.fail(error, now);
            }
            return;
        }

        if self.state == ImprovState::Error {
            if link_came_up {
                self.enter_provisioned(link, now);
            } else if elapsed(now, self.last_state_change) >= self.error_display_ms {
                self.set_error(ImprovError::None);
                self.set_state(ImprovState::Ready, now);
            }
            return;
        }

        if link.is_up() && self.state != ImprovState::Provisioned {
            self.enter_provisioned(link, now);
        } else if !link.is_up() && self.state == ImprovState::Provisioned {
            self.success_reported = false;
            self.set_state(ImprovState::Ready, now);
        }
    }

    pub fn drain_events(&mut self) -> Vec<ProvisioningEvent> {
        std::mem::take(&mut self.events)
    }

    fn enter_provisioned(&mut self, link: &LinkSnapshot, now: Millis) {
        self.set_error(ImprovError::None);
        self.set_state(ImprovState::Provisioned, now);
        if !self.success_reported {
            self.report_success(link);
        }
    }

    fn report_success(&mut self, link: &LinkSnapshot) {
        let summary = link.summary();
        let payload = &summary.as_bytes()[..summary.len().min(MAX_PAYLOAD_LEN)];
        match rpc::encode_frame(CMD_SET_WIFI_CREDENTIALS, payload) {
            Ok(frame) => {
                tracing::info!(%summary, "provisioning succeeded");
                self.events.push(ProvisioningEvent::RpcResult(frame));
                self.success_reported = true;
            }
            Err(err) => tracing::warn!(error = %err, "could not frame provisioning result"),
        }
    }

    fn fail(&mut self, error: ImprovError, now: Millis) {
        self.started_at = None;
        self.success_reported = false;
        self.set_error(error);
        self.set_state(ImprovState::Error, now);
        // A fresh error restarts the display window.
        self.last_state_change = now;
    }

    fn set_state(&mut self, state: ImprovState, now: Millis) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.last_state_change = now;
        self.events.push(ProvisioningEvent::StateChanged(state));
    }

    fn set_error(&mut self, error: ImprovError) {
        if self.error == error {
            return;
        }
        self.error = error;
        self.events.push(ProvisioningEvent::ErrorChanged(error));
    }
}
