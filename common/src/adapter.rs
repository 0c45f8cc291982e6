use std::sync::mpsc::Sender;

use crate::{
    time::Millis,
    types::{DeviceCommand, DeviceState},
    wifi::LinkSnapshot,
};

/// Everything a transport can hand to the synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Command {
        source: &'static str,
        command: DeviceCommand,
    },
    /// A client attached and needs the full state regardless of change.
    SubscriberConnected { source: &'static str },
}

/// Handle a transport posts decoded commands through. Posting never blocks;
/// the synchronizer drains the queue on its own loop.
#[derive(Debug, Clone)]
pub struct CommandSink {
    tx: Sender<SyncEvent>,
    source: &'static str,
}

impl CommandSink {
    pub fn new(tx: Sender<SyncEvent>, source: &'static str) -> Self {
        Self { tx, source }
    }

    pub fn dispatch(&self, command: DeviceCommand) -> bool {
        tracing::debug!(source = self.source, kind = command.kind(), "command received");
        self.post(SyncEvent::Command {
            source: self.source,
            command,
        })
    }

    pub fn subscriber_connected(&self) -> bool {
        self.post(SyncEvent::SubscriberConnected {
            source: self.source,
        })
    }

    fn post(&self, event: SyncEvent) -> bool {
        if self.tx.send(event).is_err() {
            tracing::debug!(source = self.source, "synchronizer gone; dropping event");
            return false;
        }
        true
    }
}

/// One command transport. Transports never hold canonical state: they
/// decode inbound payloads into [`DeviceCommand`]s and encode the state they
/// are handed.
pub trait CommandAdapter {
    fn name(&self) -> &'static str;

    /// Replaces any previously registered sink.
    fn set_command_sink(&mut self, sink: CommandSink);

    /// Network transports start once the link is up; others at boot.
    fn requires_network(&self) -> bool {
        true
    }

    fn begin(&mut self);

    /// Must not block.
    fn tick(&mut self, now: Millis);

    /// Pushes `state` in the transport's format. Safe to repeat.
    fn notify_state(&mut self, state: &DeviceState);

    fn link_changed(&mut self, _link: &LinkSnapshot) {}
}
