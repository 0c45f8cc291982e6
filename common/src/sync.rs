use std::sync::mpsc::{self, Receiver, Sender};

use chrono::{DateTime, FixedOffset};

use crate::{
    adapter::{CommandAdapter, CommandSink, SyncEvent},
    config::DeviceConfig,
    control::{clamp_pump_duration, FanController, TemperatureFilter, WaterLevelClassifier},
    ports::{ActuatorPort, OtaUpdater, SensorPort},
    store::{DeviceStateStore, KeyValueStore},
    time::{deadline_reached, interval_due, is_wall_clock_synced, minute_of_day, Millis},
    types::{DeviceCommand, DeviceState},
    wifi::LinkSnapshot,
};

/// Hardware the synchronizer drives.
pub struct Peripherals {
    pub sensors: Box<dyn SensorPort>,
    pub actuators: Box<dyn ActuatorPort>,
    pub ota: Box<dyn OtaUpdater>,
}

struct AdapterSlot {
    adapter: Box<dyn CommandAdapter>,
    started: bool,
}

/// Single writer of the canonical [`DeviceState`]. Transports post commands
/// through their [`CommandSink`]; the queue is drained on [`tick`](Self::tick).
pub struct StateSynchronizer<S> {
    config: DeviceConfig,
    state: DeviceState,
    last_broadcast: Option<DeviceState>,
    adapters: Vec<AdapterSlot>,
    store: DeviceStateStore<S>,
    peripherals: Peripherals,
    events_tx: Sender<SyncEvent>,
    events_rx: Receiver<SyncEvent>,

    temperature: TemperatureFilter,
    water: WaterLevelClassifier,
    fan: FanController,
    last_temp_poll: Option<Millis>,
    last_water_poll: Option<Millis>,

    last_schedule_eval: Option<Millis>,
    wall_clock: Option<DateTime<FixedOffset>>,
    schedule_dirty: bool,
    schedule_active: Option<bool>,
    waiting_for_time_logged: bool,

    applied_light: Option<u8>,
    applied_pump: Option<bool>,
    applied_fan: Option<bool>,
}

impl<S: KeyValueStore> StateSynchronizer<S> {
    pub fn new(
        config: &DeviceConfig,
        mut store: DeviceStateStore<S>,
        peripherals: Peripherals,
    ) -> Self {
        let state = match store.load() {
            Some(state) => {
                tracing::info!(
                    brightness = state.brightness,
                    schedule = state.schedule.is_some(),
                    "restored device state"
                );
                state
            }
            None => DeviceState::default(),
        };
        let (events_tx, events_rx) = mpsc::channel();

        Self {
            config: config.clone(),
            state,
            last_broadcast: None,
            adapters: Vec::new(),
            store,
            peripherals,
            events_tx,
            events_rx,
            temperature: TemperatureFilter::new(config),
            water: WaterLevelClassifier::new(config),
            fan: FanController::new(config),
            last_temp_poll: None,
            last_water_poll: None,
            last_schedule_eval: None,
            wall_clock: None,
            schedule_dirty: true,
            schedule_active: None,
            waiting_for_time_logged: false,
            applied_light: None,
            applied_pump: None,
            applied_fan: None,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn store(&self) -> &DeviceStateStore<S> {
        &self.store
    }

    pub fn applied_light(&self) -> Option<u8> {
        self.applied_light
    }

    pub fn command_sink(&self, source: &'static str) -> CommandSink {
        CommandSink::new(self.events_tx.clone(), source)
    }

    /// Registers a transport and hands it its sink.
    pub fn add_adapter(&mut self, mut adapter: Box<dyn CommandAdapter>) {
        adapter.set_command_sink(self.command_sink(adapter.name()));
        tracing::debug!(adapter = adapter.name(), "registered command transport");
        self.adapters.push(AdapterSlot {
            adapter,
            started: false,
        });
    }

    /// Drives outputs to the restored state and starts the transports that
    /// do not need the network.
    pub fn begin(&mut self) {
        self.apply_outputs();
        for slot in self.adapters.iter_mut().filter(|s| !s.adapter.requires_network()) {
            slot.adapter.begin();
            slot.started = true;
        }
        self.broadcast_state(true);
    }

    /// Starts network transports; a no-op for ones already running.
    pub fn begin_transports(&mut self) {
        let mut started_any = false;
        for slot in self
            .adapters
            .iter_mut()
            .filter(|s| s.adapter.requires_network() && !s.started)
        {
            tracing::info!(adapter = slot.adapter.name(), "starting transport");
            slot.adapter.begin();
            slot.started = true;
            started_any = true;
        }
        if started_any {
            self.broadcast_state(true);
        }
    }

    pub fn on_link_change(&mut self, link: &LinkSnapshot) {
        for slot in &mut self.adapters {
            slot.adapter.link_changed(link);
        }
        if link.is_up() {
            self.begin_transports();
        }
    }

    /// Pushes state to every running transport unless nothing changed since
    /// the last push. Returns whether a push happened.
    pub fn broadcast_state(&mut self, force: bool) -> bool {
        if !force && self.last_broadcast.as_ref() == Some(&self.state) {
            return false;
        }

        for slot in self.adapters.iter_mut().filter(|s| s.started) {
            slot.adapter.notify_state(&self.state);
        }
        self.last_broadcast = Some(self.state.clone());
        true
    }

    pub fn handle_command(&mut self, command: DeviceCommand, now: Millis) {
        match command {
            DeviceCommand::SetBrightness { value } => {
                if self.state.set_brightness(value) {
                    tracing::info!(brightness = self.state.brightness, "brightness changed");
                    self.store.save(&self.state);
                    self.apply_light();
                }
                self.broadcast_state(false);
            }
            DeviceCommand::ScheduleLights { schedule } => {
                if !schedule.validate() {
                    tracing::warn!(?schedule, "ignoring invalid light schedule");
                    return;
                }
                if self.state.schedule != Some(schedule) {
                    tracing::info!(?schedule, "light schedule updated");
                    self.state.schedule = Some(schedule);
                    self.schedule_active = None;
                    self.store.save(&self.state);
                }
                self.schedule_dirty = true;
                let wall_clock = self.wall_clock;
                self.evaluate_schedule(now, wall_clock.as_ref());
                self.apply_light();
                self.broadcast_state(false);
            }
            DeviceCommand::TriggerPump { duration_secs } => {
                self.trigger_pump(duration_secs, now);
            }
            DeviceCommand::OtaUpdate { url } => match self.peripherals.ota.begin_update(&url) {
                Ok(()) => tracing::info!(%url, "firmware update started"),
                Err(err) => tracing::warn!(%url, error = %err, "firmware update rejected"),
            },
        }
    }

    /// One cooperative iteration: transports, queued commands, sensors,
    /// safety limits, schedule, then a diffed broadcast.
    pub fn tick(&mut self, now: Millis, wall_clock: Option<DateTime<FixedOffset>>) {
        if let Some(clock) = wall_clock.filter(is_wall_clock_synced) {
            self.wall_clock = Some(clock);
        }
        for slot in self.adapters.iter_mut().filter(|s| s.started) {
            slot.adapter.tick(now);
        }

        self.drain_events(now);
        self.poll_sensors(now);
        self.check_pump_deadline(now);
        self.update_fan();
        self.evaluate_schedule(now, wall_clock.as_ref());
        self.broadcast_state(false);
    }

    fn drain_events(&mut self, now: Millis) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                SyncEvent::Command { source, command } => {
                    tracing::debug!(source, kind = command.kind(), "applying command");
                    self.handle_command(command, now);
                }
                SyncEvent::SubscriberConnected { source } => {
                    tracing::debug!(source, "subscriber connected; sending full state");
                    self.broadcast_state(true);
                }
            }
        }
    }

    fn trigger_pump(&mut self, requested_secs: u32, now: Millis) {
        if requested_secs == 0 {
            tracing::debug!("ignoring zero-length pump request");
            return;
        }
        if self.config.pump_requires_water && self.state.water_empty {
            tracing::warn!("refusing to run pump: water tank empty");
            self.broadcast_state(false);
            return;
        }

        let secs = clamp_pump_duration(requested_secs, &self.config);
        if secs < requested_secs {
            tracing::info!(requested_secs, secs, "pump duration capped");
        }
        tracing::info!(secs, "pump started");

        self.state.pump_active = true;
        self.state.pump_stop_at = Some(now.wrapping_add(secs.saturating_mul(1_000)));
        self.apply_pump();
        self.update_fan();
        self.broadcast_state(false);
    }

    fn stop_pump(&mut self, reason: &'static str) {
        tracing::info!(reason, "pump stopped");
        self.state.pump_active = false;
        self.state.pump_stop_at = None;
        self.apply_pump();
        self.update_fan();
    }

    fn check_pump_deadline(&mut self, now: Millis) {
        if !self.state.pump_active {
            return;
        }
        if let Some(deadline) = self.state.pump_stop_at {
            if deadline_reached(now, deadline) {
                self.stop_pump("run time elapsed");
            }
        }
    }

    fn poll_sensors(&mut self, now: Millis) {
        if interval_due(now, self.last_temp_poll, self.config.temp_poll_interval_ms) {
            self.last_temp_poll = Some(now);
            let reading = self.peripherals.sensors.read_temperature_c();
            if let Some(value) = self.temperature.accept(reading) {
                tracing::debug!(temperature_c = value, "temperature updated");
                self.state.temperature_c = Some(value);
            }
        }

        if interval_due(now, self.last_water_poll, self.config.water_poll_interval_ms) {
            self.last_water_poll = Some(now);
            let raw = self.peripherals.sensors.read_water_raw();
            let empty = self.water.classify(raw);
            if empty != self.state.water_empty {
                self.state.water_empty = empty;
                if empty {
                    tracing::warn!(raw, "water tank empty");
                    if self.state.pump_active && self.config.pump_requires_water {
                        self.stop_pump("water tank empty");
                    }
                } else {
                    tracing::info!(raw, "water tank refilled");
                }
            }
        }
    }

    fn update_fan(&mut self) {
        let next = self.fan.decide(
            self.state.fan_active,
            self.state.pump_active,
            self.state.temperature_c,
        );
        if next != self.state.fan_active {
            tracing::info!(on = next, "fan state changed");
            self.state.fan_active = next;
        }
        self.apply_fan();
    }

    fn evaluate_schedule(&mut self, now: Millis, wall_clock: Option<&DateTime<FixedOffset>>) {
        let Some(schedule) = self.state.schedule else {
            self.schedule_active = None;
            self.apply_light();
            return;
        };

        if !self.schedule_dirty
            && !interval_due(now, self.last_schedule_eval, self.config.schedule_eval_interval_ms)
        {
            return;
        }

        let wall_clock = match wall_clock {
            Some(clock) if is_wall_clock_synced(clock) => clock,
            _ => {
                if !self.waiting_for_time_logged {
                    tracing::info!("waiting for time sync before evaluating light schedule");
                    self.waiting_for_time_logged = true;
                }
                return;
            }
        };
        self.waiting_for_time_logged = false;
        self.schedule_dirty = false;
        self.last_schedule_eval = Some(now);

        let active = schedule.is_on_at(minute_of_day(wall_clock));
        if self.schedule_active != Some(active) {
            tracing::info!(active, "light schedule transition");
            self.schedule_active = Some(active);
        }
        self.apply_light();
    }

    /// `None` while a schedule exists but has not been evaluated yet.
    fn desired_light(&self) -> Option<u8> {
        match self.state.schedule {
            None => Some(self.state.brightness),
            Some(schedule) if !schedule.enabled => Some(0),
            Some(_) => self
                .schedule_active
                .map(|on| if on { self.state.brightness } else { 0 }),
        }
    }

    fn apply_outputs(&mut self) {
        self.apply_light();
        self.apply_pump();
        self.apply_fan();
    }

    fn apply_light(&mut self) {
        let Some(level) = self.desired_light() else {
            return;
        };
        if self.applied_light != Some(level) {
            tracing::debug!(level, "light output");
            self.peripherals.actuators.set_light_level(level);
            self.applied_light = Some(level);
        }
    }

    fn apply_pump(&mut self) {
        let on = self.state.pump_active;
        if self.applied_pump != Some(on) {
            self.peripherals.actuators.set_pump(on);
            self.applied_pump = Some(on);
        }
    }

    fn apply_fan(&mut self) {
        let on = self.state.fan_active;
        if self.applied_fan != Some(on) {
            self.peripherals.actuators.set_fan(on);
            self.applied_fan = Some(on);
        }
    }
}
