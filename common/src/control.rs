use crate::config::DeviceConfig;

/// Drops out-of-range probe readings and ones that moved less than the
/// publish delta.
#[derive(Debug, Clone)]
pub struct TemperatureFilter {
    min_c: f32,
    max_c: f32,
    delta_c: f32,
    last: Option<f32>,
}

impl TemperatureFilter {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            min_c: config.min_valid_temp_c,
            max_c: config.max_valid_temp_c,
            delta_c: config.temp_delta_threshold_c,
            last: None,
        }
    }

    pub fn last(&self) -> Option<f32> {
        self.last
    }

    /// Returns the reading when it should replace the published value.
    pub fn accept(&mut self, reading: Option<f32>) -> Option<f32> {
        let value = reading?;
        if !value.is_finite() || value <= self.min_c || value >= self.max_c {
            tracing::debug!(value, "ignoring out-of-range temperature reading");
            return None;
        }

        if let Some(last) = self.last {
            if (value - last).abs() < self.delta_c {
                return None;
            }
        }

        self.last = Some(value);
        Some(value)
    }
}

/// Classifies raw water probe counts; low counts mean an empty tank.
#[derive(Debug, Clone)]
pub struct WaterLevelClassifier {
    threshold: u16,
    hysteresis: u16,
    empty: Option<bool>,
}

impl WaterLevelClassifier {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            threshold: config.water_empty_threshold,
            hysteresis: config.water_hysteresis,
            empty: None,
        }
    }

    pub fn is_empty(&self) -> Option<bool> {
        self.empty
    }

    pub fn classify(&mut self, raw: u16) -> bool {
        let empty = match self.empty {
            None => raw < self.threshold,
            Some(true) => raw <= self.threshold.saturating_add(self.hysteresis),
            Some(false) => raw < self.threshold.saturating_sub(self.hysteresis),
        };
        self.empty = Some(empty);
        empty
    }
}

/// Three-zone fan rule: the pump or heat forces it on, cool air with the
/// pump idle turns it off, anything between holds. A missing reading holds.
#[derive(Debug, Clone, Copy)]
pub struct FanController {
    on_c: f32,
    off_c: f32,
}

impl FanController {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            on_c: config.fan_on_temp_c,
            off_c: config.fan_off_temp_c,
        }
    }

    pub fn decide(&self, current: bool, pump_active: bool, temperature_c: Option<f32>) -> bool {
        if pump_active {
            return true;
        }
        match temperature_c {
            Some(t) if t >= self.on_c => true,
            Some(t) if t <= self.off_c => false,
            Some(_) | None => current,
        }
    }
}

pub fn clamp_pump_duration(requested_secs: u32, config: &DeviceConfig) -> u32 {
    requested_secs.min(config.max_pump_duration_secs)
}
