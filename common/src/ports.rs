//! Hardware seams the synchronizer drives. The host binary simulates them;
//! tests use in-memory fakes.

use thiserror::Error;

pub trait SensorPort {
    /// `None` when the probe is missing or the read failed.
    fn read_temperature_c(&mut self) -> Option<f32>;
    /// Raw ADC counts from the water level probe.
    fn read_water_raw(&mut self) -> u16;
}

pub trait ActuatorPort {
    /// Light output in percent, 0 to 100.
    fn set_light_level(&mut self, percent: u8);
    fn set_pump(&mut self, on: bool);
    fn set_fan(&mut self, on: bool);
}

#[derive(Debug, Error)]
pub enum OtaError {
    #[error("invalid update url: {0}")]
    InvalidUrl(String),
    #[error("firmware updates are not supported on this target")]
    Unsupported,
}

pub trait OtaUpdater {
    fn begin_update(&mut self, url: &str) -> Result<(), OtaError>;
}

/// Accepts only absolute http(s) URLs with a host.
pub fn validate_update_url(url: &str) -> Result<(), OtaError> {
    let trimmed = url.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or_else(|| OtaError::InvalidUrl(url.to_string()))?;
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(OtaError::InvalidUrl(url.to_string()));
    }
    Ok(())
}
