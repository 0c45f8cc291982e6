use crate::types::LightSchedule;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

impl LightSchedule {
    pub fn new(from: (u8, u8), to: (u8, u8)) -> Self {
        Self {
            from_hour: from.0,
            from_minute: from.1,
            to_hour: to.0,
            to_minute: to.1,
            enabled: true,
        }
    }

    pub fn validate(&self) -> bool {
        self.from_hour < 24 && self.to_hour < 24 && self.from_minute < 60 && self.to_minute < 60
    }

    pub fn start_minutes(&self) -> u16 {
        self.from_hour as u16 * 60 + self.from_minute as u16
    }

    pub fn end_minutes(&self) -> u16 {
        self.to_hour as u16 * 60 + self.to_minute as u16
    }

    /// Whether the daily window `[from, to)` covers `minute_of_day`. Ignores
    /// the enabled flag; invalid schedules are never on.
    pub fn window_contains(&self, minute_of_day: u16) -> bool {
        if !self.validate() {
            return false;
        }

        let from = self.start_minutes();
        let to = self.end_minutes();
        let now = minute_of_day % MINUTES_PER_DAY;

        if from == to {
            false
        } else if from < to {
            now >= from && now < to
        } else {
            // Wraps past midnight.
            now >= from || now < to
        }
    }

    pub fn is_on_at(&self, minute_of_day: u16) -> bool {
        self.enabled && self.window_contains(minute_of_day)
    }
}
