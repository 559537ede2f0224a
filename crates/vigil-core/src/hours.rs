//! Active-hours gate: a configured local-time window during which the
//! scheduler is allowed to surface anything. Outside the window, ticks are
//! silent no-ops.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::config::ActiveHoursConfig;
use crate::error::{Result, VigilError};
use crate::timefmt::parse_tz;

/// Parsed active-hours window. Overnight windows (start > end) span
/// midnight: 22:00–07:00 is active at 23:30 and at 06:00.
#[derive(Debug, Clone, Copy)]
pub struct ActiveWindow {
    tz: Tz,
    start: NaiveTime,
    end: NaiveTime,
}

impl ActiveWindow {
    pub fn from_config(cfg: &ActiveHoursConfig) -> Result<Self> {
        let tz = parse_tz(&cfg.timezone)?;
        Ok(Self {
            tz,
            start: parse_hhmm(&cfg.start)?,
            end: parse_hhmm(&cfg.end)?,
        })
    }

    /// True when `now` falls inside the window, evaluated in the window's
    /// own timezone.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz).time();
        if self.start <= self.end {
            local >= self.start && local < self.end
        } else {
            // Overnight span.
            local >= self.start || local < self.end
        }
    }
}

/// Gate wrapper: `None` means no window configured, always active.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveHoursGate(Option<ActiveWindow>);

impl ActiveHoursGate {
    pub fn new(window: Option<ActiveWindow>) -> Self {
        Self(window)
    }

    pub fn from_config(cfg: Option<&ActiveHoursConfig>) -> Result<Self> {
        Ok(Self(cfg.map(ActiveWindow::from_config).transpose()?))
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.0 {
            Some(w) => w.is_active(now),
            None => true,
        }
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| VigilError::Config(format!("invalid active_hours time: {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(tz: &str, start: &str, end: &str) -> ActiveWindow {
        ActiveWindow::from_config(&ActiveHoursConfig {
            timezone: tz.to_string(),
            start: start.to_string(),
            end: end.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn daytime_window() {
        let w = window("UTC", "08:00", "22:00");
        let morning = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2026, 1, 10, 23, 0, 0).unwrap();
        assert!(w.is_active(morning));
        assert!(!w.is_active(night));
    }

    #[test]
    fn overnight_window_spans_midnight() {
        let w = window("UTC", "22:00", "07:00");
        let late = Utc.with_ymd_and_hms(2026, 1, 10, 23, 30, 0).unwrap();
        let early = Utc.with_ymd_and_hms(2026, 1, 10, 6, 0, 0).unwrap();
        let midday = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        assert!(w.is_active(late));
        assert!(w.is_active(early));
        assert!(!w.is_active(midday));
    }

    #[test]
    fn window_respects_timezone() {
        // 08:00–22:00 in Tokyo; 00:00 UTC is 09:00 JST — active.
        let w = window("Asia/Tokyo", "08:00", "22:00");
        let t = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert!(w.is_active(t));
        // 15:00 UTC is 00:00 JST — inactive.
        let t = Utc.with_ymd_and_hms(2026, 1, 10, 15, 0, 0).unwrap();
        assert!(!w.is_active(t));
    }

    #[test]
    fn unset_gate_is_always_active() {
        let gate = ActiveHoursGate::default();
        assert!(gate.is_active(Utc::now()));
    }
}
