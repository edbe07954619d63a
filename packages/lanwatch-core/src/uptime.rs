//! Windowed uptime from a device's event history.

use crate::model::{DeviceEvent, EventKind};

/// Trailing window used by the API's `uptimePct24h`.
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Percentage of `[now_ms - window_ms, now_ms]` the device spent online.
///
/// `events` must be ordered by `ts`. Only events inside the window are
/// considered and the device is assumed offline before the first of them,
/// so uptime that began before the window is not credited.
pub fn pct(events: &[DeviceEvent], window_ms: i64, now_ms: i64) -> f64 {
    if window_ms <= 0 || events.is_empty() {
        return 0.0;
    }

    let window_start = now_ms - window_ms;
    let mut in_window = events.iter().filter(|e| e.ts >= window_start).peekable();
    let Some(first) = in_window.peek() else {
        return 0.0;
    };

    let mut online = false;
    let mut last_ts = first.ts;
    let mut up_ms: i64 = 0;

    for event in in_window {
        if online {
            up_ms += event.ts - last_ts;
        }
        online = event.kind == EventKind::DeviceOnline;
        last_ts = event.ts;
    }

    if online {
        up_ms += (now_ms - last_ts).max(0);
    }

    (up_ms as f64 / window_ms as f64 * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(ts: i64, kind: EventKind) -> DeviceEvent {
        DeviceEvent::new("dev", ts, kind)
    }

    #[test]
    fn test_half_window_online() {
        let events = [ev(2000, EventKind::DeviceOnline), ev(7000, EventKind::DeviceOffline)];
        assert_eq!(pct(&events, 10_000, 10_000), 50.0);
    }

    #[test]
    fn test_online_until_now() {
        let events = [ev(1000, EventKind::DeviceOnline)];
        assert_eq!(pct(&events, 10_000, 10_000), 90.0);
    }

    #[test]
    fn test_empty_or_degenerate_window() {
        assert_eq!(pct(&[], 10_000, 10_000), 0.0);
        let events = [ev(1000, EventKind::DeviceOnline)];
        assert_eq!(pct(&events, 0, 10_000), 0.0);
        assert_eq!(pct(&events, -5, 10_000), 0.0);
    }

    #[test]
    fn test_events_before_window_are_ignored() {
        // online at 0 is outside [5000, 15000]; only the offline event counts
        let events = [ev(0, EventKind::DeviceOnline), ev(12_000, EventKind::DeviceOffline)];
        assert_eq!(pct(&events, 10_000, 15_000), 0.0);

        let events = [ev(0, EventKind::DeviceOnline)];
        assert_eq!(pct(&events, 10_000, 15_000), 0.0);
    }

    #[test]
    fn test_non_online_kinds_count_as_offline() {
        let events = [
            ev(0, EventKind::DeviceOnline),
            ev(4000, EventKind::IpChanged),
            ev(6000, EventKind::DeviceOnline),
        ];
        // up 0..4000 and 6000..10000
        assert_eq!(pct(&events, 10_000, 10_000), 80.0);
    }
}
