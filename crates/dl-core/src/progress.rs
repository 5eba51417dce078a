//! Computes elapsed time, downloaded bytes, percentage, speed, and ETA on
//! each tick.

use crate::record::Record;

const SPEED_EPSILON: u64 = 1;

/// Inputs for one accounting tick beyond what's already on the `Record`.
pub struct Tick {
    /// Tick period in milliseconds.
    pub period_ms: i64,
    /// Current total downloaded bytes, summed from either the
    /// actively-written range segments or the extractor's `.part` staging
    /// files.
    pub downloaded_byte: u64,
    pub now_ms: i64,
}

/// Apply one tick of progress accounting to `record`.
pub fn apply_tick(record: &mut Record, tick: Tick) {
    if !record.is_waiting_for_network {
        record.time_spent_in_milli_sec += tick.period_ms;
    }

    let previous = record.downloaded_byte;
    record.downloaded_byte = tick.downloaded_byte;

    if record.is_unknown_file_size {
        record.file_size = record.downloaded_byte as i64;
    }

    if record.file_size > 0 {
        let pct = (record.downloaded_byte as f64 / record.file_size as f64 * 100.0)
            .clamp(0.0, 100.0) as u8;
        record.progress_percentage = pct;
    }

    let delta = record.downloaded_byte.saturating_sub(previous);
    if tick.period_ms > 0 {
        record.realtime_speed = (delta as f64 * 1000.0 / tick.period_ms as f64) as u64;
    }

    if record.average_speed == 0 {
        record.average_speed = record.realtime_speed;
    } else {
        // Cumulative mean biased toward the lifetime of the task; cheap to
        // compute incrementally and good enough for display purposes.
        record.average_speed = (record.average_speed + record.realtime_speed) / 2;
    }
    record.max_speed = record.max_speed.max(record.realtime_speed);

    if record.file_size > 0 {
        let remaining_bytes = (record.file_size as u64).saturating_sub(record.downloaded_byte);
        let speed = record.realtime_speed.max(SPEED_EPSILON);
        record.remaining_time_in_sec = (remaining_bytes / speed) as i64;
    }

    record.touch(tick.now_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;

    fn record() -> Record {
        let mut r = Record::new(
            1,
            "https://example.com/a".into(),
            EngineSettings::default().snapshot(),
            0,
        );
        r.file_size = 1000;
        r
    }

    #[test]
    fn percentage_and_speed_update() {
        let mut r = record();
        apply_tick(
            &mut r,
            Tick {
                period_ms: 500,
                downloaded_byte: 500,
                now_ms: 500,
            },
        );
        assert_eq!(r.progress_percentage, 50);
        assert_eq!(r.realtime_speed, 1000);
        assert_eq!(r.last_modified_time_date, 500);
    }

    #[test]
    fn time_spent_frozen_while_waiting_for_network() {
        let mut r = record();
        r.is_waiting_for_network = true;
        apply_tick(
            &mut r,
            Tick {
                period_ms: 500,
                downloaded_byte: 0,
                now_ms: 500,
            },
        );
        assert_eq!(r.time_spent_in_milli_sec, 0);
    }

    #[test]
    fn unknown_file_size_tracks_downloaded_bytes() {
        let mut r = record();
        r.is_unknown_file_size = true;
        r.file_size = -1;
        apply_tick(
            &mut r,
            Tick {
                period_ms: 500,
                downloaded_byte: 250,
                now_ms: 500,
            },
        );
        assert_eq!(r.file_size, 250);
    }

    #[test]
    fn max_speed_tracks_running_max() {
        let mut r = record();
        apply_tick(
            &mut r,
            Tick {
                period_ms: 500,
                downloaded_byte: 500,
                now_ms: 500,
            },
        );
        apply_tick(
            &mut r,
            Tick {
                period_ms: 500,
                downloaded_byte: 500,
                now_ms: 1000,
            },
        );
        assert_eq!(r.max_speed, 1000);
    }
}
