use chrono_tz::Tz;

use crate::domain::candle::Candle;
use crate::domain::tick::Tick;
use crate::domain::timezone::{display_local, floor_to_boundary};

/// Folds ticks into bars aligned to wall-clock boundaries of `d_seconds`
/// in `zone` (`spec.md` §4.1, `TimeBarResampler`).
#[derive(Debug, Clone)]
pub struct TimeBarResampler {
    d_seconds: f64,
    zone: Tz,
    current: Option<Candle>,
    last_completed_ts: Option<f64>,
}

impl TimeBarResampler {
    pub fn new(d_seconds: f64, zone: Tz) -> Self {
        Self {
            d_seconds,
            zone,
            current: None,
            last_completed_ts: None,
        }
    }

    pub fn current(&self) -> Option<Candle> {
        self.current
    }

    pub fn add(&mut self, tick: &Tick) -> (Option<Candle>, Option<Candle>) {
        // Floor the raw UTC instant to the interval boundary first, then
        // shift that boundary through the display timezone exactly once
        // (`spec.md` §4.1, `domain::timezone::floor_to_boundary`) — flooring
        // an already-shifted value would silently disagree whenever the
        // zone's offset isn't a multiple of the interval.
        let boundary_utc = floor_to_boundary(tick.timestamp, self.d_seconds);
        let mut ts = display_local(boundary_utc, self.zone);
        if let Some(last) = self.last_completed_ts {
            if ts <= last {
                ts = last + 1e-6;
            }
        }

        match &mut self.current {
            None => {
                let mut bar = Candle::first_tick(tick.price, ts);
                bar.volume += tick.volume;
                self.current = Some(bar);
                (None, Some(bar))
            }
            Some(bar) if ts > bar.unix_timestamp => {
                let completed = *bar;
                self.last_completed_ts = Some(completed.unix_timestamp);
                let mut next = Candle::first_tick(tick.price, ts);
                next.volume += tick.volume;
                self.current = Some(next);
                (Some(completed), Some(next))
            }
            Some(bar) => {
                bar.fold_tick(tick.price, tick.volume);
                (None, Some(*bar))
            }
        }
    }
}
