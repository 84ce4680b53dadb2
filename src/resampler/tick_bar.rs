use chrono_tz::Tz;

use crate::domain::candle::Candle;
use crate::domain::tick::Tick;
use crate::domain::timezone::display_local;

/// Accumulates a fixed count of ticks into one bar (`spec.md` §4.1,
/// `TickBarResampler`). On the tick that completes a bar, `current` resets
/// to `None` (`examples/original_source/Microservices/Port8003.py:113-114`)
/// and stays `None` until the next bar's first tick arrives.
#[derive(Debug, Clone)]
pub struct TickBarResampler {
    n: u32,
    zone: Tz,
    current: Option<Candle>,
    count: u32,
    last_completed_ts: Option<f64>,
}

impl TickBarResampler {
    pub fn new(n: u32, zone: Tz) -> Self {
        Self {
            n,
            zone,
            current: None,
            count: 0,
            last_completed_ts: None,
        }
    }

    pub fn current(&self) -> Option<Candle> {
        self.current
    }

    /// Folds one tick in, returning the newly completed bar (if this tick
    /// closed one) and the resulting current bar, `None` on that same tick
    /// since `current` was just reset. The first tick of the *next* bar
    /// sets that bar's timestamp; it is never updated again after
    /// initialization (`spec.md` §4.1).
    pub fn add(&mut self, tick: &Tick) -> (Option<Candle>, Option<Candle>) {
        let mut ts = display_local(tick.timestamp, self.zone);
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
                self.count = 1;
            }
            Some(bar) => {
                bar.fold_tick(tick.price, tick.volume);
                self.count += 1;
            }
        }

        if self.count == self.n {
            let completed = self.current.take().expect("current set above");
            self.last_completed_ts = Some(completed.unix_timestamp);
            self.count = 0;
            (Some(completed), None)
        } else {
            (None, self.current)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(price: f64, volume: i64, timestamp: f64) -> Tick {
        Tick { price, volume, timestamp }
    }

    #[test]
    fn scenario_1_tick_resampler_at_n3() {
        let mut r = TickBarResampler::new(3, chrono_tz::UTC);
        let t0 = 1_700_000_000.0;
        let (c1, cur1) = r.add(&t(100.0, 1, t0));
        assert!(c1.is_none());
        assert_eq!(cur1.unwrap().open, 100.0);

        let (c2, _) = r.add(&t(101.0, 2, t0 + 1.0));
        assert!(c2.is_none());

        let (c3, cur3) = r.add(&t(99.0, 1, t0 + 2.0));
        let bar = c3.expect("the third tick closes the n=3 bar");
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 101.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 99.0);
        assert_eq!(bar.volume, 4);
        assert_eq!(bar.unix_timestamp, t0);
        assert!(cur3.is_none(), "current resets to null on the tick that closes the bar");

        let (c4, cur4) = r.add(&t(102.0, 3, t0 + 3.0));
        assert!(c4.is_none(), "the fourth tick starts a fresh bar rather than completing one");
        let cur4 = cur4.expect("fourth tick starts the next bar");
        assert_eq!(cur4.open, 102.0);
        assert_eq!(cur4.high, 102.0);
        assert_eq!(cur4.low, 102.0);
        assert_eq!(cur4.close, 102.0);
        assert_eq!(cur4.volume, 3);
    }

    #[test]
    fn tick_count_partitions_k_times_n_plus_r() {
        let n = 3u32;
        let mut r = TickBarResampler::new(n, chrono_tz::UTC);
        let mut completed_count = 0u32;
        let total = 10u32; // k=3, r=1
        for i in 0..total {
            let (completed, _) = r.add(&t(100.0 + i as f64, 1, 1_700_000_000.0 + i as f64));
            if completed.is_some() {
                completed_count += 1;
            }
        }
        assert_eq!(completed_count, total / n);
        assert_eq!(r.count, total % n);
    }

    #[test]
    fn monotonic_timestamps_bump_on_collision() {
        let mut r = TickBarResampler::new(1, chrono_tz::UTC);
        let (b1, _) = r.add(&t(1.0, 1, 100.0));
        let (b2, _) = r.add(&t(2.0, 1, 100.0));
        let ts1 = b1.unwrap().unix_timestamp;
        let ts2 = b2.unwrap().unix_timestamp;
        assert!(ts2 > ts1);
        assert!((ts2 - ts1 - 1e-6).abs() < 1e-9);
    }
}
