pub mod heikin_ashi;
pub mod regression;
pub mod tick_bar;
pub mod time_bar;

use chrono_tz::Tz;

use crate::domain::candle::Candle;
use crate::domain::interval::Interval;
use crate::domain::tick::Tick;

pub use tick_bar::TickBarResampler;
pub use time_bar::TimeBarResampler;

/// The two Resampler variants behind one uniform interface
/// (`spec.md` §9 "two Resampler variants sharing a method name" design
/// note — modeled here as a sum type rather than duck typing).
#[derive(Debug, Clone)]
pub enum Resampler {
    Tick(TickBarResampler),
    Time(TimeBarResampler),
}

impl Resampler {
    pub fn new(interval: Interval, zone: Tz) -> Self {
        match interval {
            Interval::TickInterval(n) => Resampler::Tick(TickBarResampler::new(n, zone)),
            Interval::TimeInterval(d) => Resampler::Time(TimeBarResampler::new(d.as_secs_f64(), zone)),
        }
    }

    pub fn add(&mut self, tick: &Tick) -> (Option<Candle>, Option<Candle>) {
        match self {
            Resampler::Tick(r) => r.add(tick),
            Resampler::Time(r) => r.add(tick),
        }
    }

    pub fn current(&self) -> Option<Candle> {
        match self {
            Resampler::Tick(r) => r.current(),
            Resampler::Time(r) => r.current(),
        }
    }
}

/// Folds a full tick backfill through a fresh Resampler in chunks,
/// cooperatively yielding between chunks (`spec.md` §4.5 step 3c, §5).
/// Returns the completed bars in emission order plus the trailing partial
/// bar, if any.
pub async fn resample_backfill(interval: Interval, zone: Tz, ticks: &[Tick]) -> Vec<Candle> {
    const CHUNK: usize = 25_000;
    let mut resampler = Resampler::new(interval, zone);
    let mut bars = Vec::new();

    for (i, tick) in ticks.iter().enumerate() {
        let (completed, _current) = resampler.add(tick);
        if let Some(bar) = completed {
            bars.push(bar);
        }
        if i % CHUNK == CHUNK - 1 {
            tokio::task::yield_now().await;
        }
    }

    // `current()` is `None` precisely when no partial bar remains (a tick
    // count resampler resets to `None` on the tick that closes a bar); a
    // zero-volume partial from a real zero-volume tick is still a partial
    // bar and must be included (`spec.md` §4.5 step 3d, matching
    // `Port8003.py`'s unconditional `if resampler.current_bar: ...append`).
    if let Some(partial) = resampler.current() {
        bars.push(partial);
    }

    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backfill_yields_completed_bars_plus_trailing_partial() {
        let ticks: Vec<Tick> = (0..10)
            .map(|i| Tick { price: 100.0 + i as f64, volume: 1, timestamp: i as f64 })
            .collect();
        let bars = resample_backfill(Interval::TickInterval(3), chrono_tz::UTC, &ticks).await;
        // 10 ticks at n=3: 3 completed bars + 1 trailing partial of 1 tick.
        assert_eq!(bars.len(), 4);
        assert_eq!(bars.last().unwrap().volume, 1);
    }

    /// A trailing partial bar is "non-empty" because a tick was folded into
    /// it, not because its accumulated volume is positive — volume 0 is a
    /// valid per-tick value (`spec.md` §3). A zero-volume final tick after
    /// an earlier completed bar must still surface its own partial bar.
    #[tokio::test]
    async fn trailing_partial_with_zero_volume_is_still_included() {
        let ticks = vec![
            Tick { price: 100.0, volume: 1, timestamp: 0.0 },
            Tick { price: 101.0, volume: 1, timestamp: 1.0 },
            Tick { price: 102.0, volume: 1, timestamp: 2.0 },
            Tick { price: 103.0, volume: 0, timestamp: 3.0 },
        ];
        let bars = resample_backfill(Interval::TickInterval(3), chrono_tz::UTC, &ticks).await;
        assert_eq!(bars.len(), 2, "one completed 3-tick bar plus the zero-volume trailing partial");
        let trailing = bars.last().unwrap();
        assert_eq!(trailing.volume, 0);
        assert_eq!(trailing.open, 103.0);
    }
}
