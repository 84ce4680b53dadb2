use crate::domain::candle::{Candle, HeikinAshiCandle};

/// Applies the HA recurrence one tick's worth of `(completed, current)` bars
/// at a time, the way the live raw→HA WebSocket route needs it (`spec.md`
/// §6 `/ws-ha/live/...`). `current` is transformed against the persisted
/// seed without ever being folded into it — only a *completed* bar advances
/// the recurrence, matching `current_bar` being a still-forming candle.
#[derive(Debug, Clone, Default)]
pub struct HaIncremental {
    seed: Option<HeikinAshiCandle>,
}

impl HaIncremental {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the recurrence from the final HA candle of a backfill
    /// (`spec.md` §4.2 pagination contract — the live stream picks up
    /// exactly where the backfill's HA series left off).
    pub fn seed_from(seed: Option<HeikinAshiCandle>) -> Self {
        Self { seed }
    }

    /// `current: None` passes straight through as `current_ha: None`
    /// without touching the seed — the tick that completes a tick-count
    /// bar has no forming current bar to display (`spec.md` §4.1).
    pub fn step(&mut self, completed: Option<Candle>, current: Option<Candle>) -> (Option<HeikinAshiCandle>, Option<HeikinAshiCandle>) {
        let completed_ha = completed.map(|bar| {
            let ha = transform(std::slice::from_ref(&bar), self.seed.as_ref());
            let ha = ha.into_iter().next().expect("one input candle yields one HA candle");
            self.seed = Some(ha);
            ha
        });
        let current_ha = current.map(|bar| {
            transform(std::slice::from_ref(&bar), self.seed.as_ref())
                .into_iter()
                .next()
                .expect("one input candle yields one HA candle")
        });
        (completed_ha, current_ha)
    }
}

/// Converts a contiguous run of regular OHLC candles into Heikin-Ashi
/// candles (`spec.md` §4.2). `seed` is the final HA candle of the
/// preceding page, if any; passing it makes a paginated HA stream
/// bit-identical to a single-shot computation over the concatenated
/// regular series (the pagination contract, tested below).
pub fn transform(regular: &[Candle], seed: Option<&HeikinAshiCandle>) -> Vec<HeikinAshiCandle> {
    let mut out = Vec::with_capacity(regular.len());
    let mut prev_ha_open;
    let mut prev_ha_close;

    let mut iter = regular.iter();
    let first = match iter.next() {
        Some(r) => r,
        None => return out,
    };

    let ha_close0 = (first.open + first.high + first.low + first.close) / 4.0;
    let ha_open0 = match seed {
        Some(s) => (s.open + s.close) / 2.0,
        None => (first.open + first.close) / 2.0,
    };
    let ha_high0 = first.high.max(ha_open0).max(ha_close0);
    let ha_low0 = first.low.min(ha_open0).min(ha_close0);
    out.push(HeikinAshiCandle {
        open: ha_open0,
        high: ha_high0,
        low: ha_low0,
        close: ha_close0,
        volume: first.volume,
        unix_timestamp: first.unix_timestamp,
        regular_open: first.open,
        regular_close: first.close,
    });
    prev_ha_open = ha_open0;
    prev_ha_close = ha_close0;

    for r in iter {
        let ha_close = (r.open + r.high + r.low + r.close) / 4.0;
        let ha_open = (prev_ha_open + prev_ha_close) / 2.0;
        let ha_high = r.high.max(ha_open).max(ha_close);
        let ha_low = r.low.min(ha_open).min(ha_close);
        out.push(HeikinAshiCandle {
            open: ha_open,
            high: ha_high,
            low: ha_low,
            close: ha_close,
            volume: r.volume,
            unix_timestamp: r.unix_timestamp,
            regular_open: r.open,
            regular_close: r.close,
        });
        prev_ha_open = ha_open;
        prev_ha_close = ha_close;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(o: f64, h: f64, l: f64, c: f64, ts: f64) -> Candle {
        Candle { open: o, high: h, low: l, close: c, volume: 1, unix_timestamp: ts }
    }

    #[test]
    fn scenario_3_ha_seed() {
        let regular = vec![candle(10.0, 12.0, 9.0, 11.0, 0.0), candle(11.0, 13.0, 10.0, 12.0, 60.0)];
        let ha = transform(&regular, None);
        assert_eq!(ha.len(), 2);

        assert_eq!(ha[0].open, 10.5);
        assert_eq!(ha[0].close, 10.5);
        assert_eq!(ha[0].high, 12.0);
        assert_eq!(ha[0].low, 9.0);
        assert_eq!(ha[0].regular_open, 10.0);
        assert_eq!(ha[0].regular_close, 11.0);

        assert_eq!(ha[1].open, 10.5);
        assert_eq!(ha[1].close, 11.5);
        assert_eq!(ha[1].high, 13.0);
        assert_eq!(ha[1].low, 10.0);
        assert_eq!(ha[1].regular_open, 11.0);
        assert_eq!(ha[1].regular_close, 12.0);
    }

    #[test]
    fn pagination_is_idempotent_with_full_series() {
        let full = vec![
            candle(10.0, 12.0, 9.0, 11.0, 0.0),
            candle(11.0, 13.0, 10.0, 12.0, 60.0),
            candle(12.0, 14.0, 11.0, 13.0, 120.0),
            candle(13.0, 15.0, 12.0, 14.0, 180.0),
        ];
        let whole = transform(&full, None);

        let prefix = transform(&full[..2], None);
        let suffix = transform(&full[2..], Some(prefix.last().unwrap()));

        let mut paginated = prefix;
        paginated.extend(suffix);

        assert_eq!(paginated.len(), whole.len());
        for (p, w) in paginated.iter().zip(whole.iter()) {
            assert!((p.open - w.open).abs() < 1e-9);
            assert!((p.close - w.close).abs() < 1e-9);
            assert!((p.high - w.high).abs() < 1e-9);
            assert!((p.low - w.low).abs() < 1e-9);
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(transform(&[], None).is_empty());
    }

    #[test]
    fn incremental_step_matches_batch_transform() {
        let batch = vec![
            candle(10.0, 12.0, 9.0, 11.0, 0.0),
            candle(11.0, 13.0, 10.0, 12.0, 60.0),
            candle(12.0, 14.0, 11.0, 13.0, 120.0),
        ];
        let whole = transform(&batch, None);

        let mut incremental = HaIncremental::new();
        let (ha0, cur0) = incremental.step(Some(batch[0]), Some(batch[0]));
        assert_eq!(ha0.unwrap(), whole[0]);
        assert_eq!(cur0.unwrap(), whole[0]);

        let (ha1, _) = incremental.step(Some(batch[1]), Some(batch[1]));
        assert_eq!(ha1.unwrap(), whole[1]);

        let (ha2, _) = incremental.step(Some(batch[2]), Some(batch[2]));
        assert_eq!(ha2.unwrap(), whole[2]);
    }

    #[test]
    fn current_bar_does_not_advance_the_recurrence() {
        let c0 = candle(10.0, 12.0, 9.0, 11.0, 0.0);
        let c1 = candle(11.0, 13.0, 10.0, 12.0, 60.0);
        let mut incremental = HaIncremental::new();
        let (_, _) = incremental.step(Some(c0), Some(c0));

        // Peeking the forming current bar twice must not change its value.
        let (_, peek_a) = incremental.step(None, Some(c1));
        let (_, peek_b) = incremental.step(None, Some(c1));
        assert_eq!(peek_a, peek_b);
    }

    #[test]
    fn current_none_passes_through_without_touching_the_seed() {
        let c0 = candle(10.0, 12.0, 9.0, 11.0, 0.0);
        let mut incremental = HaIncremental::new();
        let (_, cur) = incremental.step(Some(c0), None);
        assert!(cur.is_none());
    }
}
