//! Price normalization, merging and the synthetic market.
//!
//! All functions here are pure given an explicit `now`; the plain variants
//! read the wall clock and delegate to the `_at` variants.

use rand::Rng;
use time::OffsetDateTime;

use super::catalog;
use super::entities::{HistorySample, IncomingPriceSet, PricePoint, PriceRecord, PriceSet};

/// Points kept per material by a refresh.
pub const DEFAULT_WINDOW_SIZE: usize = 20;
/// Length of histories fabricated for charting.
pub const DEFAULT_HISTORY_LENGTH: usize = 12;
/// Spacing of fabricated history points.
pub const HOUR_MS: i64 = 3_600_000;

const SYNTHETIC_JITTER: f64 = 0.1;
const SYNTHETIC_BUY_RATIO: f64 = 0.95;
const WALK_STEP: f64 = 0.05;
const WALK_FLOOR: f64 = 0.6;
const WALK_CEILING: f64 = 1.4;

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn usable(price: f64) -> Option<f64> {
    (price.is_finite() && price > 0.0).then_some(price)
}

/// Timestamp of slot `idx` in a series of `len` hourly points that ends one
/// hour before `now`.
fn hourly_slot(now: i64, len: usize, idx: usize) -> i64 {
    now - (len as i64 - idx as i64) * HOUR_MS
}

/// Converts whatever history a feed delivered into canonical points.
///
/// Dated points pass through untouched; bare prices get hourly timestamps
/// ending one hour before `now`. An empty input yields `target_len` flat
/// points at `fallback_price`.
pub fn normalize_history(
    raw: &[HistorySample],
    fallback_price: f64,
    target_len: usize,
    now: i64,
) -> Vec<PricePoint> {
    let fallback = usable(fallback_price).unwrap_or(1.0);
    if raw.is_empty() {
        return build_flat_history_at(fallback, target_len, now);
    }

    let len = raw.len();
    raw.iter()
        .enumerate()
        .map(|(idx, sample)| match sample {
            HistorySample::Point(point) => *point,
            HistorySample::Price(price) => {
                PricePoint::new(hourly_slot(now, len, idx), usable(*price).unwrap_or(fallback))
            }
            HistorySample::Text(text) => {
                let price = text
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(usable)
                    .unwrap_or(fallback);
                PricePoint::new(hourly_slot(now, len, idx), price)
            }
        })
        .collect()
}

/// Same contract as [`normalize_history`] for data that is already canonical.
pub fn normalize_points(
    points: &[PricePoint],
    fallback_price: f64,
    target_len: usize,
    now: i64,
) -> Vec<PricePoint> {
    if points.is_empty() {
        build_flat_history_at(usable(fallback_price).unwrap_or(1.0), target_len, now)
    } else {
        points.to_vec()
    }
}

pub fn merge_prices(existing: &PriceSet, incoming: &IncomingPriceSet, window: usize) -> PriceSet {
    merge_prices_at(existing, incoming, window, now_millis())
}

/// Folds a freshly fetched price set into the stored one.
///
/// The result holds every catalog material regardless of what either input
/// contains. The normalized incoming history is the base, so a material the
/// feed sent without history restarts from a flat series at the resolved
/// price; callers that want to keep a stored series pass it back in. Each
/// material gains exactly one point stamped `now`, so a single logical refresh
/// must call this once.
pub fn merge_prices_at(
    existing: &PriceSet,
    incoming: &IncomingPriceSet,
    window: usize,
    now: i64,
) -> PriceSet {
    let window = window.max(1);

    catalog::PROCESSED_MATERIALS
        .iter()
        .map(|meta| {
            let old = existing.get(meta.name);
            let inc = incoming.get(meta.name);

            let old_price = old.map(|record| record.price).and_then(usable);
            let price = inc
                .and_then(|entry| entry.price)
                .and_then(usable)
                .or(old_price)
                .unwrap_or(meta.default_price)
                .round()
                .max(1.0);

            let samples = inc.map(|entry| entry.history.as_slice()).unwrap_or(&[]);
            let incoming_history = normalize_history(samples, price, window, now);
            let mut history = if incoming_history.is_empty() {
                normalize_points(
                    old.map(|record| record.history.as_slice()).unwrap_or(&[]),
                    old_price.unwrap_or(meta.default_price),
                    window,
                    now,
                )
            } else {
                incoming_history
            };

            let keep = window.max(history.len() + 1);
            let newest = history.iter().map(|point| point.ts).max().unwrap_or(now);
            history.push(PricePoint::new(now.max(newest), price));

            if history.len() > keep {
                history.drain(..history.len() - keep);
            }

            let buy = inc
                .and_then(|entry| entry.buy)
                .and_then(usable)
                .or_else(|| old.and_then(|record| record.buy));
            let sell = inc
                .and_then(|entry| entry.sell)
                .and_then(usable)
                .or_else(|| old.and_then(|record| record.sell));

            (
                meta.name.to_string(),
                PriceRecord {
                    price,
                    buy,
                    sell,
                    history,
                },
            )
        })
        .collect()
}

pub fn build_flat_history(price: f64, len: usize) -> Vec<PricePoint> {
    build_flat_history_at(price, len, now_millis())
}

pub fn build_flat_history_at(price: f64, len: usize, now: i64) -> Vec<PricePoint> {
    let value = price.round();
    (0..len)
        .map(|idx| PricePoint::new(hourly_slot(now, len, idx), value))
        .collect()
}

pub fn build_history(anchor: f64, len: usize) -> Vec<PricePoint> {
    build_history_with(&mut rand::thread_rng(), anchor, len, now_millis())
}

/// Bounded random walk around `anchor`, hourly points ending before `now`.
pub fn build_history_with<R: Rng + ?Sized>(
    rng: &mut R,
    anchor: f64,
    len: usize,
    now: i64,
) -> Vec<PricePoint> {
    let base = usable(anchor).unwrap_or(1.0);
    let mut current = base;
    (0..len)
        .map(|idx| {
            let step = (rng.gen::<f64>() - 0.5) * base * WALK_STEP;
            current = (current + step).clamp(base * WALK_FLOOR, base * WALK_CEILING);
            PricePoint::new(hourly_slot(now, len, idx), current.round())
        })
        .collect()
}

pub fn build_synthetic_market() -> PriceSet {
    build_synthetic_market_with(&mut rand::thread_rng(), now_millis())
}

/// Plausible prices for every catalog material: defaults with up to ±5 %
/// jitter and a random-walk history.
pub fn build_synthetic_market_with<R: Rng + ?Sized>(rng: &mut R, now: i64) -> PriceSet {
    catalog::PROCESSED_MATERIALS
        .iter()
        .map(|meta| {
            let jitter = 1.0 + (rng.gen::<f64>() - 0.5) * SYNTHETIC_JITTER;
            let price = (meta.default_price * jitter).round();
            let history = build_history_with(rng, price, DEFAULT_HISTORY_LENGTH, now);
            (
                meta.name.to_string(),
                PriceRecord {
                    price,
                    buy: Some((price * SYNTHETIC_BUY_RATIO).round()),
                    sell: Some(price),
                    history,
                },
            )
        })
        .collect()
}
