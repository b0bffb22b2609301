use serde::Serialize;

use super::catalog;
use super::entities::{Planet, PriceMode, PricePoint, PriceSet, Session, System};
use super::market::{build_history, normalize_points, now_millis, DEFAULT_HISTORY_LENGTH, HOUR_MS};

/// Planets per system that count toward the system score.
pub const TOP_PLANETS_PER_SYSTEM: usize = 6;

/// Value of refining one raw material on one planet.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialScore {
    pub raw: String,
    pub processed: String,
    pub abundance: f64,
    pub processed_isk_per_m3: f64,
    /// ISK/m³ weighted by abundance.
    pub value: f64,
    pub history: Vec<PricePoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlanetScore<'a> {
    pub planet: &'a Planet,
    /// `None` when no material yields a positive value.
    pub best: Option<MaterialScore>,
    pub breakdown: Vec<MaterialScore>,
}

impl PlanetScore<'_> {
    pub fn best_value(&self) -> f64 {
        self.best.as_ref().map(|best| best.value).unwrap_or(0.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemRanking<'a> {
    pub system: &'a System,
    /// Best planet first.
    pub planet_scores: Vec<PlanetScore<'a>>,
    pub score: f64,
    pub top_planet_score: f64,
}

fn usable(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}

fn clamp_abundance(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub fn calculate_planet_best<'a>(planet: &'a Planet, prices: &PriceSet) -> PlanetScore<'a> {
    calculate_planet_best_at(planet, prices, now_millis())
}

/// Scores every raw material on `planet`; only the single best one counts.
///
/// `now` is used only to date charting history for materials without any.
pub fn calculate_planet_best_at<'a>(
    planet: &'a Planet,
    prices: &PriceSet,
    now: i64,
) -> PlanetScore<'a> {
    let candidates: Vec<&str> = match catalog::planet_type(&planet.kind) {
        Some(kind) => kind.raw_materials.to_vec(),
        None => planet.densities.keys().map(String::as_str).collect(),
    };

    let mut breakdown = Vec::with_capacity(candidates.len());
    let mut best: Option<MaterialScore> = None;

    for raw in candidates {
        let Some(mapping) = catalog::resource_mapping(raw) else {
            continue;
        };
        let meta = catalog::processed_material(mapping.processed);
        let record = prices.get(mapping.processed);
        let default_price = meta.map(|m| m.default_price).unwrap_or(0.0);

        let price = record
            .map(|r| r.price)
            .and_then(usable)
            .unwrap_or(default_price);
        let volume = meta.map(|m| m.volume).and_then(usable).unwrap_or(1.0);
        let processed_isk_per_m3 = price / volume;
        let abundance = clamp_abundance(planet.abundance(raw));
        let value = processed_isk_per_m3 * (abundance / 100.0);

        let history = normalize_points(
            record.map(|r| r.history.as_slice()).unwrap_or(&[]),
            usable(price).unwrap_or(1.0),
            DEFAULT_HISTORY_LENGTH,
            now,
        );

        let entry = MaterialScore {
            raw: raw.to_string(),
            processed: mapping.processed.to_string(),
            abundance,
            processed_isk_per_m3,
            value,
            history,
        };

        let best_so_far = best.as_ref().map(|b| b.value).unwrap_or(0.0);
        if value > best_so_far {
            best = Some(entry.clone());
        }
        breakdown.push(entry);
    }

    PlanetScore {
        planet,
        best,
        breakdown,
    }
}

pub fn rank_systems(session: &Session) -> Vec<SystemRanking<'_>> {
    rank_systems_at(session, now_millis())
}

/// Ranks the session's systems by the summed value of their best planets.
///
/// Sorting is stable at both levels, so equal scores keep insertion order.
pub fn rank_systems_at(session: &Session, now: i64) -> Vec<SystemRanking<'_>> {
    let prices = &session.market.prices;

    let mut rankings: Vec<SystemRanking<'_>> = session
        .systems
        .iter()
        .map(|system| {
            let mut planet_scores: Vec<PlanetScore<'_>> = system
                .planets
                .iter()
                .map(|planet| calculate_planet_best_at(planet, prices, now))
                .collect();
            planet_scores.sort_by(|a, b| b.best_value().total_cmp(&a.best_value()));

            let score = planet_scores
                .iter()
                .take(TOP_PLANETS_PER_SYSTEM)
                .map(PlanetScore::best_value)
                .sum();
            let top_planet_score = planet_scores
                .first()
                .map(PlanetScore::best_value)
                .unwrap_or(0.0);

            SystemRanking {
                system,
                planet_scores,
                score,
                top_planet_score,
            }
        })
        .collect();

    rankings.sort_by(|a, b| b.score.total_cmp(&a.score));
    rankings
}

/// Everything the material view shows for one processed material.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialDetail {
    pub name: String,
    pub price_mode: PriceMode,
    /// Price under the session's price mode.
    pub price: f64,
    pub buy: f64,
    pub sell: f64,
    pub volume: f64,
    pub isk_per_m3: f64,
    pub source_raw: Option<String>,
    pub raw_per_batch: u32,
    pub processed_per_batch: u32,
    pub history: Vec<PricePoint>,
}

pub fn material_detail(name: &str, session: &Session) -> Option<MaterialDetail> {
    let meta = catalog::processed_material(name)?;
    let record = session.market.prices.get(name);
    let mode = session.settings.price_mode;

    let moded = match mode {
        PriceMode::Buy => record.and_then(|r| r.buy),
        PriceMode::Sell => record.and_then(|r| r.sell),
    };
    let price = moded
        .or_else(|| record.map(|r| r.price))
        .unwrap_or(meta.default_price);
    let buy = record.and_then(|r| r.buy).unwrap_or(price);
    let sell = record.and_then(|r| r.sell).unwrap_or(price);
    let volume = usable(meta.volume).unwrap_or(1.0);

    let history = match record {
        Some(r) if !r.history.is_empty() => r.history.clone(),
        _ if !meta.sample_history.is_empty() => {
            let now = now_millis();
            let len = meta.sample_history.len() as i64;
            meta.sample_history
                .iter()
                .enumerate()
                .map(|(idx, price)| PricePoint::new(now - (len - idx as i64) * HOUR_MS, *price))
                .collect()
        }
        _ => build_history(price, DEFAULT_HISTORY_LENGTH),
    };

    let source = catalog::source_of(name);

    Some(MaterialDetail {
        name: meta.name.to_string(),
        price_mode: mode,
        price,
        buy,
        sell,
        volume,
        isk_per_m3: price / volume,
        source_raw: source.map(|m| m.raw.to_string()),
        raw_per_batch: source.map(|m| m.raw_per_batch).unwrap_or(0),
        processed_per_batch: source.map(|m| m.processed_per_batch).unwrap_or(0),
        history,
    })
}

/// Market context for a planet's best material.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlanetDetail {
    pub buy: Option<f64>,
    pub sell: Option<f64>,
    pub history: Vec<PricePoint>,
}

pub fn planet_detail(score: &PlanetScore<'_>, session: &Session) -> PlanetDetail {
    let Some(best) = score.best.as_ref() else {
        return PlanetDetail {
            buy: None,
            sell: None,
            history: Vec::new(),
        };
    };

    let record = session.market.prices.get(&best.processed);
    let history = match record {
        Some(r) if !r.history.is_empty() => r.history.clone(),
        _ => best.history.clone(),
    };

    PlanetDetail {
        buy: record.and_then(|r| r.buy),
        sell: record.and_then(|r| r.sell),
        history,
    }
}
