use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::catalog;

/// One observed price, `ts` in epoch milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ts: i64,
    pub price: f64,
}

impl PricePoint {
    pub fn new(ts: i64, price: f64) -> Self {
        Self { ts, price }
    }
}

/// History entry as delivered by a feed or an older saved state.
///
/// Feeds are inconsistent: some send dated points, some only bare prices,
/// occasionally as strings. Only the normalizer looks at this type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistorySample {
    Point(PricePoint),
    Price(f64),
    Text(String),
}

impl From<PricePoint> for HistorySample {
    fn from(point: PricePoint) -> Self {
        HistorySample::Point(point)
    }
}

impl From<f64> for HistorySample {
    fn from(price: f64) -> Self {
        HistorySample::Price(price)
    }
}

/// Canonical price data for one processed material.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell: Option<f64>,
    /// Oldest first.
    #[serde(default)]
    pub history: Vec<PricePoint>,
}

/// Processed material name -> canonical record.
pub type PriceSet = BTreeMap<String, PriceRecord>;

/// Partial price data for one material, exactly as a feed produced it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomingPrice {
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub buy: Option<f64>,
    #[serde(default)]
    pub sell: Option<f64>,
    #[serde(default)]
    pub history: Vec<HistorySample>,
}

/// A feed may omit any material.
pub type IncomingPriceSet = BTreeMap<String, IncomingPrice>;

impl From<PriceRecord> for IncomingPrice {
    fn from(record: PriceRecord) -> Self {
        Self {
            price: Some(record.price),
            buy: record.buy,
            sell: record.sell,
            history: record.history.into_iter().map(HistorySample::from).collect(),
        }
    }
}

pub fn into_incoming(prices: PriceSet) -> IncomingPriceSet {
    prices
        .into_iter()
        .map(|(name, record)| (name, IncomingPrice::from(record)))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Planet {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw material name -> abundance percentage.
    #[serde(default)]
    pub densities: BTreeMap<String, f64>,
}

impl Planet {
    /// Builds a planet whose densities cover exactly the raw materials of its
    /// type, taking values from `entered` and defaulting the rest to 0.
    pub fn with_type_defaults(
        id: String,
        name: String,
        kind: String,
        entered: &BTreeMap<String, f64>,
    ) -> Self {
        let densities = match catalog::planet_type(&kind) {
            Some(planet_type) => planet_type
                .raw_materials
                .iter()
                .map(|raw| (raw.to_string(), entered.get(*raw).copied().unwrap_or(0.0)))
                .collect(),
            None => entered.clone(),
        };
        Self {
            id,
            name,
            kind,
            densities,
        }
    }

    pub fn abundance(&self, raw: &str) -> f64 {
        self.densities.get(raw).copied().unwrap_or(0.0)
    }

    /// Checks done at the builder boundary before a planet reaches the store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::BlankName);
        }
        if catalog::planet_type(&self.kind).is_none() {
            return Err(ValidationError::UnknownPlanetType(self.kind.clone()));
        }
        for (raw, value) in &self.densities {
            if !value.is_finite() || !(0.0..=100.0).contains(value) {
                return Err(ValidationError::AbundanceOutOfRange {
                    material: raw.clone(),
                    value: *value,
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub planets: Vec<Planet>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceMode {
    Buy,
    #[default]
    Sell,
}

impl PriceMode {
    pub fn label(&self) -> &'static str {
        match self {
            PriceMode::Buy => "Buy",
            PriceMode::Sell => "Sell",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    #[serde(default)]
    pub price_mode: PriceMode,
    /// Stored for the results view; ranking always sums the top six.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_n: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketState {
    #[serde(default)]
    pub prices: PriceSet,
    /// RFC 3339 time of the last successful live fetch.
    #[serde(default)]
    pub last_fetched: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub systems: Vec<System>,
    #[serde(default)]
    pub settings: SessionSettings,
    #[serde(default = "default_hub")]
    pub market_hub: String,
    #[serde(default)]
    pub market: MarketState,
}

fn default_hub() -> String {
    catalog::DEFAULT_HUB_ID.to_string()
}

impl Session {
    pub fn new(id: String, name: String, created_at: String, prices: PriceSet) -> Self {
        Self {
            id,
            name,
            updated_at: created_at.clone(),
            created_at,
            systems: Vec::new(),
            settings: SessionSettings::default(),
            market_hub: default_hub(),
            market: MarketState {
                prices,
                last_fetched: None,
                hub: None,
            },
        }
    }

    pub fn system(&self, system_id: &str) -> Option<&System> {
        self.systems.iter().find(|s| s.id == system_id)
    }

    pub fn system_mut(&mut self, system_id: &str) -> Option<&mut System> {
        self.systems.iter_mut().find(|s| s.id == system_id)
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ValidationError {
    #[error("name must not be blank")]
    BlankName,
    #[error("unknown planet type: {0}")]
    UnknownPlanetType(String),
    #[error("abundance for {material} must be within 0..=100, got {value}")]
    AbundanceOutOfRange { material: String, value: f64 },
}
