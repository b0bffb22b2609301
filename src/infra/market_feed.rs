//! Market data sources for a refresh.
//!
//! - [`MarketClient`] reads current order-book aggregates for a hub station and
//!   the regional daily history for every processed material.
//! - [`SyntheticFeed`] fabricates a plausible market without touching the
//!   network.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::catalog::{self, MarketHub, ProcessedMaterial};
use crate::domain::entities::{into_incoming, HistorySample, IncomingPrice, IncomingPriceSet, PricePoint};
use crate::domain::market::{build_flat_history, build_synthetic_market};
use crate::util::version::user_agent;

const DEFAULT_AGGREGATES_URL: &str = "https://market.fuzzwork.co.uk/";
const DEFAULT_HISTORY_URL: &str = "https://esi.evetech.net/latest/";
/// Daily history points kept per material.
const HISTORY_DAYS: usize = 60;

#[derive(Debug, Error)]
pub enum MarketFeedError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(String),
}

/// Source of partial price data for a hub. Failures are expected and are
/// handled by the caller with a synthetic fallback.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn fetch_market_data(&self, hub_id: &str) -> Result<IncomingPriceSet, MarketFeedError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticFeed;

#[async_trait]
impl MarketFeed for SyntheticFeed {
    async fn fetch_market_data(&self, hub_id: &str) -> Result<IncomingPriceSet, MarketFeedError> {
        debug!(hub = hub_id, "serving synthetic market");
        Ok(into_incoming(build_synthetic_market()))
    }
}

#[derive(Clone)]
pub struct MarketClient {
    http: Client,
    aggregates_url: Url,
    history_url: Url,
}

impl MarketClient {
    pub fn new() -> Result<Self, MarketFeedError> {
        Self::with_base_urls(DEFAULT_AGGREGATES_URL, DEFAULT_HISTORY_URL)
    }

    pub fn with_base_urls(aggregates: &str, history: &str) -> Result<Self, MarketFeedError> {
        let aggregates_url = Url::parse(aggregates)?;
        let history_url = Url::parse(history)?;
        let http = Client::builder().user_agent(user_agent()).build()?;
        Ok(Self {
            http,
            aggregates_url,
            history_url,
        })
    }

    async fn fetch_aggregates(
        &self,
        hub: &MarketHub,
    ) -> Result<HashMap<String, AggregateDto>, MarketFeedError> {
        let ids = catalog::PROCESSED_MATERIALS
            .iter()
            .map(|meta| meta.type_id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut url = self.aggregates_url.join("aggregates/")?;
        url.query_pairs_mut()
            .append_pair("types", &ids)
            .append_pair("station", &hub.station_id.to_string());

        debug!(%url, hub = hub.id, "requesting market aggregates");
        fetch_json(self.http.get(url)).await
    }

    async fn fetch_history(
        &self,
        hub: &MarketHub,
        meta: &ProcessedMaterial,
    ) -> Result<Vec<PricePoint>, MarketFeedError> {
        let mut url = self
            .history_url
            .join(&format!("markets/{}/history/", hub.region_id))?;
        url.query_pairs_mut()
            .append_pair("type_id", &meta.type_id.to_string());

        let days: Vec<HistoryDayDto> = fetch_json(self.http.get(url)).await?;
        Ok(history_points(days, meta.default_price))
    }

    /// Fetches every material's history concurrently. A failed material gets
    /// an empty history rather than failing the refresh.
    async fn fetch_histories(&self, hub: &'static MarketHub) -> HashMap<&'static str, Vec<PricePoint>> {
        let mut tasks = JoinSet::new();
        for meta in catalog::PROCESSED_MATERIALS {
            let client = self.clone();
            tasks.spawn(async move {
                let history = match client.fetch_history(hub, meta).await {
                    Ok(points) => points,
                    Err(err) => {
                        warn!(material = meta.name, error = %err, "history fetch failed");
                        Vec::new()
                    }
                };
                (meta.name, history)
            });
        }

        let mut histories = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, history)) => {
                    histories.insert(name, history);
                }
                Err(err) => warn!(error = %err, "history task aborted"),
            }
        }
        histories
    }
}

#[async_trait]
impl MarketFeed for MarketClient {
    async fn fetch_market_data(&self, hub_id: &str) -> Result<IncomingPriceSet, MarketFeedError> {
        let hub = catalog::market_hub(hub_id);
        let aggregates = self.fetch_aggregates(hub).await?;
        let histories = self.fetch_histories(hub).await;
        let prices = assemble_prices(&aggregates, &histories);
        debug!(hub = hub.id, materials = prices.len(), "market data assembled");
        Ok(prices)
    }
}

async fn fetch_json<T>(builder: reqwest::RequestBuilder) -> Result<T, MarketFeedError>
where
    T: DeserializeOwned,
{
    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(MarketFeedError::Api(format!("unexpected status {status}")));
    }
    Ok(response.json().await?)
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn assemble_prices(
    aggregates: &HashMap<String, AggregateDto>,
    histories: &HashMap<&'static str, Vec<PricePoint>>,
) -> IncomingPriceSet {
    catalog::PROCESSED_MATERIALS
        .iter()
        .map(|meta| {
            let market = aggregates.get(&meta.type_id.to_string());
            let sell_side = market.and_then(|m| m.sell.as_ref());
            let buy_side = market.and_then(|m| m.buy.as_ref());

            let sell = positive(sell_side.and_then(|s| s.min))
                .or_else(|| positive(sell_side.and_then(|s| s.five_percent)))
                .unwrap_or(meta.default_price);
            let buy = positive(buy_side.and_then(|b| b.max))
                .or_else(|| positive(buy_side.and_then(|b| b.five_percent)))
                .unwrap_or(sell);

            let history = match histories.get(meta.name) {
                Some(points) if !points.is_empty() => points.clone(),
                _ => build_flat_history(sell, HISTORY_DAYS),
            };

            (
                meta.name.to_string(),
                IncomingPrice {
                    price: Some(sell),
                    buy: Some(buy),
                    sell: Some(sell),
                    history: history.into_iter().map(HistorySample::from).collect(),
                },
            )
        })
        .collect()
}

fn history_points(days: Vec<HistoryDayDto>, default_price: f64) -> Vec<PricePoint> {
    let skip = days.len().saturating_sub(HISTORY_DAYS);
    days.into_iter()
        .skip(skip)
        .filter_map(|day| {
            let ts = parse_day_millis(&day.date)?;
            let price = positive(day.average)
                .or(positive(day.lowest))
                .or(positive(day.highest))
                .unwrap_or(default_price)
                .round();
            (price > 0.0).then_some(PricePoint::new(ts, price))
        })
        .collect()
}

fn parse_day_millis(date: &str) -> Option<i64> {
    OffsetDateTime::parse(&format!("{date}T00:00:00Z"), &Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp() * 1000)
}

#[derive(Debug, Default, Deserialize)]
struct AggregateDto {
    #[serde(default)]
    buy: Option<OrderSideDto>,
    #[serde(default)]
    sell: Option<OrderSideDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderSideDto {
    #[serde(default, deserialize_with = "lenient_f64")]
    min: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    max: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    five_percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HistoryDayDto {
    date: String,
    #[serde(default)]
    average: Option<f64>,
    #[serde(default)]
    highest: Option<f64>,
    #[serde(default)]
    lowest: Option<f64>,
}

/// Aggregates arrive with numbers quoted as strings; accept either.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct NumberOrString;

    impl<'de> serde::de::Visitor<'de> for NumberOrString {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number, numeric string or null")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.trim().parse::<f64>().ok())
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(NumberOrString)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_accept_quoted_numbers() {
        let raw = r#"{
            "2392": {
                "buy": {"max": "498.50", "fivePercent": "490"},
                "sell": {"min": "531.2", "fivePercent": 540}
            },
            "3645": {
                "buy": {"max": null, "fivePercent": "101"},
                "sell": {"min": "0", "fivePercent": "118"}
            }
        }"#;
        let aggregates: HashMap<String, AggregateDto> = serde_json::from_str(raw).expect("parse");
        let prices = assemble_prices(&aggregates, &HashMap::new());

        let metals = &prices["Precious Metals"];
        assert_eq!(metals.sell, Some(531.2));
        assert_eq!(metals.buy, Some(498.5));
        assert_eq!(metals.history.len(), HISTORY_DAYS);

        let water = &prices["Water"];
        assert_eq!(water.sell, Some(118.0));
        assert_eq!(water.buy, Some(101.0));
    }

    #[test]
    fn materials_missing_from_aggregates_use_defaults() {
        let prices = assemble_prices(&HashMap::new(), &HashMap::new());

        assert_eq!(prices.len(), catalog::PROCESSED_MATERIALS.len());
        assert_eq!(prices["Oxygen"].price, Some(400.0));
        assert_eq!(prices["Oxygen"].buy, Some(400.0));
    }

    #[test]
    fn history_keeps_last_sixty_days_with_price_fallbacks() {
        let mut days: Vec<HistoryDayDto> = (1..=70)
            .map(|day| HistoryDayDto {
                date: format!("2024-03-{:02}", (day % 28) + 1),
                average: Some(100.4),
                highest: None,
                lowest: None,
            })
            .collect();
        days.push(HistoryDayDto {
            date: "2024-04-01".into(),
            average: None,
            highest: Some(130.0),
            lowest: Some(0.0),
        });
        days.push(HistoryDayDto {
            date: "not a date".into(),
            average: Some(90.0),
            highest: None,
            lowest: None,
        });

        let points = history_points(days, 77.0);
        assert_eq!(points.len(), HISTORY_DAYS - 1);
        assert!(points[..points.len() - 1].iter().all(|p| p.price == 100.0));
        assert_eq!(points.last().map(|p| p.price), Some(130.0));
    }

    #[test]
    fn day_dates_become_utc_midnight_millis() {
        assert_eq!(parse_day_millis("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_day_millis("yesterday"), None);
    }

    #[tokio::test]
    async fn synthetic_feed_covers_catalog() {
        let prices = SyntheticFeed
            .fetch_market_data("amarr")
            .await
            .expect("synthetic feed never fails");
        assert_eq!(prices.len(), catalog::PROCESSED_MATERIALS.len());
        assert!(prices.values().all(|p| p.price.is_some() && !p.history.is_empty()));
    }

    #[tokio::test]
    async fn unreachable_feed_is_an_error() {
        let client = MarketClient::with_base_urls("http://127.0.0.1:9/", "http://127.0.0.1:9/")
            .expect("client");
        assert!(client.fetch_market_data("jita").await.is_err());
    }
}
