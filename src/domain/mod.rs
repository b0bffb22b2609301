//! Domain logic for planetary industry scouting lives here.

pub mod app_state;
pub mod catalog;
pub mod entities;
pub mod evaluation;
pub mod market;

pub use app_state::PersistedState;
pub use entities::{
    HistorySample, IncomingPrice, IncomingPriceSet, MarketState, Planet, PriceMode, PricePoint,
    PriceRecord, PriceSet, Session, SessionSettings, System, ValidationError,
};
pub use evaluation::{
    calculate_planet_best, material_detail, planet_detail, rank_systems, MaterialDetail,
    MaterialScore, PlanetDetail, PlanetScore, SystemRanking, TOP_PLANETS_PER_SYSTEM,
};
pub use market::{
    build_synthetic_market, merge_prices, normalize_history, DEFAULT_WINDOW_SIZE,
};
