//! Outside-world adapters.

pub mod market_feed;
