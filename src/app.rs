use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    domain::{
        catalog,
        entities::into_incoming,
        market::{build_synthetic_market, merge_prices},
        IncomingPriceSet, PersistedState, Planet, PriceMode, Session, System, ValidationError,
        DEFAULT_WINDOW_SIZE,
    },
    infra::market_feed::{MarketFeed, MarketFeedError},
    util::{
        generate_id,
        persistence::Storage,
        timestamp_now,
    },
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no session with id {0}")]
    SessionNotFound(String),
    #[error("no system with id {0}")]
    SystemNotFound(String),
    #[error("no planet with id {0}")]
    PlanetNotFound(String),
    #[error("unknown market hub: {0}")]
    UnknownHub(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// What happened to a market refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Live data merged and `lastFetched` advanced.
    Fetched,
    /// Feed failed; a synthetic market was merged and `lastFetched` kept.
    Fallback,
    /// The session moved to another hub (or was deleted) while fetching.
    Superseded,
}

/// User input for creating or editing a planet.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanetDraft {
    /// `None` creates a new planet.
    pub id: Option<String>,
    pub name: String,
    pub kind: String,
    pub densities: BTreeMap<String, f64>,
}

/// Owns the persisted root. Every mutation replaces a whole session under the
/// lock and then saves a snapshot; the lock is never held across a fetch.
pub struct Store<S: Storage> {
    state: Mutex<PersistedState>,
    storage: S,
    window_size: usize,
}

impl<S: Storage> Store<S> {
    /// Loads saved state, starting empty when storage cannot be read.
    pub fn open(storage: S) -> Self {
        let state = match storage.load() {
            Ok(state) => {
                debug!(sessions = state.sessions.len(), "loaded saved state");
                state
            }
            Err(err) => {
                warn!(error = %err, "failed to load saved state; starting empty");
                PersistedState::default()
            }
        };
        Self {
            state: Mutex::new(state),
            storage,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub async fn snapshot(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.state.lock().await.session(session_id).cloned()
    }

    pub async fn active_session_id(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .active_session_id()
            .map(str::to_string)
    }

    /// New sessions start on the default hub with a synthetic market.
    pub async fn create_session(&self, name: Option<&str>) -> Session {
        let now = timestamp_now();
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Session {now}"));
        let session = Session::new(generate_id(), name, now, build_synthetic_market());

        let mut state = self.state.lock().await;
        state.sessions.insert(0, session.clone());
        state.last_session_id = Some(session.id.clone());
        self.persist(&state);
        info!(session = %session.id, "created session");
        session
    }

    pub async fn select_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.session(session_id).is_none() {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        state.last_session_id = Some(session_id.to_string());
        self.persist(&state);
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let idx = state
            .session_index(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;
        state.sessions.remove(idx);
        if state.last_session_id.as_deref() == Some(session_id) {
            state.last_session_id = state.sessions.first().map(|s| s.id.clone());
        }
        self.persist(&state);
        info!(session = session_id, "deleted session");
        Ok(())
    }

    /// Applies `mutate` to a copy of the session and swaps it in only when
    /// the closure succeeds.
    pub async fn update_session<T, F>(&self, session_id: &str, mutate: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Session) -> Result<T, StoreError>,
    {
        let mut state = self.state.lock().await;
        let idx = state
            .session_index(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        let mut session = state.sessions[idx].clone();
        let value = mutate(&mut session)?;
        session.updated_at = timestamp_now();
        state.sessions[idx] = session;
        self.persist(&state);
        Ok(value)
    }

    /// Renames `system_id` or, when it is `None`, appends a new system.
    pub async fn upsert_system(
        &self,
        session_id: &str,
        system_id: Option<&str>,
        name: &str,
    ) -> Result<String, StoreError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::BlankName.into());
        }
        self.update_session(session_id, |session| match system_id {
            Some(id) => {
                let system = session
                    .system_mut(id)
                    .ok_or_else(|| StoreError::SystemNotFound(id.to_string()))?;
                system.name = name;
                Ok(system.id.clone())
            }
            None => {
                let system = System {
                    id: generate_id(),
                    name,
                    planets: Vec::new(),
                };
                let id = system.id.clone();
                session.systems.push(system);
                Ok(id)
            }
        })
        .await
    }

    pub async fn delete_system(&self, session_id: &str, system_id: &str) -> Result<(), StoreError> {
        self.update_session(session_id, |session| {
            let before = session.systems.len();
            session.systems.retain(|s| s.id != system_id);
            if session.systems.len() == before {
                return Err(StoreError::SystemNotFound(system_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    /// Validates the draft and stores it, replacing a planet with the same id.
    /// Densities are reset to the planet type's materials.
    pub async fn upsert_planet(
        &self,
        session_id: &str,
        system_id: &str,
        draft: PlanetDraft,
    ) -> Result<String, StoreError> {
        let planet = Planet::with_type_defaults(
            draft.id.unwrap_or_else(generate_id),
            draft.name.trim().to_string(),
            draft.kind,
            &draft.densities,
        );
        planet.validate()?;

        self.update_session(session_id, |session| {
            let system = session
                .system_mut(system_id)
                .ok_or_else(|| StoreError::SystemNotFound(system_id.to_string()))?;
            let id = planet.id.clone();
            match system.planets.iter_mut().find(|p| p.id == planet.id) {
                Some(existing) => *existing = planet,
                None => system.planets.push(planet),
            }
            Ok(id)
        })
        .await
    }

    pub async fn delete_planet(
        &self,
        session_id: &str,
        system_id: &str,
        planet_id: &str,
    ) -> Result<(), StoreError> {
        self.update_session(session_id, |session| {
            let system = session
                .system_mut(system_id)
                .ok_or_else(|| StoreError::SystemNotFound(system_id.to_string()))?;
            let before = system.planets.len();
            system.planets.retain(|p| p.id != planet_id);
            if system.planets.len() == before {
                return Err(StoreError::PlanetNotFound(planet_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    pub async fn set_market_hub(&self, session_id: &str, hub_id: &str) -> Result<(), StoreError> {
        if !catalog::is_known_hub(hub_id) {
            return Err(StoreError::UnknownHub(hub_id.to_string()));
        }
        self.update_session(session_id, |session| {
            session.market_hub = hub_id.to_string();
            Ok(())
        })
        .await
    }

    pub async fn set_price_mode(&self, session_id: &str, mode: PriceMode) -> Result<(), StoreError> {
        self.update_session(session_id, |session| {
            session.settings.price_mode = mode;
            Ok(())
        })
        .await
    }

    /// Stored only; system ranking does not read it.
    pub async fn set_top_n(&self, session_id: &str, top_n: u32) -> Result<(), StoreError> {
        self.update_session(session_id, |session| {
            session.settings.top_n = Some(top_n);
            Ok(())
        })
        .await
    }

    /// Makes sure the session has prices to show before a refresh lands:
    /// seeds a synthetic market when empty, else merges the stored prices
    /// back into themselves so each series gains a current point. Stored
    /// series are cut to the newest `window - 1` points first, which holds
    /// a primed series at `window` points.
    pub async fn prime_market(&self, session_id: &str) -> Result<(), StoreError> {
        let window = self.window_size.max(1);
        self.update_session(session_id, |session| {
            if session.market.prices.is_empty() {
                session.market.prices = build_synthetic_market();
                session.market.last_fetched = None;
                session.market.hub = Some(session.market_hub.clone());
            } else {
                let mut carried = into_incoming(session.market.prices.clone());
                for entry in carried.values_mut() {
                    let excess = entry.history.len().saturating_sub(window - 1);
                    entry.history.drain(..excess);
                }
                session.market.prices = merge_prices(&session.market.prices, &carried, window);
            }
            Ok(())
        })
        .await
    }

    /// Fetches prices for the session's current hub and commits them.
    pub async fn refresh_market<F>(
        &self,
        session_id: &str,
        feed: &F,
    ) -> Result<RefreshOutcome, StoreError>
    where
        F: MarketFeed + ?Sized,
    {
        let hub_id = self
            .state
            .lock()
            .await
            .session(session_id)
            .map(|s| s.market_hub.clone())
            .ok_or_else(|| StoreError::SessionNotFound(session_id.to_string()))?;

        info!(session = session_id, hub = %hub_id, "refreshing market");
        let result = feed.fetch_market_data(&hub_id).await;
        self.commit_refresh(session_id, &hub_id, result).await
    }

    /// Commits a refresh issued for `hub_id`. Results for a hub the session
    /// has since left are dropped.
    pub async fn commit_refresh(
        &self,
        session_id: &str,
        hub_id: &str,
        result: Result<IncomingPriceSet, MarketFeedError>,
    ) -> Result<RefreshOutcome, StoreError> {
        let window = self.window_size;
        let mut state = self.state.lock().await;

        let Some(idx) = state.session_index(session_id) else {
            debug!(session = session_id, "session gone; dropping refresh result");
            return Ok(RefreshOutcome::Superseded);
        };
        if state.sessions[idx].market_hub != hub_id {
            debug!(
                session = session_id,
                issued_for = hub_id,
                current = %state.sessions[idx].market_hub,
                "hub changed; dropping refresh result"
            );
            return Ok(RefreshOutcome::Superseded);
        }

        let mut session = state.sessions[idx].clone();
        let outcome = match result {
            Ok(incoming) => {
                session.market.prices = merge_prices(&session.market.prices, &incoming, window);
                session.market.last_fetched = Some(timestamp_now());
                RefreshOutcome::Fetched
            }
            Err(err) => {
                warn!(hub = hub_id, error = %err, "market fetch failed; merging synthetic fallback");
                let fallback = into_incoming(build_synthetic_market());
                session.market.prices = merge_prices(&session.market.prices, &fallback, window);
                RefreshOutcome::Fallback
            }
        };
        session.market.hub = Some(hub_id.to_string());
        session.updated_at = timestamp_now();
        state.sessions[idx] = session;
        self.persist(&state);
        Ok(outcome)
    }

    fn persist(&self, state: &PersistedState) {
        if let Err(err) = self.storage.save(state) {
            warn!(error = %err, "failed to persist state; continuing in memory");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tracing_test::traced_test;

    use super::*;
    use crate::domain::{catalog::PROCESSED_MATERIALS, evaluation::rank_systems, IncomingPrice};
    use crate::infra::market_feed::SyntheticFeed;
    use crate::util::persistence::MemoryStorage;

    struct FailingFeed;

    #[async_trait]
    impl MarketFeed for FailingFeed {
        async fn fetch_market_data(&self, _hub_id: &str) -> Result<IncomingPriceSet, MarketFeedError> {
            Err(MarketFeedError::Api("hub offline".into()))
        }
    }

    /// Signals `started`, then returns one fixed price once `gate` opens.
    struct GatedFeed {
        started: Arc<Notify>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl MarketFeed for GatedFeed {
        async fn fetch_market_data(&self, _hub_id: &str) -> Result<IncomingPriceSet, MarketFeedError> {
            self.started.notify_one();
            self.gate.notified().await;
            Ok(IncomingPriceSet::from([(
                "Oxygen".to_string(),
                IncomingPrice {
                    price: Some(9999.0),
                    ..Default::default()
                },
            )]))
        }
    }

    fn draft(name: &str, kind: &str, densities: &[(&str, f64)]) -> PlanetDraft {
        PlanetDraft {
            id: None,
            name: name.into(),
            kind: kind.into(),
            densities: densities.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[tokio::test]
    async fn created_session_is_active_and_persisted() {
        let store = Store::open(MemoryStorage::default());
        let session = store.create_session(Some("  Delve  ")).await;

        assert_eq!(session.name, "Delve");
        assert_eq!(session.market_hub, "jita");
        assert_eq!(session.market.prices.len(), PROCESSED_MATERIALS.len());
        assert_eq!(session.market.last_fetched, None);
        assert_eq!(store.active_session_id().await, Some(session.id.clone()));

        let saved = store.storage().snapshot().expect("saved");
        assert_eq!(saved.sessions.len(), 1);
    }

    #[tokio::test]
    async fn deleting_active_session_moves_to_next() {
        let store = Store::open(MemoryStorage::default());
        let older = store.create_session(Some("older")).await;
        let newer = store.create_session(Some("newer")).await;

        store.delete_session(&newer.id).await.expect("delete");
        assert_eq!(store.active_session_id().await, Some(older.id.clone()));

        assert!(matches!(
            store.delete_session(&newer.id).await,
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn builder_actions_feed_ranking() {
        let store = Store::open(MemoryStorage::default());
        let session = store.create_session(Some("scout")).await;

        let quiet = store.upsert_system(&session.id, None, "Quiet").await.expect("system");
        let rich = store.upsert_system(&session.id, None, "Rich").await.expect("system");
        store
            .upsert_planet(&session.id, &quiet, draft("Q I", "Gas", &[("Noble Gas", 5.0)]))
            .await
            .expect("planet");
        store
            .upsert_planet(&session.id, &rich, draft("R I", "Barren", &[("Noble Metals", 50.0)]))
            .await
            .expect("planet");

        let session = store.session(&session.id).await.expect("session");
        let rankings = rank_systems(&session);
        assert_eq!(rankings[0].system.name, "Rich");
        assert_eq!(rankings[0].planet_scores[0].planet.densities.len(), 5);
    }

    #[tokio::test]
    async fn invalid_planet_leaves_session_untouched() {
        let store = Store::open(MemoryStorage::default());
        let session = store.create_session(None).await;
        let system = store.upsert_system(&session.id, None, "J-1").await.expect("system");
        let before = store.session(&session.id).await;

        let err = store
            .upsert_planet(&session.id, &system, draft("X", "Barren", &[("Noble Metals", 140.0)]))
            .await
            .expect_err("out of range");
        assert!(matches!(err, StoreError::Validation(_)));

        let err = store
            .upsert_planet(&session.id, "missing", draft("X", "Barren", &[]))
            .await
            .expect_err("unknown system");
        assert!(matches!(err, StoreError::SystemNotFound(_)));

        assert_eq!(store.session(&session.id).await, before);
    }

    #[tokio::test]
    async fn editing_a_planet_replaces_it_in_place() {
        let store = Store::open(MemoryStorage::default());
        let session = store.create_session(None).await;
        let system = store.upsert_system(&session.id, None, "J-1").await.expect("system");
        let planet_id = store
            .upsert_planet(&session.id, &system, draft("P", "Lava", &[("Felsic Magma", 10.0)]))
            .await
            .expect("planet");

        let mut edit = draft("P renamed", "Lava", &[("Felsic Magma", 60.0)]);
        edit.id = Some(planet_id.clone());
        store.upsert_planet(&session.id, &system, edit).await.expect("edit");

        let session = store.session(&session.id).await.expect("session");
        let planets = &session.system(&system).expect("system").planets;
        assert_eq!(planets.len(), 1);
        assert_eq!(planets[0].name, "P renamed");
        assert_eq!(planets[0].abundance("Felsic Magma"), 60.0);

        store
            .delete_planet(&session.id, &system, &planet_id)
            .await
            .expect("delete");
        assert!(matches!(
            store.delete_planet(&session.id, &system, &planet_id).await,
            Err(StoreError::PlanetNotFound(_))
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_refresh_keeps_last_fetched_and_complete_prices() {
        let store = Store::open(MemoryStorage::default());
        let session = store.create_session(None).await;

        let outcome = store
            .refresh_market(&session.id, &FailingFeed)
            .await
            .expect("refresh");
        assert_eq!(outcome, RefreshOutcome::Fallback);

        let session = store.session(&session.id).await.expect("session");
        assert_eq!(session.market.last_fetched, None);
        assert_eq!(session.market.hub.as_deref(), Some("jita"));
        assert_eq!(session.market.prices.len(), PROCESSED_MATERIALS.len());
        assert!(logs_contain("market fetch failed"));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_earlier_fetch_time() {
        let store = Store::open(MemoryStorage::default());
        let session = store.create_session(None).await;

        store
            .refresh_market(&session.id, &SyntheticFeed)
            .await
            .expect("refresh");
        let fetched = store
            .session(&session.id)
            .await
            .expect("session")
            .market
            .last_fetched;
        assert!(fetched.is_some());

        let outcome = store
            .refresh_market(&session.id, &FailingFeed)
            .await
            .expect("refresh");
        assert_eq!(outcome, RefreshOutcome::Fallback);

        let session = store.session(&session.id).await.expect("session");
        assert_eq!(session.market.last_fetched, fetched);
        assert_eq!(session.market.prices.len(), PROCESSED_MATERIALS.len());
    }

    #[tokio::test]
    async fn priming_holds_series_at_the_configured_window() {
        let store = Store::open(MemoryStorage::default()).with_window_size(5);
        let session = store.create_session(None).await;

        store.prime_market(&session.id).await.expect("prime");
        store.prime_market(&session.id).await.expect("prime again");

        let session = store.session(&session.id).await.expect("session");
        for record in session.market.prices.values() {
            assert_eq!(record.history.len(), 5);
            let last = record.history.last().map(|p| p.ts).expect("point");
            assert!(record.history.iter().all(|p| p.ts <= last));
        }
    }

    #[tokio::test]
    async fn successful_refresh_stamps_last_fetched() {
        let store = Store::open(MemoryStorage::default());
        let session = store.create_session(None).await;
        store.set_market_hub(&session.id, "dodixie").await.expect("hub");

        let outcome = store
            .refresh_market(&session.id, &SyntheticFeed)
            .await
            .expect("refresh");
        assert_eq!(outcome, RefreshOutcome::Fetched);

        let session = store.session(&session.id).await.expect("session");
        assert!(session.market.last_fetched.is_some());
        assert_eq!(session.market.hub.as_deref(), Some("dodixie"));
    }

    #[tokio::test]
    async fn refresh_for_abandoned_hub_is_discarded() {
        let store = Store::open(MemoryStorage::default());
        let session = store.create_session(None).await;
        let before = store.session(&session.id).await.expect("session");

        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let feed = GatedFeed {
            started: started.clone(),
            gate: gate.clone(),
        };

        let refresh = store.refresh_market(&session.id, &feed);
        let switch = async {
            started.notified().await;
            store.set_market_hub(&session.id, "amarr").await.expect("hub");
            gate.notify_one();
        };
        let (outcome, ()) = tokio::join!(refresh, switch);

        assert_eq!(outcome.expect("refresh"), RefreshOutcome::Superseded);
        let after = store.session(&session.id).await.expect("session");
        assert_eq!(after.market, before.market);
        assert_eq!(after.market_hub, "amarr");
    }

    #[tokio::test]
    async fn refresh_for_deleted_session_is_discarded() {
        let store = Store::open(MemoryStorage::default());
        let outcome = store
            .commit_refresh("gone", "jita", Ok(IncomingPriceSet::new()))
            .await
            .expect("commit");
        assert_eq!(outcome, RefreshOutcome::Superseded);
    }

    #[tokio::test]
    async fn unknown_hub_is_rejected() {
        let store = Store::open(MemoryStorage::default());
        let session = store.create_session(None).await;
        assert!(matches!(
            store.set_market_hub(&session.id, "perimeter").await,
            Err(StoreError::UnknownHub(_))
        ));
    }

    #[tokio::test]
    async fn prime_market_seeds_empty_sessions() {
        let mut session = Session::new("s".into(), "s".into(), String::new(), Default::default());
        session.market_hub = "amarr".into();
        let store = Store::open(MemoryStorage::with_state(PersistedState {
            sessions: vec![session],
            last_session_id: None,
        }));

        store.prime_market("s").await.expect("prime");
        let primed = store.session("s").await.expect("session");
        assert_eq!(primed.market.prices.len(), PROCESSED_MATERIALS.len());
        assert_eq!(primed.market.hub.as_deref(), Some("amarr"));

        store.prime_market("s").await.expect("prime again");
        let again = store.session("s").await.expect("session");
        let water = &again.market.prices["Water"];
        assert_eq!(water.history.len(), primed.market.prices["Water"].history.len() + 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn save_failures_do_not_lose_in_memory_state() {
        let store = Store::open(MemoryStorage::read_only());
        let session = store.create_session(Some("volatile")).await;

        store.set_price_mode(&session.id, PriceMode::Buy).await.expect("mode");
        store.set_top_n(&session.id, 4).await.expect("top n");

        let session = store.session(&session.id).await.expect("session");
        assert_eq!(session.settings.price_mode, PriceMode::Buy);
        assert_eq!(session.settings.top_n, Some(4));
        assert!(logs_contain("failed to persist state"));
    }
}
