use std::collections::BTreeMap;
use std::fs;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pi_minmaxer::app::{PlanetDraft, RefreshOutcome, Store};
use pi_minmaxer::cli_args::{Cli, Commands};
use pi_minmaxer::domain::{catalog, material_detail, rank_systems};
use pi_minmaxer::infra::market_feed::{MarketClient, MarketFeed, SyntheticFeed};
use pi_minmaxer::util::format::format_number;
use pi_minmaxer::util::persistence::{export_file_name, export_session, JsonFileStorage};
use pi_minmaxer::util::version::{version_label, APP_NAME};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let storage = match &cli.state_file {
        Some(path) => JsonFileStorage::at(path),
        None => JsonFileStorage::in_config_dir(),
    };
    let store = Store::open(storage);
    run(cli, &store).await
}

async fn run(cli: Cli, store: &Store<JsonFileStorage>) -> Result<()> {
    match &cli.command {
        Commands::Sessions => {
            let state = store.snapshot().await;
            let active = state.active_session_id().map(str::to_string);
            println!("{APP_NAME} {}", version_label());
            for session in &state.sessions {
                let marker = if active.as_deref() == Some(session.id.as_str()) { "*" } else { " " };
                println!(
                    "{marker} {}  {}  ({} systems, hub {})",
                    session.id,
                    session.name,
                    session.systems.len(),
                    session.market_hub
                );
            }
            return Ok(());
        }
        Commands::NewSession { name } => {
            let session = store.create_session(name.as_deref()).await;
            println!("{}", session.id);
            return Ok(());
        }
        Commands::UseSession { id } => {
            store.select_session(id).await?;
            return Ok(());
        }
        Commands::DeleteSession { id } => {
            store.delete_session(id).await?;
            return Ok(());
        }
        _ => {}
    }

    let session_id = match cli.session {
        Some(id) => id,
        None => store
            .active_session_id()
            .await
            .ok_or_else(|| anyhow!("no session yet; run `new-session` first"))?,
    };

    match cli.command {
        Commands::AddSystem { name } => {
            let id = store.upsert_system(&session_id, None, &name).await?;
            println!("{id}");
        }
        Commands::RenameSystem { system, name } => {
            store.upsert_system(&session_id, Some(&system), &name).await?;
        }
        Commands::DeleteSystem { system } => {
            store.delete_system(&session_id, &system).await?;
        }
        Commands::AddPlanet {
            system,
            name,
            kind,
            densities,
            id,
        } => {
            let draft = PlanetDraft {
                id,
                name,
                kind,
                densities: densities.into_iter().collect::<BTreeMap<_, _>>(),
            };
            let id = store.upsert_planet(&session_id, &system, draft).await?;
            println!("{id}");
        }
        Commands::DeletePlanet { system, planet } => {
            store.delete_planet(&session_id, &system, &planet).await?;
        }
        Commands::SetHub { hub } => {
            store.set_market_hub(&session_id, &hub).await?;
            store.prime_market(&session_id).await?;
        }
        Commands::SetPriceMode { mode } => {
            store.set_price_mode(&session_id, mode.into()).await?;
        }
        Commands::SetTopN { top_n } => {
            store.set_top_n(&session_id, top_n).await?;
        }
        Commands::Refresh { offline } => {
            let feed: Box<dyn MarketFeed> = if offline {
                Box::new(SyntheticFeed)
            } else {
                Box::new(MarketClient::new()?)
            };
            let outcome = store.refresh_market(&session_id, feed.as_ref()).await?;
            match outcome {
                RefreshOutcome::Fetched => println!("market refreshed"),
                RefreshOutcome::Fallback => println!("market unavailable; using synthetic prices"),
                RefreshOutcome::Superseded => println!("hub changed during refresh; result dropped"),
            }
        }
        Commands::Rank { json } => {
            let session = store
                .session(&session_id)
                .await
                .ok_or_else(|| anyhow!("session {session_id} not found"))?;
            let rankings = rank_systems(&session);
            if json {
                println!("{}", serde_json::to_string_pretty(&rankings)?);
            } else {
                let hub = catalog::market_hub(&session.market_hub);
                println!(
                    "{} @ {} (last fetched: {})",
                    session.name,
                    hub.name,
                    session.market.last_fetched.as_deref().unwrap_or("never")
                );
                for (idx, ranking) in rankings.iter().enumerate() {
                    println!(
                        "{:>2}. {:<20} score {:>8}  best planet {:>8}",
                        idx + 1,
                        ranking.system.name,
                        format_number(ranking.score),
                        format_number(ranking.top_planet_score)
                    );
                    for score in &ranking.planet_scores {
                        match &score.best {
                            Some(best) => println!(
                                "      {:<18} {} -> {} @ {}%  {} ISK/m3",
                                score.planet.name,
                                best.raw,
                                best.processed,
                                best.abundance,
                                format_number(best.value)
                            ),
                            None => println!("      {:<18} no densities yet", score.planet.name),
                        }
                    }
                }
            }
        }
        Commands::Material { name } => {
            let session = store
                .session(&session_id)
                .await
                .ok_or_else(|| anyhow!("session {session_id} not found"))?;
            let detail = material_detail(&name, &session)
                .ok_or_else(|| anyhow!("unknown P1 material: {name}"))?;
            println!("{} ({} price)", detail.name, detail.price_mode.label());
            println!(
                "  sell {}  buy {}  volume {} m3  {} ISK/m3",
                format_number(detail.sell),
                format_number(detail.buy),
                detail.volume,
                format_number(detail.isk_per_m3)
            );
            if let Some(raw) = &detail.source_raw {
                println!(
                    "  recipe: {} {raw} -> {} {}",
                    detail.raw_per_batch, detail.processed_per_batch, detail.name
                );
            }
            for point in &detail.history {
                let when = OffsetDateTime::from_unix_timestamp_nanos(point.ts as i128 * 1_000_000)
                    .ok()
                    .and_then(|dt| dt.format(&Rfc3339).ok())
                    .unwrap_or_else(|| point.ts.to_string());
                println!("  {when}  {}", format_number(point.price));
            }
        }
        Commands::Export { out } => {
            let session = store
                .session(&session_id)
                .await
                .ok_or_else(|| anyhow!("session {session_id} not found"))?;
            let text = export_session(&session)?;
            let path = out.unwrap_or_else(|| export_file_name(&session).into());
            fs::write(&path, text)
                .with_context(|| format!("writing export to {}", path.display()))?;
            println!("{}", path.display());
        }
        Commands::Sessions
        | Commands::NewSession { .. }
        | Commands::UseSession { .. }
        | Commands::DeleteSession { .. } => {}
    }
    Ok(())
}
