use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::domain::PriceMode;

#[derive(Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// state file; defaults to the platform config directory
    #[arg(long, global = true, env = "PI_MINMAXER_STATE")]
    pub state_file: Option<PathBuf>,
    /// session to act on; defaults to the last one used
    #[arg(long, global = true)]
    pub session: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// lists sessions
    Sessions,
    /// creates a session and makes it active
    NewSession {
        #[arg(long)]
        name: Option<String>,
    },
    /// makes a session active
    UseSession { id: String },
    DeleteSession { id: String },
    AddSystem { name: String },
    RenameSystem { system: String, name: String },
    DeleteSystem { system: String },
    /// adds a planet, or replaces it when --id matches an existing one
    AddPlanet {
        #[arg(long)]
        system: String,
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        kind: String,
        /// raw material abundance, e.g. --density "Noble Metals=42"
        #[arg(long = "density", value_parser = parse_density)]
        densities: Vec<(String, f64)>,
        #[arg(long)]
        id: Option<String>,
    },
    DeletePlanet {
        #[arg(long)]
        system: String,
        #[arg(long)]
        planet: String,
    },
    SetHub { hub: String },
    SetPriceMode {
        #[arg(value_enum)]
        mode: PriceModeArg,
    },
    SetTopN { top_n: u32 },
    /// refreshes market prices for the session's hub
    Refresh {
        /// use the synthetic market instead of the live feed
        #[arg(long, env = "PI_MINMAXER_OFFLINE")]
        offline: bool,
    },
    /// prints systems ranked by their top six planets
    Rank {
        #[arg(long)]
        json: bool,
    },
    /// shows price, recipe and history for one P1 material
    Material { name: String },
    /// writes the session as pretty JSON
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PriceModeArg {
    Buy,
    Sell,
}

impl From<PriceModeArg> for PriceMode {
    fn from(value: PriceModeArg) -> Self {
        match value {
            PriceModeArg::Buy => PriceMode::Buy,
            PriceModeArg::Sell => PriceMode::Sell,
        }
    }
}

fn parse_density(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected MATERIAL=PERCENT, got {raw:?}"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("invalid abundance {value:?}: {err}"))?;
    Ok((name.trim().to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_flags_parse_material_and_value() {
        assert_eq!(
            parse_density("Noble Metals = 42.5"),
            Ok(("Noble Metals".to_string(), 42.5))
        );
        assert!(parse_density("Noble Metals").is_err());
        assert!(parse_density("Noble Metals=lots").is_err());
    }

    #[test]
    fn add_planet_collects_repeated_densities() {
        let cli = Cli::try_parse_from([
            "pi-minmaxer",
            "add-planet",
            "--system",
            "s1",
            "--name",
            "Amamake I",
            "--type",
            "Barren",
            "--density",
            "Noble Metals=50",
            "--density",
            "Base Metals=12",
        ])
        .expect("parse");

        let Commands::AddPlanet { kind, densities, .. } = cli.command else {
            panic!("wrong command");
        };
        assert_eq!(kind, "Barren");
        assert_eq!(densities.len(), 2);
    }
}
