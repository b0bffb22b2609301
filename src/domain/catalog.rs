//! Static reference data for planetary industry.
//!
//! Everything here is immutable. The market merger and the planet scorer walk
//! these tables rather than the (possibly partial) price data they are handed,
//! so every processed material is always accounted for.

/// Raw units consumed per processing batch.
pub const RAW_PER_BATCH: u32 = 3000;
/// Processed units produced per processing batch.
pub const PROCESSED_PER_BATCH: u32 = 20;

/// How a raw (P0) material refines into a processed (P1) material.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResourceMapping {
    pub raw: &'static str,
    pub processed: &'static str,
    pub raw_per_batch: u32,
    pub processed_per_batch: u32,
}

impl ResourceMapping {
    const fn new(raw: &'static str, processed: &'static str) -> Self {
        Self {
            raw,
            processed,
            raw_per_batch: RAW_PER_BATCH,
            processed_per_batch: PROCESSED_PER_BATCH,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlanetType {
    pub name: &'static str,
    /// Always exactly five raw materials, in display order.
    pub raw_materials: [&'static str; 5],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProcessedMaterial {
    pub name: &'static str,
    pub type_id: u32,
    /// m³ per unit
    pub volume: f64,
    pub default_price: f64,
    pub sample_history: &'static [f64],
}

/// Trade hub a market refresh can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarketHub {
    pub id: &'static str,
    pub name: &'static str,
    pub station_id: u64,
    pub region_id: u64,
}

pub static MARKET_HUBS: &[MarketHub] = &[
    MarketHub {
        id: "jita",
        name: "Jita",
        station_id: 60003760,
        region_id: 10000002,
    },
    MarketHub {
        id: "amarr",
        name: "Amarr",
        station_id: 60008494,
        region_id: 10000043,
    },
    MarketHub {
        id: "dodixie",
        name: "Dodixie",
        station_id: 60011866,
        region_id: 10000032,
    },
];

pub const DEFAULT_HUB_ID: &str = "jita";

pub static RESOURCE_MAPPINGS: &[ResourceMapping] = &[
    ResourceMapping::new("Aqueous Liquids", "Water"),
    ResourceMapping::new("Autotrophs", "Industrial Fibers"),
    ResourceMapping::new("Base Metals", "Reactive Metals"),
    ResourceMapping::new("Carbon Compounds", "Biofuels"),
    ResourceMapping::new("Complex Organisms", "Proteins"),
    ResourceMapping::new("Felsic Magma", "Silicon"),
    ResourceMapping::new("Heavy Metals", "Toxic Metals"),
    ResourceMapping::new("Ionic Solutions", "Electrolytes"),
    ResourceMapping::new("Microorganisms", "Bacteria"),
    ResourceMapping::new("Noble Gas", "Oxygen"),
    ResourceMapping::new("Noble Metals", "Precious Metals"),
    ResourceMapping::new("Non-CS Crystals", "Chiral Structures"),
    ResourceMapping::new("Planktic Colonies", "Biomass"),
    ResourceMapping::new("Reactive Gas", "Oxidizing Compound"),
    ResourceMapping::new("Suspended Plasma", "Plasmoids"),
];

pub static PLANET_TYPES: &[PlanetType] = &[
    PlanetType {
        name: "Barren",
        raw_materials: [
            "Aqueous Liquids",
            "Base Metals",
            "Carbon Compounds",
            "Microorganisms",
            "Noble Metals",
        ],
    },
    PlanetType {
        name: "Temperate",
        raw_materials: [
            "Aqueous Liquids",
            "Autotrophs",
            "Carbon Compounds",
            "Complex Organisms",
            "Microorganisms",
        ],
    },
    PlanetType {
        name: "Oceanic",
        raw_materials: [
            "Aqueous Liquids",
            "Carbon Compounds",
            "Complex Organisms",
            "Microorganisms",
            "Planktic Colonies",
        ],
    },
    PlanetType {
        name: "Ice",
        raw_materials: [
            "Aqueous Liquids",
            "Heavy Metals",
            "Microorganisms",
            "Noble Gas",
            "Planktic Colonies",
        ],
    },
    PlanetType {
        name: "Gas",
        raw_materials: [
            "Aqueous Liquids",
            "Base Metals",
            "Ionic Solutions",
            "Noble Gas",
            "Reactive Gas",
        ],
    },
    PlanetType {
        name: "Storm",
        raw_materials: [
            "Aqueous Liquids",
            "Base Metals",
            "Ionic Solutions",
            "Noble Gas",
            "Suspended Plasma",
        ],
    },
    PlanetType {
        name: "Lava",
        raw_materials: [
            "Base Metals",
            "Felsic Magma",
            "Heavy Metals",
            "Non-CS Crystals",
            "Suspended Plasma",
        ],
    },
    PlanetType {
        name: "Plasma",
        raw_materials: [
            "Base Metals",
            "Heavy Metals",
            "Noble Metals",
            "Non-CS Crystals",
            "Suspended Plasma",
        ],
    },
];

pub static PROCESSED_MATERIALS: &[ProcessedMaterial] = &[
    ProcessedMaterial {
        name: "Water",
        type_id: 3645,
        volume: 0.38,
        default_price: 120.0,
        sample_history: &[115.0, 117.0, 123.0, 130.0, 126.0, 124.0, 129.0, 134.0],
    },
    ProcessedMaterial {
        name: "Industrial Fibers",
        type_id: 2397,
        volume: 0.38,
        default_price: 220.0,
        sample_history: &[210.0, 215.0, 225.0, 240.0, 238.0, 230.0, 228.0],
    },
    ProcessedMaterial {
        name: "Reactive Metals",
        type_id: 2391,
        volume: 0.38,
        default_price: 150.0,
        sample_history: &[140.0, 145.0, 155.0, 150.0, 152.0, 160.0, 158.0],
    },
    ProcessedMaterial {
        name: "Biofuels",
        type_id: 2396,
        volume: 0.38,
        default_price: 160.0,
        sample_history: &[150.0, 152.0, 158.0, 165.0, 170.0, 168.0, 166.0],
    },
    ProcessedMaterial {
        name: "Proteins",
        type_id: 2395,
        volume: 0.38,
        default_price: 190.0,
        sample_history: &[180.0, 182.0, 190.0, 200.0, 198.0, 192.0, 189.0],
    },
    ProcessedMaterial {
        name: "Silicon",
        type_id: 9828,
        volume: 0.38,
        default_price: 240.0,
        sample_history: &[230.0, 232.0, 238.0, 242.0, 245.0, 250.0, 248.0],
    },
    ProcessedMaterial {
        name: "Toxic Metals",
        type_id: 2390,
        volume: 0.38,
        default_price: 260.0,
        sample_history: &[250.0, 252.0, 255.0, 260.0, 265.0, 270.0, 268.0],
    },
    ProcessedMaterial {
        name: "Electrolytes",
        type_id: 2398,
        volume: 0.38,
        default_price: 210.0,
        sample_history: &[200.0, 202.0, 210.0, 215.0, 218.0, 212.0, 208.0],
    },
    ProcessedMaterial {
        name: "Bacteria",
        type_id: 2393,
        volume: 0.38,
        default_price: 110.0,
        sample_history: &[100.0, 104.0, 108.0, 112.0, 115.0, 118.0, 116.0],
    },
    ProcessedMaterial {
        name: "Biomass",
        type_id: 3779,
        volume: 0.38,
        default_price: 180.0,
        sample_history: &[170.0, 172.0, 180.0, 188.0, 186.0, 182.0, 179.0],
    },
    ProcessedMaterial {
        name: "Oxygen",
        type_id: 3683,
        volume: 0.38,
        default_price: 400.0,
        sample_history: &[380.0, 390.0, 400.0, 415.0, 420.0, 410.0, 405.0],
    },
    ProcessedMaterial {
        name: "Precious Metals",
        type_id: 2392,
        volume: 0.38,
        default_price: 520.0,
        sample_history: &[500.0, 510.0, 520.0, 540.0, 535.0, 528.0, 525.0],
    },
    ProcessedMaterial {
        name: "Chiral Structures",
        type_id: 2400,
        volume: 0.38,
        default_price: 350.0,
        sample_history: &[330.0, 340.0, 345.0, 355.0, 360.0, 358.0, 352.0],
    },
    ProcessedMaterial {
        name: "Plasmoids",
        type_id: 2389,
        volume: 0.38,
        default_price: 430.0,
        sample_history: &[420.0, 422.0, 428.0, 440.0, 438.0, 432.0, 430.0],
    },
    ProcessedMaterial {
        name: "Oxidizing Compound",
        type_id: 2399,
        volume: 0.38,
        default_price: 380.0,
        sample_history: &[360.0, 370.0, 380.0, 395.0, 390.0, 388.0, 386.0],
    },
];

pub fn resource_mapping(raw: &str) -> Option<&'static ResourceMapping> {
    RESOURCE_MAPPINGS.iter().find(|mapping| mapping.raw == raw)
}

/// Reverse lookup: which raw material refines into `processed`.
pub fn source_of(processed: &str) -> Option<&'static ResourceMapping> {
    RESOURCE_MAPPINGS
        .iter()
        .find(|mapping| mapping.processed == processed)
}

pub fn planet_type(name: &str) -> Option<&'static PlanetType> {
    PLANET_TYPES.iter().find(|kind| kind.name == name)
}

pub fn processed_material(name: &str) -> Option<&'static ProcessedMaterial> {
    PROCESSED_MATERIALS.iter().find(|meta| meta.name == name)
}

/// Resolves a hub id, falling back to the first hub for unknown ids.
pub fn market_hub(id: &str) -> &'static MarketHub {
    MARKET_HUBS
        .iter()
        .find(|hub| hub.id == id)
        .unwrap_or(&MARKET_HUBS[0])
}

pub fn is_known_hub(id: &str) -> bool {
    MARKET_HUBS.iter().any(|hub| hub.id == id)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn every_planet_material_has_a_mapping_with_metadata() {
        for kind in PLANET_TYPES {
            for raw in kind.raw_materials {
                let mapping = resource_mapping(raw)
                    .unwrap_or_else(|| panic!("{raw} on {} has no mapping", kind.name));
                assert!(
                    processed_material(mapping.processed).is_some(),
                    "{} has no metadata",
                    mapping.processed
                );
            }
        }
    }

    #[test]
    fn registry_keys_are_unique() {
        let raws: HashSet<_> = RESOURCE_MAPPINGS.iter().map(|m| m.raw).collect();
        assert_eq!(raws.len(), RESOURCE_MAPPINGS.len());

        let processed: HashSet<_> = PROCESSED_MATERIALS.iter().map(|m| m.name).collect();
        assert_eq!(processed.len(), PROCESSED_MATERIALS.len());
        assert_eq!(processed.len(), 15);
    }

    #[test]
    fn unknown_hub_falls_back_to_jita() {
        assert_eq!(market_hub("amarr").station_id, 60008494);
        assert_eq!(market_hub("nowhere").id, DEFAULT_HUB_ID);
        assert!(!is_known_hub("nowhere"));
    }

    #[test]
    fn source_lookup_round_trips_mapping() {
        let mapping = source_of("Precious Metals").expect("mapping");
        assert_eq!(mapping.raw, "Noble Metals");
        assert_eq!(mapping.raw_per_batch, 3000);
        assert_eq!(mapping.processed_per_batch, 20);
    }
}
