//! Carbon footprint estimation, the other half of C9's usage accounting.
//!
//! The gateway this crate is modeled on calls out to the `ecologits`
//! Python library (`compute_llm_impacts` + its `electricity_mixes` table)
//! for this. No Rust crate in this workspace's dependency pack provides an
//! equivalent, so this module reimplements the public coefficients
//! `ecologits` documents: a small per-country grid-intensity table and a
//! parameter-scaled per-token energy estimate, returning the same
//! min/max-range shape the original does. An unknown electricity zone is a
//! fatal configuration error, exactly as it is upstream — it is surfaced at
//! provider-admission time, not per request.

use std::collections::HashMap;

use anyhow::{bail, Result};

/// A closed interval, matching `ecologits`' practice of reporting impacts
/// as a (best case, worst case) range rather than a point estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CarbonFootprint {
    pub kwh: Range,
    pub kgco2eq: Range,
}

/// Grid carbon intensity in grams CO2eq per kWh, by ISO 3166-1 alpha-3 zone.
/// A small representative subset of the table `ecologits.electricity_mixes`
/// ships; values are the commonly cited national averages.
fn grid_intensity_g_per_kwh(zone: &str) -> Option<f64> {
    let table: HashMap<&str, f64> = HashMap::from([
        ("WOR", 475.0), // world average
        ("USA", 386.0),
        ("FRA", 56.0),
        ("DEU", 366.0),
        ("CHN", 533.0),
        ("IND", 632.0),
        ("GBR", 211.0),
        ("CAN", 120.0),
    ]);
    table.get(zone).copied()
}

/// Per-token active-parameter energy coefficient, in kWh per billion active
/// parameters per token — `ecologits`' dominant-term approximation for
/// transformer inference cost, kept as a single constant since the exact
/// hardware-efficiency curve it fits is out of scope here.
const KWH_PER_BILLION_ACTIVE_PARAMS_PER_TOKEN: f64 = 1.5e-6;

/// Compute a (min, max) energy and carbon-footprint estimate for one
/// request. `active_params`/`total_params` are in billions of parameters,
/// matching how the original source's model catalogue records them;
/// `token_count` is prompt + completion tokens. Returns `Ok(None)` only
/// never — a missing zone is always an error; callers that don't have
/// parameter counts should skip calling this entirely (see `usage.rs`).
pub fn carbon_footprint(
    active_params_b: f64,
    total_params_b: f64,
    zone: &str,
    token_count: u64,
    _request_latency_ms: u64,
) -> Result<CarbonFootprint> {
    let Some(intensity) = grid_intensity_g_per_kwh(zone) else {
        bail!("unknown electricity zone: {zone}");
    };

    let energy_min = active_params_b * KWH_PER_BILLION_ACTIVE_PARAMS_PER_TOKEN * token_count as f64;
    // The worst case uses total (not just active) parameters, covering
    // dense-equivalent or non-MoE-optimized serving.
    let energy_max = total_params_b * KWH_PER_BILLION_ACTIVE_PARAMS_PER_TOKEN * token_count as f64;

    let kwh = Range {
        min: energy_min,
        max: energy_max.max(energy_min),
    };
    let kgco2eq = Range {
        min: kwh.min * intensity / 1000.0,
        max: kwh.max * intensity / 1000.0,
    };

    Ok(CarbonFootprint { kwh, kgco2eq })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_zone_is_an_error() {
        let err = carbon_footprint(7.0, 7.0, "ATLANTIS", 100, 500).unwrap_err();
        assert!(err.to_string().contains("unknown electricity zone"));
    }

    #[test]
    fn known_zone_produces_a_range() {
        let fp = carbon_footprint(7.0, 13.0, "FRA", 1000, 500).unwrap();
        assert!(fp.kwh.min <= fp.kwh.max);
        assert!(fp.kgco2eq.min <= fp.kgco2eq.max);
        assert!(fp.kwh.min > 0.0);
    }

    #[test]
    fn more_tokens_costs_more_energy() {
        let small = carbon_footprint(7.0, 7.0, "USA", 100, 500).unwrap();
        let large = carbon_footprint(7.0, 7.0, "USA", 1000, 500).unwrap();
        assert!(large.kwh.min > small.kwh.min);
    }

    #[test]
    fn higher_grid_intensity_raises_carbon_for_same_energy() {
        let clean = carbon_footprint(7.0, 7.0, "FRA", 1000, 500).unwrap();
        let dirty = carbon_footprint(7.0, 7.0, "IND", 1000, 500).unwrap();
        assert!(dirty.kgco2eq.min > clean.kgco2eq.min);
    }
}
