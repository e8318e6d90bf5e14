use serde::Serialize;

use crate::core::results::{EvaluationResults, FailureStatus};

/// Per-installation horizon totals. Stream-day rates become calendar
/// volumes through regularity and period length; unit buckets never mix.
#[derive(Debug, Clone, Serialize)]
pub struct InstallationSummary {
    pub name: String,
    /// Calendar fuel volume over the horizon [Sm3]
    pub total_fuel_sm3: f64,
    /// Electric demand integrated over calendar time [MW days]
    pub total_electric_mw_days: f64,
    /// Calendar emission mass per emission name [kg]
    pub emissions_kg: Vec<(String, f64)>,
    /// Periods with at least one invalid component
    pub invalid_periods: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetSummary {
    pub name: String,
    pub period_count: usize,
    pub installations: Vec<InstallationSummary>,
    pub total_fuel_sm3: f64,
    pub emissions_kg: Vec<(String, f64)>,
}

pub fn aggregate(results: &EvaluationResults) -> AssetSummary {
    let mut installations: Vec<InstallationSummary> = Vec::new();

    for period_result in &results.periods {
        let days = period_result.period.duration_days();
        for installation in &period_result.installations {
            let index = match installations.iter().position(|i| i.name == installation.name) {
                Some(index) => index,
                None => {
                    installations.push(InstallationSummary {
                        name: installation.name.clone(),
                        total_fuel_sm3: 0.0,
                        total_electric_mw_days: 0.0,
                        emissions_kg: Vec::new(),
                        invalid_periods: 0,
                    });
                    installations.len() - 1
                }
            };
            let entry = &mut installations[index];

            let calendar_factor = installation.regularity * days;
            entry.total_fuel_sm3 += installation.total_fuel_rate() * calendar_factor;
            entry.total_electric_mw_days += installation.total_electric_load() * calendar_factor;
            for emission in &installation.emissions {
                match entry
                    .emissions_kg
                    .iter_mut()
                    .find(|(name, _)| *name == emission.name)
                {
                    Some((_, total)) => *total += emission.period_mass_kg,
                    None => entry
                        .emissions_kg
                        .push((emission.name.clone(), emission.period_mass_kg)),
                }
            }

            let any_invalid = installation.generator_sets.iter().any(|g| {
                !g.is_valid || g.consumers.iter().any(|c| !c.is_valid)
            }) || installation.fuel_consumers.iter().any(|c| !c.is_valid);
            if any_invalid {
                entry.invalid_periods += 1;
            }
        }
    }

    let total_fuel_sm3 = installations.iter().map(|i| i.total_fuel_sm3).sum();
    let mut emissions_kg: Vec<(String, f64)> = Vec::new();
    for installation in &installations {
        for (name, mass) in &installation.emissions_kg {
            match emissions_kg.iter_mut().find(|(n, _)| n == name) {
                Some((_, total)) => *total += mass,
                None => emissions_kg.push((name.clone(), *mass)),
            }
        }
    }

    AssetSummary {
        name: results.asset_name.clone(),
        period_count: results.periods.len(),
        installations,
        total_fuel_sm3,
        emissions_kg,
    }
}

/// Count occurrences of each failure status across the whole run.
pub fn failure_histogram(results: &EvaluationResults) -> Vec<(FailureStatus, usize)> {
    let mut histogram: Vec<(FailureStatus, usize)> = Vec::new();
    let mut add = |failure: Option<FailureStatus>| {
        if let Some(failure) = failure {
            match histogram.iter_mut().find(|(f, _)| *f == failure) {
                Some((_, count)) => *count += 1,
                None => histogram.push((failure, 1)),
            }
        }
    };

    for period in &results.periods {
        for installation in &period.installations {
            for genset in &installation.generator_sets {
                add(genset.failure_status);
                for consumer in &genset.consumers {
                    add(consumer.failure_status);
                }
            }
            for consumer in &installation.fuel_consumers {
                add(consumer.failure_status);
            }
        }
    }
    histogram
}
