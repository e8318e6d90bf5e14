use crate::analysis::aggregation::{failure_histogram, AssetSummary};
use crate::core::results::EvaluationResults;

pub fn print_run_summary(results: &EvaluationResults, summary: &AssetSummary) {
    println!("\n=== {} ===", summary.name);
    println!("Periods evaluated: {}", summary.period_count);
    println!("Total fuel: {:.0} Sm3", summary.total_fuel_sm3);
    for (name, mass) in &summary.emissions_kg {
        println!("Total {}: {:.1} tonnes", name, mass / 1000.0);
    }

    for installation in &summary.installations {
        println!("\n--- {} ---", installation.name);
        println!(
            "  Electric demand: {:.1} MW days",
            installation.total_electric_mw_days
        );
        println!("  Fuel: {:.0} Sm3", installation.total_fuel_sm3);
        for (name, mass) in &installation.emissions_kg {
            println!("  {}: {:.1} tonnes", name, mass / 1000.0);
        }
        if installation.invalid_periods > 0 {
            println!(
                "  WARNING: {} of {} periods carry invalid results",
                installation.invalid_periods, summary.period_count
            );
        }
    }

    let failures = failure_histogram(results);
    if !failures.is_empty() {
        println!("\nFailure statuses:");
        for (failure, count) in failures {
            println!("  {}: {} period-components", failure, count);
        }
    }
    println!();
}
