use std::fs;
use std::path::Path;

use crate::core::results::EvaluationResults;
use crate::data::timeseries_loader::ResourceError;
use crate::utils::logging::{self, FileIOType, OperationCategory};

fn to_io_error(path: &Path) -> impl Fn(csv::Error) -> ResourceError + '_ {
    move |source| ResourceError::Csv {
        path: path.display().to_string(),
        source,
    }
}

/// Write the per-period result files: consumers.csv, generator_sets.csv
/// and emissions.csv under the output directory.
pub fn export_results(results: &EvaluationResults, output_dir: &Path) -> Result<(), ResourceError> {
    let _timing = logging::start_timing(
        "export_results",
        OperationCategory::FileIO {
            subcategory: FileIOType::ResultsSave,
        },
    );

    fs::create_dir_all(output_dir).map_err(|source| ResourceError::Io {
        path: output_dir.display().to_string(),
        source,
    })?;

    export_consumers(results, &output_dir.join("consumers.csv"))?;
    export_generator_sets(results, &output_dir.join("generator_sets.csv"))?;
    export_emissions(results, &output_dir.join("emissions.csv"))?;
    Ok(())
}

fn export_consumers(results: &EvaluationResults, path: &Path) -> Result<(), ResourceError> {
    let mut writer = csv::Writer::from_path(path).map_err(to_io_error(path))?;
    writer
        .write_record([
            "period_start",
            "period_end",
            "installation",
            "consumer",
            "energy_usage",
            "energy_unit",
            "power_mw",
            "is_valid",
            "failure_status",
            "operational_setting",
        ])
        .map_err(to_io_error(path))?;

    for period in &results.periods {
        for installation in &period.installations {
            let consumers = installation
                .generator_sets
                .iter()
                .flat_map(|g| g.consumers.iter())
                .chain(installation.fuel_consumers.iter());
            for consumer in consumers {
                writer
                    .write_record([
                        period.period.start.to_string(),
                        period.period.end.to_string(),
                        installation.name.clone(),
                        consumer.name.clone(),
                        format!("{}", consumer.energy_usage.value),
                        consumer.energy_usage.unit.to_string(),
                        consumer
                            .power
                            .map(|p| format!("{}", p))
                            .unwrap_or_default(),
                        consumer.is_valid.to_string(),
                        consumer
                            .failure_status
                            .map(|f| f.to_string())
                            .unwrap_or_default(),
                        consumer
                            .chosen_operational_setting
                            .map(|s| s.to_string())
                            .unwrap_or_default(),
                    ])
                    .map_err(to_io_error(path))?;
            }
        }
    }
    writer.flush().map_err(|source| ResourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

fn export_generator_sets(results: &EvaluationResults, path: &Path) -> Result<(), ResourceError> {
    let mut writer = csv::Writer::from_path(path).map_err(to_io_error(path))?;
    writer
        .write_record([
            "period_start",
            "installation",
            "generator_set",
            "power_demand_mw",
            "fuel_rate_sm3_per_day",
            "is_valid",
            "failure_status",
        ])
        .map_err(to_io_error(path))?;

    for period in &results.periods {
        for installation in &period.installations {
            for genset in &installation.generator_sets {
                writer
                    .write_record([
                        period.period.start.to_string(),
                        installation.name.clone(),
                        genset.name.clone(),
                        format!("{}", genset.power_demand),
                        format!("{}", genset.fuel_rate),
                        genset.is_valid.to_string(),
                        genset
                            .failure_status
                            .map(|f| f.to_string())
                            .unwrap_or_default(),
                    ])
                    .map_err(to_io_error(path))?;
            }
        }
    }
    writer.flush().map_err(|source| ResourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

fn export_emissions(results: &EvaluationResults, path: &Path) -> Result<(), ResourceError> {
    let mut writer = csv::Writer::from_path(path).map_err(to_io_error(path))?;
    writer
        .write_record([
            "period_start",
            "installation",
            "emission",
            "rate_kg_per_day",
            "period_mass_kg",
        ])
        .map_err(to_io_error(path))?;

    for period in &results.periods {
        for installation in &period.installations {
            for emission in &installation.emissions {
                writer
                    .write_record([
                        period.period.start.to_string(),
                        installation.name.clone(),
                        emission.name.clone(),
                        format!("{}", emission.rate_kg_per_day),
                        format!("{}", emission.period_mass_kg),
                    ])
                    .map_err(to_io_error(path))?;
            }
        }
    }
    writer.flush().map_err(|source| ResourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}
