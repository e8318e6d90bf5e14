use std::collections::HashSet;

use thiserror::Error;

use crate::config::facility::{model_type_is_stable, FacilityModel};
use crate::physics::train::{MultiStreamTrain, StreamKind};

/// Configuration-stratum errors: the run is rejected before evaluation
/// starts. Evaluation-stratum outcomes live in `core::results`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },
    #[error("composition of '{owner}' is missing methane")]
    MissingMethane { owner: String },
    #[error("economic field '{field}' is not supported")]
    EconomicFieldRejected { field: String },
    #[error("consumer '{name}' changes energy model type over time")]
    TemporalTypeChange { name: String },
    #[error("'{name}' sets both MECHANICAL_EFFICIENCY and POWER_ADJUSTMENT_FACTOR")]
    MechanicalEfficiencyWithAdjustment { name: String },
    #[error("simplified train '{name}' does not accept {field}")]
    SimplifiedTrainUnsupportedField { name: String, field: &'static str },
    #[error("crossover of '{name}' contains a cycle")]
    CrossoverCycle { name: String },
    #[error("crossover target {target} of '{name}' is out of range")]
    CrossoverTargetOutOfRange { name: String, target: usize },
    #[error("interstage pressure control of '{name}' sits on the first stage")]
    InterstageControlOnFirstStage { name: String },
    #[error("interstage pressure control of '{name}' is out of range")]
    InterstageControlOutOfRange { name: String },
    #[error("train '{name}' has no ingoing stream at the first stage")]
    MissingTrainFeed { name: String },
    #[error("stream '{stream}' of train '{name}' attaches to a stage that does not exist")]
    StreamStageOutOfRange { name: String, stream: String },
    #[error("maximum discharge pressure on '{name}' requires DOWNSTREAM_CHOKE")]
    MaximumDischargeWithoutDownstreamChoke { name: String },
    #[error("rate fractions of a setting in '{name}' do not sum to one")]
    RateFractionsNotNormalized { name: String },
    #[error("fuel type '{fuel}' referenced by '{name}' is not defined")]
    UnknownFuelType { name: String, fuel: String },
    #[error("'{name}': {detail}")]
    InvalidDefinition { name: String, detail: String },
}

/// Field names that are rejected wherever they appear: the calculator has
/// no economic model.
const ECONOMIC_FIELDS: [&str; 5] = ["TAX", "PRICE", "QUOTA", "EMISSION_TAX", "EMISSION_QUOTA"];

pub fn reject_economic_fields<'a>(
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    for field in fields {
        let upper = field.to_ascii_uppercase();
        if ECONOMIC_FIELDS.contains(&upper.as_str()) {
            return Err(ConfigError::EconomicFieldRejected {
                field: field.to_string(),
            });
        }
    }
    Ok(())
}

pub fn check_unique_names<'a>(
    kind: &'static str,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Crossover maps are 1-based with 0 meaning none. Targets must exist and
/// following them may never loop.
pub fn check_crossover(name: &str, crossover: &[usize]) -> Result<(), ConfigError> {
    for target in crossover {
        if *target > crossover.len() {
            return Err(ConfigError::CrossoverTargetOutOfRange {
                name: name.to_string(),
                target: *target,
            });
        }
    }
    for start in 0..crossover.len() {
        let mut visited = HashSet::new();
        let mut current = start;
        loop {
            if !visited.insert(current) {
                return Err(ConfigError::CrossoverCycle {
                    name: name.to_string(),
                });
            }
            match crossover[current] {
                0 => break,
                target => current = target - 1,
            }
        }
    }
    Ok(())
}

/// Structural checks on a multi-stream train: a feed at the first stage,
/// stream attachments within range, the interstage control off the first
/// stage.
pub fn check_multi_stream_train(name: &str, train: &MultiStreamTrain) -> Result<(), ConfigError> {
    let has_feed = train
        .streams
        .iter()
        .any(|s| s.stage_index == 0 && matches!(s.kind, StreamKind::Ingoing(_)));
    if !has_feed {
        return Err(ConfigError::MissingTrainFeed {
            name: name.to_string(),
        });
    }
    for stream in &train.streams {
        if stream.stage_index >= train.stages.len() {
            return Err(ConfigError::StreamStageOutOfRange {
                name: name.to_string(),
                stream: stream.name.clone(),
            });
        }
    }
    if let Some(control) = train.interstage {
        if control.stage_index == 0 {
            return Err(ConfigError::InterstageControlOnFirstStage {
                name: name.to_string(),
            });
        }
        if control.stage_index >= train.stages.len() {
            return Err(ConfigError::InterstageControlOutOfRange {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Whole-model validation run once after building, before evaluation.
pub fn validate_model(model: &FacilityModel) -> Result<(), ConfigError> {
    check_unique_names(
        "installation",
        model.installations.iter().map(|i| i.name.as_str()),
    )?;
    check_unique_names("fuel type", model.fuel_types.iter().map(|f| f.name.as_str()))?;
    check_unique_names(
        "time series",
        model.time_series.iter().map(|t| t.name.as_str()),
    )?;
    check_unique_names("variable", model.variables.iter().map(|(n, _)| n.as_str()))?;

    for installation in &model.installations {
        let consumer_names: Vec<&str> = installation
            .generator_sets
            .iter()
            .flat_map(|g| g.consumers.iter().map(|c| c.name.as_str()))
            .chain(installation.fuel_consumers.iter().map(|c| c.name.as_str()))
            .collect();
        check_unique_names("consumer", consumer_names)?;
        check_unique_names(
            "generator set",
            installation.generator_sets.iter().map(|g| g.name.as_str()),
        )?;

        for genset in &installation.generator_sets {
            if model.fuel_type(&genset.fuel).is_none() {
                return Err(ConfigError::UnknownFuelType {
                    name: genset.name.clone(),
                    fuel: genset.fuel.clone(),
                });
            }
            for consumer in &genset.consumers {
                if !model_type_is_stable(&consumer.model) {
                    return Err(ConfigError::TemporalTypeChange {
                        name: consumer.name.clone(),
                    });
                }
            }
        }
        for consumer in &installation.fuel_consumers {
            if !model_type_is_stable(&consumer.model) {
                return Err(ConfigError::TemporalTypeChange {
                    name: consumer.name.clone(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::chart::curve::ChartCurve;
    use crate::physics::chart::CompressorChart;
    use crate::physics::fluid::{Composition, EosModel, FluidModel};
    use crate::physics::stage::CompressorStage;
    use crate::physics::train::{
        InterstagePressureControl, PressureControlStrategy, TrainStream,
    };

    #[test]
    fn duplicate_names_are_rejected() {
        let err = check_unique_names("consumer", ["a", "b", "a"]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateName {
                kind: "consumer",
                name: "a".to_string()
            }
        );
    }

    #[test]
    fn economic_fields_are_rejected() {
        assert!(reject_economic_fields(["NAME", "CATEGORY"]).is_ok());
        let err = reject_economic_fields(["NAME", "tax"]).unwrap_err();
        assert!(matches!(err, ConfigError::EconomicFieldRejected { .. }));
    }

    #[test]
    fn crossover_cycles_are_rejected() {
        assert!(check_crossover("sys", &[2, 0]).is_ok());
        assert!(check_crossover("sys", &[2, 3, 0]).is_ok());
        let err = check_crossover("sys", &[2, 1]).unwrap_err();
        assert!(matches!(err, ConfigError::CrossoverCycle { .. }));
        let err = check_crossover("sys", &[5, 0]).unwrap_err();
        assert!(matches!(err, ConfigError::CrossoverTargetOutOfRange { .. }));
    }

    fn chart() -> CompressorChart {
        CompressorChart::single_speed(
            ChartCurve::new(
                98.0,
                vec![1000.0, 2000.0],
                vec![40_000.0, 30_000.0],
                vec![0.7, 0.7],
            )
            .unwrap(),
        )
    }

    #[test]
    fn interstage_control_on_first_stage_is_rejected() {
        let train = MultiStreamTrain::new(
            vec![
                CompressorStage::new(303.15, chart()),
                CompressorStage::new(303.15, chart()),
            ],
            vec![TrainStream {
                name: "feed".to_string(),
                stage_index: 0,
                kind: StreamKind::Ingoing(FluidModel::new(Composition::medium(), EosModel::Srk)),
            }],
        )
        .with_interstage_control(InterstagePressureControl {
            stage_index: 0,
            upstream_control: PressureControlStrategy::UpstreamChoke,
            downstream_control: PressureControlStrategy::DownstreamChoke,
        });
        let err = check_multi_stream_train("t", &train).unwrap_err();
        assert!(matches!(err, ConfigError::InterstageControlOnFirstStage { .. }));
    }

    #[test]
    fn train_without_feed_is_rejected() {
        let train = MultiStreamTrain::new(
            vec![CompressorStage::new(303.15, chart())],
            vec![TrainStream {
                name: "export".to_string(),
                stage_index: 0,
                kind: StreamKind::Outgoing,
            }],
        );
        let err = check_multi_stream_train("t", &train).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTrainFeed { .. }));
    }
}
