use chrono::NaiveDateTime;
use thiserror::Error;

use crate::config::expression::Expression;
use crate::config::temporal::{TemporalError, TemporalModel, TimeVector};
use crate::core::results::EnergyUnit;
use crate::core::system::ConsumerSystem;
use crate::data::timeseries_loader::TimeSeriesResource;
use crate::physics::pump::PumpModel;
use crate::physics::tabular::{SampledCompressor, TabulatedFunction};
use crate::physics::train::{
    MultiStreamTrain, SimplifiedVariableSpeedTrain, SingleSpeedTrain, VariableSpeedTrain,
};
use crate::physics::turbine::Turbine;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("power and fuel columns must have equal length, at least two rows")]
    LengthMismatch,
    #[error("power values must be strictly increasing")]
    PowerNotIncreasing,
}

/// Generator-set power-to-fuel table. Loads above the last tabulated power
/// clamp to the last fuel value and flag the overload.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerFuelTable {
    power: Vec<f64>,
    fuel: Vec<f64>,
}

impl PowerFuelTable {
    pub fn new(power: Vec<f64>, fuel: Vec<f64>) -> Result<Self, TableError> {
        if power.len() != fuel.len() || power.len() < 2 {
            return Err(TableError::LengthMismatch);
        }
        if power.windows(2).any(|w| w[1] <= w[0]) {
            return Err(TableError::PowerNotIncreasing);
        }
        Ok(Self { power, fuel })
    }

    pub fn maximum_power(&self) -> f64 {
        *self.power.last().expect("validated non-empty")
    }

    /// Fuel for an electric load; the bool marks a clamped overload.
    pub fn fuel_for_load(&self, load: f64) -> (f64, bool) {
        if load > self.maximum_power() {
            return (*self.fuel.last().expect("validated non-empty"), true);
        }
        (
            crate::physics::numeric::interp_linear(&self.power, &self.fuel, load.max(0.0)),
            false,
        )
    }
}

/// Output column a tabulated energy function carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabulatedOutput {
    Power,
    Fuel,
}

/// Pressure specification for a system setting before resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum PressureExpressions {
    Common(Expression),
    PerUnit(Vec<Expression>),
}

/// Operational setting before per-period resolution: every number may be
/// an expression over time series and variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemSettingSpec {
    pub rate_fractions: Option<Vec<Expression>>,
    pub rates: Option<Vec<Expression>>,
    pub suction_pressures: PressureExpressions,
    pub discharge_pressures: PressureExpressions,
    /// 1-based crossover targets, 0 = none
    pub crossover: Option<Vec<usize>>,
}

/// Energy usage model of a consumer, dispatched by tag during evaluation.
/// The same variant set serves electric consumers (under a generator set)
/// and fuel consumers; context decides how the output is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum EnergyModel {
    /// Direct electric load [MW]
    DirectLoad { load: Expression },
    /// Direct fuel rate [Sm3/day]
    DirectFuel { fuel_rate: Expression },
    Pump {
        pump: PumpModel,
        rate: Expression,
        suction_pressure: Expression,
        discharge_pressure: Expression,
        /// Per-period density override [kg/m3]
        density: Option<Expression>,
    },
    PumpSystem {
        system: ConsumerSystem,
        settings: Vec<SystemSettingSpec>,
        total_rate: Expression,
    },
    CompressorSampled {
        sampled: SampledCompressor,
        rate: Expression,
        suction_pressure: Option<Expression>,
        discharge_pressure: Option<Expression>,
    },
    CompressorVariableSpeed {
        train: VariableSpeedTrain,
        rate: Expression,
        suction_pressure: Expression,
        discharge_pressure: Expression,
    },
    CompressorSingleSpeed {
        train: SingleSpeedTrain,
        rate: Expression,
        suction_pressure: Expression,
        discharge_pressure: Option<Expression>,
    },
    CompressorSimplified {
        train: SimplifiedVariableSpeedTrain,
        rate: Expression,
        suction_pressure: Expression,
        discharge_pressure: Expression,
    },
    CompressorSystem {
        system: ConsumerSystem,
        settings: Vec<SystemSettingSpec>,
        total_rate: Expression,
    },
    /// Compressor shaft power fed to a gas turbine driver
    CompressorWithTurbine {
        compressor: Box<EnergyModel>,
        turbine: Turbine,
    },
    Tabulated {
        function: TabulatedFunction,
        output: TabulatedOutput,
        /// Expression per table axis, in axis order
        variables: Vec<Expression>,
    },
    MultiStream {
        train: MultiStreamTrain,
        /// One rate expression per train stream [Sm3/day]
        stream_rates: Vec<Expression>,
        suction_pressure: Expression,
        discharge_pressure: Expression,
        interstage_pressure: Option<Expression>,
    },
}

impl EnergyModel {
    /// Discriminant label; consumers may not change model type over time.
    pub fn kind_name(&self) -> &'static str {
        match self {
            EnergyModel::DirectLoad { .. } => "DIRECT_LOAD",
            EnergyModel::DirectFuel { .. } => "DIRECT_FUEL",
            EnergyModel::Pump { .. } => "PUMP",
            EnergyModel::PumpSystem { .. } => "PUMP_SYSTEM",
            EnergyModel::CompressorSampled { .. } => "COMPRESSOR_SAMPLED",
            EnergyModel::CompressorVariableSpeed { .. } => "COMPRESSOR_VARIABLE_SPEED",
            EnergyModel::CompressorSingleSpeed { .. } => "COMPRESSOR_SINGLE_SPEED",
            EnergyModel::CompressorSimplified { .. } => "COMPRESSOR_SIMPLIFIED",
            EnergyModel::CompressorSystem { .. } => "COMPRESSOR_SYSTEM",
            EnergyModel::CompressorWithTurbine { .. } => "COMPRESSOR_WITH_TURBINE",
            EnergyModel::Tabulated { .. } => "TABULATED",
            EnergyModel::MultiStream { .. } => "COMPRESSOR_MULTI_STREAM",
        }
    }

    /// Unit of the energy this model reports.
    pub fn energy_unit(&self) -> EnergyUnit {
        match self {
            EnergyModel::DirectFuel { .. } | EnergyModel::CompressorWithTurbine { .. } => {
                EnergyUnit::StandardCubicMetresPerDay
            }
            EnergyModel::CompressorSampled { sampled, .. } => {
                if sampled.power.is_none() {
                    EnergyUnit::StandardCubicMetresPerDay
                } else {
                    EnergyUnit::MegaWatts
                }
            }
            EnergyModel::Tabulated { output, .. } => match output {
                TabulatedOutput::Power => EnergyUnit::MegaWatts,
                TabulatedOutput::Fuel => EnergyUnit::StandardCubicMetresPerDay,
            },
            _ => EnergyUnit::MegaWatts,
        }
    }
}

/// A consumer: named, categorized, with a temporal energy model and the
/// optional CONDITION gate and power loss factor.
#[derive(Debug, Clone, PartialEq)]
pub struct Consumer {
    pub name: String,
    pub category: String,
    /// Fuel type burned directly; None for electric consumers
    pub fuel: Option<String>,
    pub condition: Option<Expression>,
    pub power_loss_factor: Option<Expression>,
    pub model: TemporalModel<EnergyModel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSet {
    pub name: String,
    pub category: String,
    /// Fuel type burned by the engine
    pub fuel: String,
    pub electricity_to_fuel: TemporalModel<PowerFuelTable>,
    pub consumers: Vec<Consumer>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub name: String,
    /// Emission factor [kg per Sm3 fuel]
    pub factor: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuelType {
    pub name: String,
    pub emissions: Vec<Emission>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Installation {
    pub name: String,
    /// Stream-day to calendar-day fraction; defaults to 1
    pub regularity: Option<Expression>,
    pub generator_sets: Vec<GeneratorSet>,
    pub fuel_consumers: Vec<Consumer>,
}

/// The asset: the complete immutable facility description evaluated over
/// the global time horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityModel {
    pub name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub time_series: Vec<TimeSeriesResource>,
    /// Named variables, resolvable in definition order
    pub variables: Vec<(String, Expression)>,
    pub fuel_types: Vec<FuelType>,
    pub installations: Vec<Installation>,
}

impl FacilityModel {
    /// Build the global time vector: influencing series instants plus
    /// temporal-model keys, clipped to [start, end).
    pub fn time_vector(&self) -> Result<TimeVector, TemporalError> {
        let mut instants: Vec<NaiveDateTime> = Vec::new();
        for series in &self.time_series {
            if series.influence_time_vector {
                instants.extend(series.instants.iter().copied());
            }
        }
        for installation in &self.installations {
            for genset in &installation.generator_sets {
                instants.extend(genset.electricity_to_fuel.keys());
                for consumer in &genset.consumers {
                    instants.extend(consumer.model.keys());
                }
            }
            for consumer in &installation.fuel_consumers {
                instants.extend(consumer.model.keys());
            }
        }
        TimeVector::build(self.start, self.end, instants)
    }

    pub fn fuel_type(&self, name: &str) -> Option<&FuelType> {
        self.fuel_types.iter().find(|f| f.name == name)
    }
}

/// Temporal models attached to a consumer may not switch model type.
pub fn model_type_is_stable(model: &TemporalModel<EnergyModel>) -> bool {
    let mut kinds = model.values().map(|m| m.kind_name());
    match kinds.next() {
        Some(first) => kinds.all(|k| k == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn genset_table_interpolates_and_clamps() {
        let table =
            PowerFuelTable::new(vec![0.0, 10.0, 40.0], vec![0.0, 10_000.0, 40_000.0]).unwrap();
        let (fuel, overload) = table.fuel_for_load(25.0);
        assert_relative_eq!(fuel, 25_000.0);
        assert!(!overload);

        let (fuel, overload) = table.fuel_for_load(45.0);
        assert_relative_eq!(fuel, 40_000.0);
        assert!(overload);
    }

    #[test]
    fn non_increasing_power_is_rejected() {
        let err = PowerFuelTable::new(vec![0.0, 10.0, 10.0], vec![0.0, 1.0, 2.0]).unwrap_err();
        assert_eq!(err, TableError::PowerNotIncreasing);
    }

    #[test]
    fn model_type_stability_check() {
        use chrono::NaiveDate;
        let instant = |y: i32| {
            NaiveDate::from_ymd_opt(y, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        };
        let stable = TemporalModel::new(vec![
            (
                instant(2024),
                EnergyModel::DirectLoad {
                    load: Expression::constant(5.0),
                },
            ),
            (
                instant(2025),
                EnergyModel::DirectLoad {
                    load: Expression::constant(7.0),
                },
            ),
        ])
        .unwrap();
        assert!(model_type_is_stable(&stable));

        let switching = TemporalModel::new(vec![
            (
                instant(2024),
                EnergyModel::DirectLoad {
                    load: Expression::constant(5.0),
                },
            ),
            (
                instant(2025),
                EnergyModel::DirectFuel {
                    fuel_rate: Expression::constant(1000.0),
                },
            ),
        ])
        .unwrap();
        assert!(!model_type_is_stable(&switching));
    }
}
