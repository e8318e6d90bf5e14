use std::fmt;

use serde::Serialize;

use crate::config::temporal::Period;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EnergyUnit {
    MegaWatts,
    StandardCubicMetresPerDay,
    LitresPerDay,
}

impl fmt::Display for EnergyUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EnergyUnit::MegaWatts => write!(f, "MW"),
            EnergyUnit::StandardCubicMetresPerDay => write!(f, "Sm3/day"),
            EnergyUnit::LitresPerDay => write!(f, "l/day"),
        }
    }
}

/// Energy usage with its unit. The unit is fixed per consumer by its model
/// kind; aggregation only adds values within one unit bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyUsage {
    pub value: f64,
    pub unit: EnergyUnit,
}

impl EnergyUsage {
    pub fn megawatts(value: f64) -> Self {
        Self {
            value,
            unit: EnergyUnit::MegaWatts,
        }
    }

    pub fn sm3_per_day(value: f64) -> Self {
        Self {
            value,
            unit: EnergyUnit::StandardCubicMetresPerDay,
        }
    }

    pub fn litres_per_day(value: f64) -> Self {
        Self {
            value,
            unit: EnergyUnit::LitresPerDay,
        }
    }

    pub fn zero(unit: EnergyUnit) -> Self {
        Self { value: 0.0, unit }
    }
}

/// Why a component could not produce a valid result in a period.
/// Recorded per period and per component; never halts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureStatus {
    AboveMaxFlow,
    AboveMaxHead,
    NoFlowRate,
    BelowMinimumFlow,
    AboveCapacity,
    AboveMaxPower,
    AboveTurbineCapacity,
    InvalidRateInput,
    InvalidSuctionPressure,
    InvalidDischargePressure,
    InvalidIntermediatePressure,
    StageNonConvergent,
    OutsideConvexHull,
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FailureStatus::AboveMaxFlow => "AboveMaxFlow",
            FailureStatus::AboveMaxHead => "AboveMaxHead",
            FailureStatus::NoFlowRate => "NoFlowRate",
            FailureStatus::BelowMinimumFlow => "BelowMinimumFlow",
            FailureStatus::AboveCapacity => "AboveCapacity",
            FailureStatus::AboveMaxPower => "AboveMaxPower",
            FailureStatus::AboveTurbineCapacity => "AboveTurbineCapacity",
            FailureStatus::InvalidRateInput => "InvalidRateInput",
            FailureStatus::InvalidSuctionPressure => "InvalidSuctionPressure",
            FailureStatus::InvalidDischargePressure => "InvalidDischargePressure",
            FailureStatus::InvalidIntermediatePressure => "InvalidIntermediatePressure",
            FailureStatus::StageNonConvergent => "StageNonConvergent",
            FailureStatus::OutsideConvexHull => "OutsideConvexHull",
        };
        write!(f, "{}", name)
    }
}

/// Per-stage record reported for compressor trains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StageRecord {
    pub inlet_pressure: f64,
    pub outlet_pressure: f64,
    pub inlet_temperature: f64,
    pub outlet_temperature: f64,
    pub inlet_density: f64,
    pub outlet_density: f64,
    /// Actual volume rate through the stage [Am3/h]
    pub rate: f64,
    /// ASV recirculation [Am3/h]
    pub recirculation: f64,
    pub speed: f64,
    /// Polytropic head [J/kg]
    pub polytropic_head: f64,
    pub polytropic_efficiency: f64,
    /// Shaft power [MW]
    pub power: f64,
}

/// Per-consumer, per-period result record.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerResult {
    pub name: String,
    pub energy_usage: EnergyUsage,
    /// Shaft or electric power [MW] where applicable
    pub power: Option<f64>,
    pub is_valid: bool,
    pub failure_status: Option<FailureStatus>,
    /// 1-based index of the operational setting used; 0 means none
    pub chosen_operational_setting: Option<usize>,
    pub stages: Vec<StageRecord>,
    /// Fuel burned by this consumer [Sm3/day], when it is fuel-driven
    pub fuel_rate: Option<f64>,
}

impl ConsumerResult {
    /// Consumer cleanly gated off by CONDITION or regularity.
    pub fn gated_off(name: &str, unit: EnergyUnit) -> Self {
        Self {
            name: name.to_string(),
            energy_usage: EnergyUsage::zero(unit),
            power: Some(0.0),
            is_valid: true,
            failure_status: None,
            chosen_operational_setting: None,
            stages: Vec::new(),
            fuel_rate: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratorSetResult {
    pub name: String,
    /// Electric demand summed over the consumers [MW]
    pub power_demand: f64,
    /// Fuel rate from the power-to-fuel table [Sm3/day]
    pub fuel_rate: f64,
    pub is_valid: bool,
    pub failure_status: Option<FailureStatus>,
    pub consumers: Vec<ConsumerResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmissionResult {
    pub name: String,
    /// Stream-day emission rate [kg/day]
    pub rate_kg_per_day: f64,
    /// Calendar mass over the period, regularity applied [kg]
    pub period_mass_kg: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallationPeriodResult {
    pub name: String,
    pub regularity: f64,
    pub generator_sets: Vec<GeneratorSetResult>,
    pub fuel_consumers: Vec<ConsumerResult>,
    pub emissions: Vec<EmissionResult>,
}

impl InstallationPeriodResult {
    /// Total fuel over gensets and fuel consumers [Sm3/day], stream-day.
    pub fn total_fuel_rate(&self) -> f64 {
        let genset: f64 = self.generator_sets.iter().map(|g| g.fuel_rate).sum();
        let direct: f64 = self
            .fuel_consumers
            .iter()
            .filter_map(|c| c.fuel_rate)
            .sum();
        genset + direct
    }

    /// Aggregated electric load [MW].
    pub fn total_electric_load(&self) -> f64 {
        self.generator_sets.iter().map(|g| g.power_demand).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodResult {
    pub period: Period,
    pub installations: Vec<InstallationPeriodResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResults {
    pub asset_name: String,
    pub periods: Vec<PeriodResult>,
}

impl EvaluationResults {
    /// All results for one consumer across the horizon, in period order.
    pub fn consumer_series(&self, name: &str) -> Vec<&ConsumerResult> {
        self.periods
            .iter()
            .flat_map(|p| p.installations.iter())
            .flat_map(|i| {
                i.generator_sets
                    .iter()
                    .flat_map(|g| g.consumers.iter())
                    .chain(i.fuel_consumers.iter())
            })
            .filter(|c| c.name == name)
            .collect()
    }

    pub fn genset_series(&self, name: &str) -> Vec<&GeneratorSetResult> {
        self.periods
            .iter()
            .flat_map(|p| p.installations.iter())
            .flat_map(|i| i.generator_sets.iter())
            .filter(|g| g.name == name)
            .collect()
    }
}
