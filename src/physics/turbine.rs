use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::constants::SECONDS_PER_DAY;
use crate::core::results::FailureStatus;
use crate::physics::numeric::interp_linear;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TurbineDefinitionError {
    #[error("turbine loads and efficiencies must have equal length, at least two points")]
    LengthMismatch,
    #[error("turbine loads must start at zero and increase strictly")]
    LoadsNotIncreasing,
    #[error("turbine efficiencies must start at zero and stay within [0, 1]")]
    EfficiencyOutOfRange,
    #[error("lower heating value must be positive")]
    NonPositiveHeatingValue,
}

/// Gas turbine driver: tabulated load to efficiency, fuel from the lower
/// heating value of the fuel gas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turbine {
    /// Load points [MW], starting at 0
    loads: Vec<f64>,
    /// Thermal efficiency at each load point, starting at 0
    efficiencies: Vec<f64>,
    /// Lower heating value [MJ/Sm3]
    lower_heating_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurbineResult {
    /// Fuel consumption [Sm3/day]
    pub fuel_rate: f64,
    /// Interpolated thermal efficiency; zero at zero load
    pub efficiency: f64,
    pub load: f64,
    pub is_valid: bool,
    pub failure_status: Option<FailureStatus>,
}

impl Turbine {
    pub fn new(
        loads: Vec<f64>,
        efficiencies: Vec<f64>,
        lower_heating_value: f64,
    ) -> Result<Self, TurbineDefinitionError> {
        if loads.len() != efficiencies.len() || loads.len() < 2 {
            return Err(TurbineDefinitionError::LengthMismatch);
        }
        if loads[0] != 0.0 || loads.windows(2).any(|w| w[1] <= w[0]) {
            return Err(TurbineDefinitionError::LoadsNotIncreasing);
        }
        if efficiencies[0] != 0.0 || efficiencies.iter().any(|e| *e < 0.0 || *e > 1.0) {
            return Err(TurbineDefinitionError::EfficiencyOutOfRange);
        }
        if lower_heating_value <= 0.0 {
            return Err(TurbineDefinitionError::NonPositiveHeatingValue);
        }
        Ok(Self {
            loads,
            efficiencies,
            lower_heating_value,
        })
    }

    pub fn maximum_load(&self) -> f64 {
        *self.loads.last().expect("validated non-empty")
    }

    /// Fuel for a requested shaft load [MW].
    ///
    /// fuel = load * 86400 / (LHV * efficiency), load in MW, LHV in MJ/Sm3.
    pub fn evaluate(&self, load: f64) -> TurbineResult {
        if load < 0.0 || !load.is_finite() {
            return TurbineResult {
                fuel_rate: f64::NAN,
                efficiency: 0.0,
                load,
                is_valid: false,
                failure_status: Some(FailureStatus::InvalidRateInput),
            };
        }
        if load == 0.0 {
            return TurbineResult {
                fuel_rate: 0.0,
                efficiency: 0.0,
                load,
                is_valid: true,
                failure_status: None,
            };
        }
        if load > self.maximum_load() {
            return TurbineResult {
                fuel_rate: f64::NAN,
                efficiency: 0.0,
                load,
                is_valid: false,
                failure_status: Some(FailureStatus::AboveTurbineCapacity),
            };
        }

        let efficiency = interp_linear(&self.loads, &self.efficiencies, load);
        let fuel_rate = load * SECONDS_PER_DAY / (self.lower_heating_value * efficiency);
        TurbineResult {
            fuel_rate,
            efficiency,
            load,
            is_valid: true,
            failure_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn turbine() -> Turbine {
        Turbine::new(
            vec![0.0, 2.352, 11.399, 15.0, 22.767],
            vec![0.0, 0.138, 0.310, 0.328, 0.362],
            38.0,
        )
        .unwrap()
    }

    #[test]
    fn zero_load_burns_no_fuel() {
        let result = turbine().evaluate(0.0);
        assert!(result.is_valid);
        assert_relative_eq!(result.fuel_rate, 0.0);
    }

    #[test]
    fn tabulated_point_matches_closed_form() {
        let result = turbine().evaluate(15.0);
        assert!(result.is_valid);
        assert_relative_eq!(result.efficiency, 0.328, epsilon = 1e-12);
        assert_relative_eq!(result.fuel_rate, 15.0 * 86_400.0 / (38.0 * 0.328), epsilon = 1e-9);
    }

    #[test]
    fn load_above_capacity_is_invalid() {
        let result = turbine().evaluate(25.0);
        assert!(!result.is_valid);
        assert_eq!(result.failure_status, Some(FailureStatus::AboveTurbineCapacity));
    }

    #[test]
    fn efficiency_interpolates_between_points() {
        let result = turbine().evaluate(13.0);
        assert!(result.efficiency > 0.310 && result.efficiency < 0.328);
    }

    #[test]
    fn loads_must_start_at_zero() {
        let err = Turbine::new(vec![1.0, 2.0], vec![0.0, 0.3], 38.0).unwrap_err();
        assert_eq!(err, TurbineDefinitionError::LoadsNotIncreasing);
    }
}
