use serde::{Deserialize, Serialize};

use crate::core::results::{FailureStatus, StageRecord};
use crate::physics::pump::PumpModel;
use crate::physics::train::{SingleSpeedTrain, VariableSpeedTrain};

/// One unit inside a consumer system.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemUnit {
    Pump(PumpModel),
    VariableSpeedTrain(VariableSpeedTrain),
    SingleSpeedTrain(SingleSpeedTrain),
}

/// Per-setting rate specification: fractions of a total system rate
/// (summing to one) or explicit per-unit rates [Sm3/day].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RateSpec {
    Fractions(Vec<f64>),
    Rates(Vec<f64>),
}

/// Scalar pressure shared by all units, or one value per unit [bara].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PressureSpec {
    Common(f64),
    PerUnit(Vec<f64>),
}

impl PressureSpec {
    fn for_unit(&self, index: usize) -> f64 {
        match self {
            PressureSpec::Common(value) => *value,
            PressureSpec::PerUnit(values) => values[index],
        }
    }
}

/// One operational setting, fully resolved to numbers for a period.
/// Crossover targets are 1-based unit indices; 0 means none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalSetting {
    pub rates: RateSpec,
    pub suction_pressures: PressureSpec,
    pub discharge_pressures: PressureSpec,
    pub crossover: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub name: String,
    /// Rate allocated to the unit after crossover [Sm3/day]
    pub rate: f64,
    /// Shaft power [MW]
    pub power: f64,
    pub is_valid: bool,
    pub failure_status: Option<FailureStatus>,
    pub stages: Vec<StageRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemResult {
    /// 1-based accepted setting; 0 when every setting failed
    pub chosen_setting: usize,
    pub unit_outcomes: Vec<UnitOutcome>,
    /// Total power [MW]; NaN when the evaluation is invalid
    pub power: f64,
    pub is_valid: bool,
}

/// Ordered-settings selector: settings are tried first to last and the
/// first one whose units all evaluate valid wins. When none does, the last
/// setting's results are kept so the report still carries numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSystem {
    pub units: Vec<(String, SystemUnit)>,
}

impl ConsumerSystem {
    pub fn new(units: Vec<(String, SystemUnit)>) -> Self {
        Self { units }
    }

    pub fn evaluate(&self, settings: &[OperationalSetting], total_rate: f64) -> SystemResult {
        let mut last: Option<Vec<UnitOutcome>> = None;
        for (index, setting) in settings.iter().enumerate() {
            let outcomes = self.evaluate_setting(setting, total_rate);
            if outcomes.iter().all(|o| o.is_valid) {
                let power = outcomes.iter().map(|o| o.power).sum();
                return SystemResult {
                    chosen_setting: index + 1,
                    unit_outcomes: outcomes,
                    power,
                    is_valid: true,
                };
            }
            last = Some(outcomes);
        }

        // Exhausted: keep the last setting's numbers, aggregate as NaN
        let unit_outcomes = last.unwrap_or_default();
        SystemResult {
            chosen_setting: 0,
            unit_outcomes,
            power: f64::NAN,
            is_valid: false,
        }
    }

    fn evaluate_setting(&self, setting: &OperationalSetting, total_rate: f64) -> Vec<UnitOutcome> {
        let mut rates: Vec<f64> = match &setting.rates {
            RateSpec::Fractions(fractions) => {
                fractions.iter().map(|f| f * total_rate).collect()
            }
            RateSpec::Rates(rates) => rates.clone(),
        };

        // Crossover: shift excess above a unit's capacity to its target.
        // The map is acyclic (checked at configuration time), so N passes
        // are enough for any chain.
        if let Some(crossover) = &setting.crossover {
            for _ in 0..self.units.len() {
                let mut moved = false;
                for (index, target) in crossover.iter().enumerate() {
                    if *target == 0 {
                        continue;
                    }
                    let capacity = self.unit_capacity(
                        index,
                        setting.suction_pressures.for_unit(index),
                        setting.discharge_pressures.for_unit(index),
                    );
                    if rates[index] > capacity {
                        let excess = rates[index] - capacity;
                        rates[index] = capacity;
                        rates[*target - 1] += excess;
                        moved = true;
                    }
                }
                if !moved {
                    break;
                }
            }
        }

        self.units
            .iter()
            .enumerate()
            .map(|(index, (name, unit))| {
                self.evaluate_unit(
                    name,
                    unit,
                    rates[index],
                    setting.suction_pressures.for_unit(index),
                    setting.discharge_pressures.for_unit(index),
                )
            })
            .collect()
    }

    fn unit_capacity(&self, index: usize, suction: f64, _discharge: f64) -> f64 {
        match &self.units[index].1 {
            SystemUnit::Pump(pump) => pump.maximum_rate(pump.fluid_density),
            SystemUnit::VariableSpeedTrain(train) => match train.fluid.standard_conditions_density()
            {
                Ok(density) => train.maximum_mass_rate(suction) / density * 24.0,
                Err(_) => 0.0,
            },
            SystemUnit::SingleSpeedTrain(train) => match train.fluid.standard_conditions_density() {
                Ok(density) => train.maximum_mass_rate(suction) / density * 24.0,
                Err(_) => 0.0,
            },
        }
    }

    fn evaluate_unit(
        &self,
        name: &str,
        unit: &SystemUnit,
        rate: f64,
        suction: f64,
        discharge: f64,
    ) -> UnitOutcome {
        match unit {
            SystemUnit::Pump(pump) => {
                let result = pump.evaluate(rate, suction, discharge, pump.fluid_density);
                UnitOutcome {
                    name: name.to_string(),
                    rate,
                    power: result.power,
                    is_valid: result.is_valid,
                    failure_status: result.failure_status,
                    stages: Vec::new(),
                }
            }
            SystemUnit::VariableSpeedTrain(train) => {
                let result = match train.fluid.standard_conditions_density() {
                    Ok(density) => train.evaluate(rate * density / 24.0, suction, discharge),
                    Err(_) => crate::physics::train::TrainResult::invalid(
                        FailureStatus::InvalidRateInput,
                    ),
                };
                UnitOutcome {
                    name: name.to_string(),
                    rate,
                    power: result.power,
                    is_valid: result.is_valid,
                    failure_status: result.failure_status,
                    stages: result.stage_records(),
                }
            }
            SystemUnit::SingleSpeedTrain(train) => {
                let result = match train.fluid.standard_conditions_density() {
                    Ok(density) => {
                        train.evaluate(rate * density / 24.0, suction, Some(discharge))
                    }
                    Err(_) => crate::physics::train::TrainResult::invalid(
                        FailureStatus::InvalidRateInput,
                    ),
                };
                UnitOutcome {
                    name: name.to_string(),
                    rate,
                    power: result.power,
                    is_valid: result.is_valid,
                    failure_status: result.failure_status,
                    stages: result.stage_records(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::chart::curve::ChartCurve;
    use crate::physics::chart::PumpChart;
    use approx::assert_relative_eq;

    fn pump() -> PumpModel {
        // Capacity: 300 Am3/h -> 7200 Sm3/day at matched densities
        let curve = ChartCurve::new(
            1.0,
            vec![50.0, 150.0, 300.0],
            vec![2400.0, 2100.0, 1500.0],
            vec![0.68, 0.75, 0.70],
        )
        .unwrap();
        PumpModel::new(PumpChart::single_speed(curve), 1026.0)
    }

    fn two_pump_system() -> ConsumerSystem {
        ConsumerSystem::new(vec![
            ("pump_a".to_string(), SystemUnit::Pump(pump())),
            ("pump_b".to_string(), SystemUnit::Pump(pump())),
        ])
    }

    fn setting(fractions: Vec<f64>, crossover: Option<Vec<usize>>) -> OperationalSetting {
        OperationalSetting {
            rates: RateSpec::Fractions(fractions),
            suction_pressures: PressureSpec::Common(3.0),
            discharge_pressures: PressureSpec::Common(100.0),
            crossover,
        }
    }

    #[test]
    fn first_feasible_setting_wins() {
        let system = two_pump_system();
        let settings = vec![setting(vec![1.0, 0.0], None), setting(vec![0.5, 0.5], None)];
        // Within one pump's capacity
        let result = system.evaluate(&settings, 5000.0);
        assert!(result.is_valid);
        assert_eq!(result.chosen_setting, 1);
        assert_relative_eq!(result.unit_outcomes[0].rate, 5000.0);
        assert_relative_eq!(result.unit_outcomes[1].rate, 0.0);
    }

    #[test]
    fn falls_through_to_split_when_one_pump_overflows() {
        let system = two_pump_system();
        let settings = vec![setting(vec![1.0, 0.0], None), setting(vec![0.5, 0.5], None)];
        // One pump takes 7200 Sm3/day at most
        let result = system.evaluate(&settings, 10_000.0);
        assert!(result.is_valid);
        assert_eq!(result.chosen_setting, 2);
        assert_relative_eq!(result.unit_outcomes[0].rate, 5000.0);
        assert_relative_eq!(result.unit_outcomes[1].rate, 5000.0);
    }

    #[test]
    fn crossover_moves_excess_to_target() {
        let system = two_pump_system();
        let settings = vec![setting(vec![1.0, 0.0], Some(vec![2, 0]))];
        let result = system.evaluate(&settings, 10_000.0);
        assert!(result.is_valid);
        assert_eq!(result.chosen_setting, 1);
        assert_relative_eq!(result.unit_outcomes[0].rate, 7200.0);
        assert_relative_eq!(result.unit_outcomes[1].rate, 2800.0);
    }

    #[test]
    fn exhausted_settings_keep_last_results() {
        let system = two_pump_system();
        let settings = vec![setting(vec![1.0, 0.0], None), setting(vec![0.5, 0.5], None)];
        // Beyond both pumps together
        let result = system.evaluate(&settings, 20_000.0);
        assert!(!result.is_valid);
        assert_eq!(result.chosen_setting, 0);
        assert!(result.power.is_nan());
        assert_eq!(result.unit_outcomes.len(), 2);
        assert_eq!(
            result.unit_outcomes[0].failure_status,
            Some(FailureStatus::AboveMaxFlow)
        );
    }
}
