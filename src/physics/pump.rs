use serde::{Deserialize, Serialize};

use crate::config::constants::{GRAVITY, PA_PER_BAR};
use crate::core::results::FailureStatus;
use crate::physics::chart::{ChartAreaFlag, PumpChart};

/// Energy adjustment applied to chart power: power_out = factor * P + constant.
/// MECHANICAL_EFFICIENCY maps onto the factor; the two are mutually
/// exclusive in configuration and merged before this struct is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyAdjustment {
    pub factor: f64,
    /// [MW]
    pub constant: f64,
}

impl Default for EnergyAdjustment {
    fn default() -> Self {
        Self {
            factor: 1.0,
            constant: 0.0,
        }
    }
}

/// Pump model: chart plus reference fluid density and the power
/// corrections applied after the chart lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpModel {
    pub chart: PumpChart,
    /// Reference density the rates are quoted at [kg/m3]
    pub fluid_density: f64,
    pub energy_adjustment: EnergyAdjustment,
    /// Fraction of produced power lost before the shaft [0, 1)
    pub power_loss_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpResult {
    /// Final power demand [MW], adjustments and loss factor applied
    pub power: f64,
    /// Head produced [m]
    pub head: f64,
    pub efficiency: f64,
    /// Rate through the pump after recirculation [Am3/h]
    pub rate_applied: f64,
    /// Recirculated rate [Am3/h]
    pub recirculation: f64,
    pub speed: f64,
    pub is_valid: bool,
    pub failure_status: Option<FailureStatus>,
}

impl PumpResult {
    fn invalid(failure: FailureStatus) -> Self {
        Self {
            power: f64::NAN,
            head: 0.0,
            efficiency: 0.0,
            rate_applied: 0.0,
            recirculation: 0.0,
            speed: 0.0,
            is_valid: false,
            failure_status: Some(failure),
        }
    }

    fn idle() -> Self {
        Self {
            power: 0.0,
            head: 0.0,
            efficiency: 0.0,
            rate_applied: 0.0,
            recirculation: 0.0,
            speed: 0.0,
            is_valid: true,
            failure_status: None,
        }
    }
}

impl PumpModel {
    pub fn new(chart: PumpChart, fluid_density: f64) -> Self {
        Self {
            chart,
            fluid_density,
            energy_adjustment: EnergyAdjustment::default(),
            power_loss_factor: 0.0,
        }
    }

    pub fn with_energy_adjustment(mut self, adjustment: EnergyAdjustment) -> Self {
        self.energy_adjustment = adjustment;
        self
    }

    pub fn with_power_loss_factor(mut self, factor: f64) -> Self {
        self.power_loss_factor = factor;
        self
    }

    /// Evaluate one operating point.
    ///
    /// * `rate` - standard volume rate [Sm3/day]
    /// * `suction_pressure`, `discharge_pressure` - [bara]
    /// * `density` - actual fluid density for this period [kg/m3]
    pub fn evaluate(
        &self,
        rate: f64,
        suction_pressure: f64,
        discharge_pressure: f64,
        density: f64,
    ) -> PumpResult {
        if rate < 0.0 || !rate.is_finite() {
            return PumpResult::invalid(FailureStatus::InvalidRateInput);
        }
        if rate == 0.0 {
            return PumpResult::idle();
        }
        if suction_pressure <= 0.0 {
            return PumpResult::invalid(FailureStatus::InvalidSuctionPressure);
        }
        if discharge_pressure < suction_pressure {
            return PumpResult::invalid(FailureStatus::InvalidDischargePressure);
        }

        // Standard to actual volume rate by density ratio, per day to per hour
        let actual_rate = rate / 24.0 * (self.fluid_density / density);
        let head_required =
            (discharge_pressure - suction_pressure) * PA_PER_BAR / (density * GRAVITY);

        let query = self.chart.query(actual_rate, head_required);
        let failure = match query.flag {
            ChartAreaFlag::AboveMaximumFlow => Some(FailureStatus::AboveMaxFlow),
            ChartAreaFlag::AboveMaximumHead => Some(FailureStatus::AboveMaxHead),
            _ => None,
        };
        if let Some(failure) = failure {
            return PumpResult::invalid(failure);
        }

        // mass rate [kg/h] * g * head [m] -> W h; 3.6e9 converts to MW
        let mass_rate = query.rate_applied * density;
        let hydraulic_power = mass_rate * GRAVITY * query.head / (query.efficiency * 3.6e9);
        let adjusted =
            self.energy_adjustment.factor * hydraulic_power + self.energy_adjustment.constant;
        let power = adjusted / (1.0 - self.power_loss_factor);

        PumpResult {
            power,
            head: query.head,
            efficiency: query.efficiency,
            rate_applied: query.rate_applied,
            recirculation: (query.rate_applied - actual_rate).max(0.0),
            speed: query.speed,
            is_valid: true,
            failure_status: None,
        }
    }

    /// Largest standard volume rate [Sm3/day] the pump can absorb at the
    /// given conditions. Used by the consumer-system crossover logic.
    pub fn maximum_rate(&self, density: f64) -> f64 {
        self.chart.maximum_rate() * 24.0 * density / self.fluid_density
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::chart::curve::ChartCurve;
    use approx::assert_relative_eq;

    fn water_pump() -> PumpModel {
        let curve = ChartCurve::new(
            1.0,
            vec![100.0, 250.0, 400.0],
            vec![2400.0, 2100.0, 1500.0],
            vec![0.68, 0.75, 0.70],
        )
        .unwrap();
        PumpModel::new(PumpChart::single_speed(curve), 1026.0)
    }

    #[test]
    fn zero_rate_is_idle_and_valid() {
        let result = water_pump().evaluate(0.0, 3.0, 200.0, 1026.0);
        assert!(result.is_valid);
        assert_relative_eq!(result.power, 0.0);
    }

    #[test]
    fn inverted_pressures_are_invalid() {
        let result = water_pump().evaluate(5000.0, 200.0, 3.0, 1026.0);
        assert_eq!(result.failure_status, Some(FailureStatus::InvalidDischargePressure));
    }

    #[test]
    fn nominal_point_produces_expected_power() {
        // 5000 Sm3/day at equal densities -> 208.33 Am3/h, within the curve
        let result = water_pump().evaluate(5000.0, 3.0, 200.0, 1026.0);
        assert!(result.is_valid);
        // Required head: 197e5 / (1026 * 9.81) = 1957.4 m, below the curve
        // head at that rate, so the pump chokes onto the curve
        assert!(result.head >= 1957.0);
        let mass_rate = result.rate_applied * 1026.0;
        let expected = mass_rate * 9.81 * result.head / (result.efficiency * 3.6e9);
        assert_relative_eq!(result.power, expected, epsilon = 1e-12);
    }

    #[test]
    fn equal_pressures_recirculate_at_minimum_flow() {
        // Zero head, tiny rate: ASV lifts the rate onto the minimum-flow point
        let result = water_pump().evaluate(1000.0, 3.0, 3.0, 1026.0);
        assert!(result.is_valid);
        assert_relative_eq!(result.rate_applied, 100.0);
        assert!(result.recirculation > 0.0);
        assert!(result.power > 0.0);
    }

    #[test]
    fn power_adjustments_are_applied_in_order() {
        let pump = water_pump()
            .with_energy_adjustment(EnergyAdjustment {
                factor: 1.1,
                constant: 0.5,
            })
            .with_power_loss_factor(0.05);
        let plain = water_pump().evaluate(5000.0, 3.0, 200.0, 1026.0);
        let adjusted = pump.evaluate(5000.0, 3.0, 200.0, 1026.0);
        assert_relative_eq!(
            adjusted.power,
            (1.1 * plain.power + 0.5) / 0.95,
            epsilon = 1e-12
        );
    }

    #[test]
    fn rate_above_chart_is_invalid() {
        let result = water_pump().evaluate(12_000.0, 3.0, 100.0, 1026.0);
        assert_eq!(result.failure_status, Some(FailureStatus::AboveMaxFlow));
    }
}
