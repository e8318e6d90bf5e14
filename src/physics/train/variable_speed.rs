use super::{
    evaluate_stage_chain, AsvPolicy, ChainSolver, PressureControlStrategy, TrainResult,
};
use crate::config::constants::PRESSURE_TOLERANCE_BAR;
use crate::core::results::FailureStatus;
use crate::physics::fluid::{FluidModel, FluidStream};
use crate::physics::numeric::brent;
use crate::physics::stage::CompressorStage;

/// Compressor train on a common variable-speed shaft. The shaft speed is
/// the unknown; the equation is last-stage discharge equals the requested
/// pressure, solved with Brent's method over the shared speed range.
///
/// Out of envelope: a target unreachable at maximum speed is AboveCapacity;
/// over-delivery at minimum speed engages the configured pressure control.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpeedTrain {
    pub stages: Vec<CompressorStage>,
    pub fluid: FluidModel,
    /// Shaft power cap [MW]
    pub maximum_power: Option<f64>,
    pub pressure_control: PressureControlStrategy,
}

impl VariableSpeedTrain {
    pub fn new(stages: Vec<CompressorStage>, fluid: FluidModel) -> Self {
        Self {
            stages,
            fluid,
            maximum_power: None,
            pressure_control: PressureControlStrategy::DownstreamChoke,
        }
    }

    pub fn with_maximum_power(mut self, maximum_power: f64) -> Self {
        self.maximum_power = Some(maximum_power);
        self
    }

    pub fn with_pressure_control(mut self, control: PressureControlStrategy) -> Self {
        self.pressure_control = control;
        self
    }

    /// Shared speed range: the intersection of the stage chart ranges.
    pub fn speed_range(&self) -> (f64, f64) {
        let min = self
            .stages
            .iter()
            .map(|s| s.chart.minimum_speed())
            .fold(f64::NEG_INFINITY, f64::max);
        let max = self
            .stages
            .iter()
            .map(|s| s.chart.maximum_speed())
            .fold(f64::INFINITY, f64::min);
        (min, max)
    }

    /// Largest mass rate [kg/h] before the first stage hits stonewall at
    /// maximum speed. Used by crossover capacity checks.
    pub fn maximum_mass_rate(&self, suction_pressure: f64) -> f64 {
        let stage = &self.stages[0];
        let (_, s_max) = self.speed_range();
        match self
            .fluid
            .flash_pt(suction_pressure, stage.inlet_temperature)
        {
            Ok(state) => stage.chart.maximum_rate_at_speed(s_max) * state.density,
            Err(_) => 0.0,
        }
    }

    fn solver(&self) -> ChainSolver<'_> {
        ChainSolver {
            stages: &self.stages,
            maximum_power: self.maximum_power,
        }
    }

    pub fn evaluate(
        &self,
        mass_rate: f64,
        suction_pressure: f64,
        discharge_pressure: f64,
    ) -> TrainResult {
        if self.stages.is_empty() || mass_rate < 0.0 || !mass_rate.is_finite() {
            return TrainResult::invalid(FailureStatus::InvalidRateInput);
        }
        if mass_rate == 0.0 {
            return TrainResult::idle();
        }
        if suction_pressure <= 0.0 {
            return TrainResult::invalid(FailureStatus::InvalidSuctionPressure);
        }
        if discharge_pressure <= suction_pressure {
            return TrainResult::invalid(FailureStatus::InvalidDischargePressure);
        }

        let feed = match FluidStream::new(
            self.fluid.clone(),
            mass_rate,
            suction_pressure,
            self.stages[0].inlet_temperature,
        ) {
            Ok(feed) => feed,
            Err(_) => return TrainResult::invalid(FailureStatus::InvalidSuctionPressure),
        };

        let solver = self.solver();
        let (s_min, s_max) = self.speed_range();

        let at_max = match evaluate_stage_chain(&self.stages, &feed, s_max, &AsvPolicy::None) {
            Ok(chain) => chain,
            Err(failure) => return TrainResult::invalid(failure),
        };
        if at_max.1.state.pressure < discharge_pressure - PRESSURE_TOLERANCE_BAR {
            // Even flat out the train cannot reach the target
            let (stages, outlet) = at_max;
            return solver
                .finish(&feed, stages, outlet, s_max, None, Some(discharge_pressure))
                .failed(FailureStatus::AboveCapacity);
        }

        let at_min = match evaluate_stage_chain(&self.stages, &feed, s_min, &AsvPolicy::None) {
            Ok(chain) => chain,
            Err(failure) => return TrainResult::invalid(failure),
        };
        if at_min.1.state.pressure > discharge_pressure + PRESSURE_TOLERANCE_BAR {
            return solver.engage_pressure_control(
                &feed,
                s_min,
                self.pressure_control,
                discharge_pressure,
                at_min,
            );
        }

        let residual = |speed: f64| -> f64 {
            evaluate_stage_chain(&self.stages, &feed, speed, &AsvPolicy::None)
                .map(|(_, out)| out.state.pressure - discharge_pressure)
                .unwrap_or(f64::MAX)
        };
        let speed = match brent(residual, s_min, s_max, 1.0e-7) {
            Ok(speed) => speed,
            Err(_) => return TrainResult::invalid(FailureStatus::StageNonConvergent),
        };

        match evaluate_stage_chain(&self.stages, &feed, speed, &AsvPolicy::None) {
            Ok((stages, outlet)) => {
                solver.finish(&feed, stages, outlet, speed, None, Some(discharge_pressure))
            }
            Err(failure) => TrainResult::invalid(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::chart::curve::ChartCurve;
    use crate::physics::chart::CompressorChart;
    use crate::physics::fluid::{Composition, EosModel};
    use approx::assert_relative_eq;

    fn chart() -> CompressorChart {
        let low = ChartCurve::new(
            75.0,
            vec![1500.0, 2250.0, 3000.0],
            vec![35_000.0, 30_000.0, 20_000.0],
            vec![0.72, 0.75, 0.70],
        )
        .unwrap();
        let high = ChartCurve::new(
            105.0,
            vec![2100.0, 3150.0, 4200.0],
            vec![68_000.0, 59_000.0, 39_000.0],
            vec![0.73, 0.76, 0.71],
        )
        .unwrap();
        CompressorChart::variable_speed(vec![low, high]).unwrap()
    }

    fn train() -> VariableSpeedTrain {
        let stages = vec![
            CompressorStage::new(303.15, chart()),
            CompressorStage::new(303.15, chart()),
        ];
        VariableSpeedTrain::new(stages, FluidModel::new(Composition::medium(), EosModel::Srk))
    }

    #[test]
    fn meets_target_within_speed_range() {
        let result = train().evaluate(50_000.0, 20.0, 36.0);
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        let boundary = result.boundary.unwrap();
        assert_relative_eq!(boundary.train_outlet.pressure, 36.0, epsilon = 0.05);
        assert!(result.speed > 75.0 && result.speed < 105.0);
        assert_eq!(result.stages.len(), 2);
        assert!(result.power > 0.0);
    }

    #[test]
    fn unreachable_target_is_above_capacity() {
        let result = train().evaluate(50_000.0, 20.0, 200.0);
        assert!(!result.is_valid);
        assert_eq!(result.failure_status, Some(FailureStatus::AboveCapacity));
        assert_relative_eq!(result.speed, 105.0);
    }

    #[test]
    fn low_target_engages_downstream_choke() {
        let result = train().evaluate(40_000.0, 20.0, 22.0);
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        assert_eq!(
            result.pressure_control,
            Some(PressureControlStrategy::DownstreamChoke)
        );
        let boundary = result.boundary.unwrap();
        assert!(boundary.stage_outlet.pressure > 22.0);
        assert_relative_eq!(boundary.train_outlet.pressure, 22.0, epsilon = 1e-6);
    }

    #[test]
    fn upstream_choke_reduces_suction_until_target() {
        let result = train()
            .with_pressure_control(PressureControlStrategy::UpstreamChoke)
            .evaluate(30_000.0, 20.0, 22.0);
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        let boundary = result.boundary.unwrap();
        assert!(boundary.stage_inlet.pressure < 20.0);
        assert_relative_eq!(boundary.train_inlet.pressure, 20.0);
        assert_relative_eq!(boundary.train_outlet.pressure, 22.0, epsilon = 0.05);
    }

    #[test]
    fn common_asv_meets_target_with_recirculation() {
        let result = train()
            .with_pressure_control(PressureControlStrategy::CommonAsv)
            .evaluate(40_000.0, 20.0, 22.5);
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        let boundary = result.boundary.unwrap();
        assert_relative_eq!(boundary.train_outlet.pressure, 22.5, epsilon = 0.1);
        // Recirculation pushes more mass through the impellers than the
        // delivery carries
        assert!(result.stages[0].inlet.mass_rate >= 40_000.0);
    }

    #[test]
    fn individual_asv_rate_meets_target() {
        let result = train()
            .with_pressure_control(PressureControlStrategy::IndividualAsvRate)
            .evaluate(40_000.0, 20.0, 23.0);
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        let boundary = result.boundary.unwrap();
        assert_relative_eq!(boundary.train_outlet.pressure, 23.0, epsilon = 0.1);
    }

    #[test]
    fn individual_asv_pressure_equalizes_stage_ratios() {
        let result = train()
            .with_pressure_control(PressureControlStrategy::IndividualAsvPressure)
            .evaluate(40_000.0, 20.0, 24.0);
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        let boundary = result.boundary.unwrap();
        assert_relative_eq!(boundary.train_outlet.pressure, 24.0, epsilon = 0.2);
        let r1 = result.stages[0].outlet.state.pressure / result.stages[0].inlet.state.pressure;
        let r2 = result.stages[1].outlet.state.pressure / result.stages[1].inlet.state.pressure;
        assert_relative_eq!(r1, r2, epsilon = 0.05);
    }

    #[test]
    fn power_cap_marks_above_max_power() {
        let result = train()
            .with_maximum_power(0.1)
            .evaluate(50_000.0, 20.0, 36.0);
        assert!(!result.is_valid);
        assert_eq!(result.failure_status, Some(FailureStatus::AboveMaxPower));
        assert!(result.power > 0.1);
    }

    #[test]
    fn zero_rate_is_idle() {
        let result = train().evaluate(0.0, 20.0, 40.0);
        assert!(result.is_valid);
        assert_relative_eq!(result.power, 0.0);
    }
}
