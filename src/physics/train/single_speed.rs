use super::{evaluate_stage_chain, AsvPolicy, ChainSolver, PressureControlStrategy, TrainResult};
use crate::config::constants::PRESSURE_TOLERANCE_BAR;
use crate::core::results::FailureStatus;
use crate::physics::fluid::{FluidModel, FluidStream};
use crate::physics::stage::CompressorStage;

/// Compressor train on a fixed-speed shaft. With no speed to vary, the
/// pressure control is mandatory: it absorbs the whole gap between the
/// natural discharge and the requested one.
///
/// An optional maximum discharge pressure (downstream choke only) caps the
/// delivery; natural discharges above it are choked down, requested targets
/// above it are invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleSpeedTrain {
    pub stages: Vec<CompressorStage>,
    pub fluid: FluidModel,
    pub maximum_power: Option<f64>,
    pub pressure_control: PressureControlStrategy,
    pub maximum_discharge_pressure: Option<f64>,
}

impl SingleSpeedTrain {
    pub fn new(
        stages: Vec<CompressorStage>,
        fluid: FluidModel,
        pressure_control: PressureControlStrategy,
    ) -> Self {
        Self {
            stages,
            fluid,
            maximum_power: None,
            pressure_control,
            maximum_discharge_pressure: None,
        }
    }

    pub fn with_maximum_power(mut self, maximum_power: f64) -> Self {
        self.maximum_power = Some(maximum_power);
        self
    }

    pub fn with_maximum_discharge_pressure(mut self, pressure: f64) -> Self {
        self.maximum_discharge_pressure = Some(pressure);
        self
    }

    fn shaft_speed(&self) -> f64 {
        self.stages[0].chart.minimum_speed()
    }

    pub fn maximum_mass_rate(&self, suction_pressure: f64) -> f64 {
        let stage = &self.stages[0];
        match self
            .fluid
            .flash_pt(suction_pressure, stage.inlet_temperature)
        {
            Ok(state) => stage.chart.maximum_rate_at_speed(self.shaft_speed()) * state.density,
            Err(_) => 0.0,
        }
    }

    /// Evaluate the train. `requested_discharge` is the process target; when
    /// absent the train delivers its natural discharge, capped by the
    /// maximum discharge pressure.
    pub fn evaluate(
        &self,
        mass_rate: f64,
        suction_pressure: f64,
        requested_discharge: Option<f64>,
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
        if let (Some(target), Some(cap)) = (requested_discharge, self.maximum_discharge_pressure) {
            if target > cap {
                return TrainResult::invalid(FailureStatus::InvalidDischargePressure);
            }
        }
        if let Some(target) = requested_discharge {
            if target <= suction_pressure {
                return TrainResult::invalid(FailureStatus::InvalidDischargePressure);
            }
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

        let solver = ChainSolver {
            stages: &self.stages,
            maximum_power: self.maximum_power,
        };
        let speed = self.shaft_speed();

        let natural = match evaluate_stage_chain(&self.stages, &feed, speed, &AsvPolicy::None) {
            Ok(chain) => chain,
            Err(failure) => return TrainResult::invalid(failure),
        };
        let natural_discharge = natural.1.state.pressure;

        match requested_discharge {
            Some(target) => {
                if natural_discharge < target - PRESSURE_TOLERANCE_BAR {
                    let (stages, outlet) = natural;
                    return solver
                        .finish(&feed, stages, outlet, speed, None, Some(target))
                        .failed(FailureStatus::AboveCapacity);
                }
                if natural_discharge > target + PRESSURE_TOLERANCE_BAR {
                    return solver.engage_pressure_control(
                        &feed,
                        speed,
                        self.pressure_control,
                        target,
                        natural,
                    );
                }
                let (stages, outlet) = natural;
                solver.finish(&feed, stages, outlet, speed, None, Some(target))
            }
            None => {
                // No process target: deliver the natural discharge, choked
                // down to the cap when one is configured
                let (stages, outlet) = natural;
                let control = self
                    .maximum_discharge_pressure
                    .filter(|cap| natural_discharge > *cap)
                    .map(|_| self.pressure_control);
                solver.finish(
                    &feed,
                    stages,
                    outlet,
                    speed,
                    control,
                    self.maximum_discharge_pressure,
                )
            }
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

    fn single_speed_chart() -> CompressorChart {
        CompressorChart::single_speed(
            ChartCurve::new(
                98.0,
                vec![1800.0, 2700.0, 3600.0],
                vec![52_000.0, 45_000.0, 30_000.0],
                vec![0.72, 0.76, 0.70],
            )
            .unwrap(),
        )
    }

    fn train(control: PressureControlStrategy) -> SingleSpeedTrain {
        let stages = vec![
            CompressorStage::new(303.15, single_speed_chart()),
            CompressorStage::new(303.15, single_speed_chart()),
        ];
        SingleSpeedTrain::new(
            stages,
            FluidModel::new(Composition::medium(), EosModel::Srk),
            control,
        )
    }

    #[test]
    fn natural_discharge_without_target() {
        let result = train(PressureControlStrategy::DownstreamChoke).evaluate(40_000.0, 20.0, None);
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        let boundary = result.boundary.unwrap();
        assert!(boundary.train_outlet.pressure > 30.0);
        assert_relative_eq!(
            boundary.train_outlet.pressure,
            boundary.stage_outlet.pressure
        );
    }

    #[test]
    fn discharge_cap_chokes_natural_overshoot() {
        let uncapped = train(PressureControlStrategy::DownstreamChoke)
            .evaluate(40_000.0, 20.0, None)
            .boundary
            .unwrap()
            .stage_outlet
            .pressure;
        let cap = uncapped - 3.0;
        let result = train(PressureControlStrategy::DownstreamChoke)
            .with_maximum_discharge_pressure(cap)
            .evaluate(40_000.0, 20.0, None);
        assert!(result.is_valid);
        let boundary = result.boundary.unwrap();
        assert_relative_eq!(boundary.train_outlet.pressure, cap, epsilon = 1e-6);
        assert_relative_eq!(boundary.stage_outlet.pressure, uncapped, epsilon = 1e-6);
    }

    #[test]
    fn discharge_cap_leaves_low_natural_untouched() {
        let uncapped = train(PressureControlStrategy::DownstreamChoke)
            .evaluate(40_000.0, 20.0, None)
            .boundary
            .unwrap()
            .stage_outlet
            .pressure;
        let result = train(PressureControlStrategy::DownstreamChoke)
            .with_maximum_discharge_pressure(uncapped + 10.0)
            .evaluate(40_000.0, 20.0, None);
        let boundary = result.boundary.unwrap();
        assert_relative_eq!(boundary.train_outlet.pressure, uncapped, epsilon = 1e-6);
        assert!(result.pressure_control.is_none());
    }

    #[test]
    fn requested_target_above_cap_is_invalid() {
        let result = train(PressureControlStrategy::DownstreamChoke)
            .with_maximum_discharge_pressure(30.0)
            .evaluate(40_000.0, 20.0, Some(35.0));
        assert!(!result.is_valid);
        assert_eq!(
            result.failure_status,
            Some(FailureStatus::InvalidDischargePressure)
        );
    }

    #[test]
    fn requested_target_above_natural_is_above_capacity() {
        let result =
            train(PressureControlStrategy::DownstreamChoke).evaluate(40_000.0, 20.0, Some(80.0));
        assert!(!result.is_valid);
        assert_eq!(result.failure_status, Some(FailureStatus::AboveCapacity));
    }

    #[test]
    fn requested_target_below_natural_is_choked() {
        let result =
            train(PressureControlStrategy::DownstreamChoke).evaluate(40_000.0, 20.0, Some(25.0));
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        assert_eq!(
            result.pressure_control,
            Some(PressureControlStrategy::DownstreamChoke)
        );
        let boundary = result.boundary.unwrap();
        assert_relative_eq!(boundary.train_outlet.pressure, 25.0, epsilon = 1e-6);
        assert!(boundary.stage_outlet.pressure > 25.0);
    }

    #[test]
    fn zero_rate_is_idle() {
        let result = train(PressureControlStrategy::DownstreamChoke).evaluate(0.0, 20.0, Some(40.0));
        assert!(result.is_valid);
        assert_relative_eq!(result.power, 0.0);
    }
}
