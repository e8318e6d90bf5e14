use super::{total_power, TrainBoundaryStates, TrainResult};
use crate::config::constants::{
    GAS_CONSTANT, JOULES_PER_HOUR_PER_MW, MAX_SOLVER_ITERATIONS, STAGE_CONVERGENCE_TOLERANCE,
};
use crate::core::results::FailureStatus;
use crate::physics::chart::{
    ChartAreaFlag, CompressorChartQuery, GenericChartFromDesignPoint, GenericChartFromInput,
};
use crate::physics::fluid::{FluidModel, FluidStream};
use crate::physics::numeric::brent;
use crate::physics::stage::StageCalculation;

/// Chart options accepted by the simplified train. Anything else is
/// rejected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimplifiedChart {
    FromDesignPoint(GenericChartFromDesignPoint),
    FromInput(GenericChartFromInput),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplifiedStage {
    /// Inlet temperature after cooling [K]
    pub inlet_temperature: f64,
    pub chart: SimplifiedChart,
}

/// Stage line-up: fixed, or derived at runtime from a cap on the pressure
/// ratio a single stage may carry.
#[derive(Debug, Clone, PartialEq)]
pub enum StagePlan {
    Known(Vec<SimplifiedStage>),
    Unknown {
        template: SimplifiedStage,
        maximum_pressure_ratio_per_stage: f64,
    },
}

/// Simplified variable-speed train: every stage carries the same pressure
/// ratio r = (P_d/P_in)^(1/N) and is solved independently on a generic
/// chart. Speed coupling between stages is deliberately ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplifiedVariableSpeedTrain {
    pub fluid: FluidModel,
    pub plan: StagePlan,
    pub maximum_power: Option<f64>,
}

impl SimplifiedVariableSpeedTrain {
    pub fn new(fluid: FluidModel, plan: StagePlan) -> Self {
        Self {
            fluid,
            plan,
            maximum_power: None,
        }
    }

    pub fn with_maximum_power(mut self, maximum_power: f64) -> Self {
        self.maximum_power = Some(maximum_power);
        self
    }

    fn stage_lineup(&self, total_ratio: f64) -> Vec<SimplifiedStage> {
        match &self.plan {
            StagePlan::Known(stages) => stages.clone(),
            StagePlan::Unknown {
                template,
                maximum_pressure_ratio_per_stage,
            } => {
                let count = (total_ratio.ln() / maximum_pressure_ratio_per_stage.ln())
                    .ceil()
                    .max(1.0) as usize;
                vec![*template; count]
            }
        }
    }

    pub fn evaluate(
        &self,
        mass_rate: f64,
        suction_pressure: f64,
        discharge_pressure: f64,
    ) -> TrainResult {
        if mass_rate < 0.0 || !mass_rate.is_finite() {
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

        let total_ratio = discharge_pressure / suction_pressure;
        let stages = self.stage_lineup(total_ratio);
        if stages.is_empty() {
            return TrainResult::invalid(FailureStatus::InvalidRateInput);
        }
        let ratio = total_ratio.powf(1.0 / stages.len() as f64);

        let mut calculations: Vec<StageCalculation> = Vec::with_capacity(stages.len());
        let mut pressure = suction_pressure;
        for stage in &stages {
            let inlet =
                match FluidStream::new(self.fluid.clone(), mass_rate, pressure, stage.inlet_temperature)
                {
                    Ok(stream) => stream,
                    Err(_) => return TrainResult::invalid(FailureStatus::InvalidSuctionPressure),
                };
            match self.evaluate_stage(&inlet, ratio, stage) {
                Ok(calculation) => {
                    pressure = calculation.outlet.state.pressure;
                    calculations.push(calculation);
                }
                Err(failure) => return TrainResult::invalid(failure),
            }
        }

        let power = total_power(&calculations);
        let boundary = TrainBoundaryStates {
            train_inlet: calculations[0].inlet.state,
            stage_inlet: calculations[0].inlet.state,
            stage_outlet: calculations[calculations.len() - 1].outlet.state,
            train_outlet: calculations[calculations.len() - 1].outlet.state,
        };
        let speed = calculations
            .iter()
            .map(|c| c.speed)
            .fold(0.0_f64, f64::max);

        let mut result = TrainResult {
            stages: calculations,
            speed,
            power,
            boundary: Some(boundary),
            pressure_control: None,
            is_valid: true,
            failure_status: None,
        };
        if let Some(failure) = result.stages.iter().find_map(|s| s.failure()) {
            result = result.failed(failure);
        }
        if let Some(cap) = self.maximum_power {
            if result.power > cap {
                result = result.failed(FailureStatus::AboveMaxPower);
            }
        }
        result
    }

    /// One independent stage at a fixed pressure ratio. The polytropic head
    /// follows from the ratio; the chart then prices the efficiency and
    /// checks coverage.
    fn evaluate_stage(
        &self,
        inlet: &FluidStream,
        ratio: f64,
        stage: &SimplifiedStage,
    ) -> Result<StageCalculation, FailureStatus> {
        let design_efficiency = match stage.chart {
            SimplifiedChart::FromDesignPoint(chart) => chart.design_efficiency,
            SimplifiedChart::FromInput(chart) => chart.design_efficiency,
        };

        let state_in = inlet.state;
        let rate = inlet.actual_volume_rate();
        let outlet_pressure = state_in.pressure * ratio;

        // Same averaging loop as the full stage model, but the ratio is
        // fixed and the head is the unknown
        let mut z_avg = state_in.z;
        let mut kappa_avg = state_in.kappa;
        let mut head = 0.0;
        let mut outlet_state = state_in;
        let mut converged = false;
        for _ in 0..MAX_SOLVER_ITERATIONS {
            let n_over_n_minus_1 = kappa_avg * design_efficiency / (kappa_avg - 1.0);
            let specific_gas_energy =
                z_avg * GAS_CONSTANT * state_in.temperature / state_in.molar_mass;
            head = specific_gas_energy * n_over_n_minus_1 * (ratio.powf(1.0 / n_over_n_minus_1) - 1.0);
            let outlet_enthalpy = state_in.enthalpy + head / design_efficiency;
            outlet_state = inlet
                .fluid
                .flash_ph(outlet_pressure, outlet_enthalpy)
                .map_err(|_| FailureStatus::StageNonConvergent)?;

            let z_next = 0.5 * (state_in.z + outlet_state.z);
            let kappa_next = 0.5 * (state_in.kappa + outlet_state.kappa);
            if (z_next - z_avg).abs() < STAGE_CONVERGENCE_TOLERANCE
                && (kappa_next - kappa_avg).abs() < STAGE_CONVERGENCE_TOLERANCE
            {
                converged = true;
                break;
            }
            z_avg = z_next;
            kappa_avg = kappa_next;
        }
        if !converged {
            return Err(FailureStatus::StageNonConvergent);
        }

        let (chart, fitted) = match stage.chart {
            SimplifiedChart::FromDesignPoint(spec) => (spec.build(), false),
            SimplifiedChart::FromInput(spec) => {
                (spec.fit_design_point(&[(rate, head)]).build(), true)
            }
        };

        // Locate the operating point on the chart
        let minimum_rate = chart.minimum_rate_at_speed(chart.minimum_speed());
        let (rate_applied, recirculation, mut flag) = if rate < minimum_rate {
            (minimum_rate, minimum_rate - rate, ChartAreaFlag::BelowMinimumFlowRecirculated)
        } else if rate > chart.maximum_rate_at_speed(chart.maximum_speed()) {
            (rate, 0.0, ChartAreaFlag::AboveMaximumFlow)
        } else {
            (rate, 0.0, ChartAreaFlag::Internal)
        };

        let (efficiency, speed) = if fitted || flag == ChartAreaFlag::AboveMaximumFlow {
            (design_efficiency, chart.maximum_speed())
        } else if head > chart.maximum_head_at_rate(rate_applied) {
            flag = ChartAreaFlag::AboveMaximumHead;
            (design_efficiency, chart.maximum_speed())
        } else {
            let head_at_min = chart.head_at_rate_and_speed(rate_applied, chart.minimum_speed());
            let speed = if head <= head_at_min {
                chart.minimum_speed()
            } else {
                brent(
                    |s| chart.head_at_rate_and_speed(rate_applied, s) - head,
                    chart.minimum_speed(),
                    chart.maximum_speed(),
                    1.0e-9,
                )
                .unwrap_or_else(|_| chart.maximum_speed())
            };
            (chart.efficiency_at_rate_and_speed(rate_applied, speed), speed)
        };

        let impeller_mass_rate = rate_applied * state_in.density;
        let power = head * impeller_mass_rate / efficiency / JOULES_PER_HOUR_PER_MW;

        Ok(StageCalculation {
            inlet: inlet.clone(),
            outlet: FluidStream {
                fluid: inlet.fluid.clone(),
                mass_rate: inlet.mass_rate,
                state: outlet_state,
            },
            chart: CompressorChartQuery {
                polytropic_head: head,
                polytropic_efficiency: efficiency,
                rate_applied,
                recirculation,
                flag,
            },
            speed,
            power,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::fluid::{Composition, EosModel};
    use approx::assert_relative_eq;

    fn from_input_train(stage_count: usize) -> SimplifiedVariableSpeedTrain {
        let stage = SimplifiedStage {
            inlet_temperature: 303.15,
            chart: SimplifiedChart::FromInput(GenericChartFromInput::new(0.75)),
        };
        SimplifiedVariableSpeedTrain::new(
            FluidModel::new(Composition::medium(), EosModel::Srk),
            StagePlan::Known(vec![stage; stage_count]),
        )
    }

    #[test]
    fn stages_share_the_pressure_ratio() {
        let result = from_input_train(3).evaluate(60_000.0, 10.0, 80.0);
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        let expected_ratio = (80.0_f64 / 10.0).powf(1.0 / 3.0);
        for stage in &result.stages {
            let ratio = stage.outlet.state.pressure / stage.inlet.state.pressure;
            assert_relative_eq!(ratio, expected_ratio, epsilon = 1e-9);
        }
        assert_relative_eq!(
            result.boundary.unwrap().train_outlet.pressure,
            80.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn runtime_stage_count_follows_the_ratio_cap() {
        let stage = SimplifiedStage {
            inlet_temperature: 303.15,
            chart: SimplifiedChart::FromInput(GenericChartFromInput::new(0.75)),
        };
        let train = SimplifiedVariableSpeedTrain::new(
            FluidModel::new(Composition::medium(), EosModel::Srk),
            StagePlan::Unknown {
                template: stage,
                maximum_pressure_ratio_per_stage: 3.5,
            },
        );
        // Ratio 40 needs ceil(ln 40 / ln 3.5) = 3 stages
        let result = train.evaluate(60_000.0, 10.0, 400.0);
        assert_eq!(result.stages.len(), 3);
    }

    #[test]
    fn design_point_chart_prices_efficiency_from_the_chart() {
        let stage = SimplifiedStage {
            inlet_temperature: 303.15,
            chart: SimplifiedChart::FromDesignPoint(GenericChartFromDesignPoint::new(
                9000.0, 40_000.0, 0.78,
            )),
        };
        let train = SimplifiedVariableSpeedTrain::new(
            FluidModel::new(Composition::medium(), EosModel::Srk),
            StagePlan::Known(vec![stage]),
        );
        let result = train.evaluate(60_000.0, 10.0, 13.0);
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        let stage_result = &result.stages[0];
        assert!(stage_result.chart.polytropic_efficiency > 0.6);
        assert!(stage_result.chart.polytropic_efficiency <= 0.78 + 1e-9);
    }

    #[test]
    fn more_power_for_higher_discharge() {
        let low = from_input_train(2).evaluate(60_000.0, 10.0, 40.0);
        let high = from_input_train(2).evaluate(60_000.0, 10.0, 60.0);
        assert!(high.power > low.power);
    }

    #[test]
    fn power_scales_with_mass_rate() {
        let light = from_input_train(2).evaluate(30_000.0, 10.0, 40.0);
        let heavy = from_input_train(2).evaluate(60_000.0, 10.0, 40.0);
        assert!(heavy.power > 1.8 * light.power);
    }
}
