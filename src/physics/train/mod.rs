pub mod variable_speed;
pub mod single_speed;
pub mod simplified;
pub mod multi_stream;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::results::{FailureStatus, StageRecord};
use crate::physics::fluid::{FluidState, FluidStream};
use crate::physics::stage::{CompressorStage, StageCalculation};

pub use multi_stream::{InterstagePressureControl, MultiStreamTrain, StreamKind, TrainStream};
pub use simplified::{SimplifiedStage, SimplifiedVariableSpeedTrain};
pub use single_speed::SingleSpeedTrain;
pub use variable_speed::VariableSpeedTrain;

/// What to do when the train over-delivers pressure at its minimum speed
/// (or, for single-speed trains, at the fixed speed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PressureControlStrategy {
    DownstreamChoke,
    UpstreamChoke,
    IndividualAsvRate,
    IndividualAsvPressure,
    CommonAsv,
}

impl FromStr for PressureControlStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DOWNSTREAM_CHOKE" => Ok(PressureControlStrategy::DownstreamChoke),
            "UPSTREAM_CHOKE" => Ok(PressureControlStrategy::UpstreamChoke),
            "INDIVIDUAL_ASV_RATE" => Ok(PressureControlStrategy::IndividualAsvRate),
            "INDIVIDUAL_ASV_PRESSURE" => Ok(PressureControlStrategy::IndividualAsvPressure),
            "COMMON_ASV" => Ok(PressureControlStrategy::CommonAsv),
            _ => Err(format!("Unknown pressure control strategy: {}", s)),
        }
    }
}

impl fmt::Display for PressureControlStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PressureControlStrategy::DownstreamChoke => write!(f, "DOWNSTREAM_CHOKE"),
            PressureControlStrategy::UpstreamChoke => write!(f, "UPSTREAM_CHOKE"),
            PressureControlStrategy::IndividualAsvRate => write!(f, "INDIVIDUAL_ASV_RATE"),
            PressureControlStrategy::IndividualAsvPressure => write!(f, "INDIVIDUAL_ASV_PRESSURE"),
            PressureControlStrategy::CommonAsv => write!(f, "COMMON_ASV"),
        }
    }
}

/// Fluid states at the train boundary and at the stage boundary. The two
/// differ exactly when a choke sits between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainBoundaryStates {
    /// Feed before any upstream choke
    pub train_inlet: FluidState,
    /// Feed as the first stage sees it
    pub stage_inlet: FluidState,
    /// Last stage discharge before any downstream choke
    pub stage_outlet: FluidState,
    /// Delivery after any downstream choke
    pub train_outlet: FluidState,
}

/// Outcome of a train evaluation for one operating point.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainResult {
    pub stages: Vec<StageCalculation>,
    pub speed: f64,
    /// Total shaft power [MW]
    pub power: f64,
    pub boundary: Option<TrainBoundaryStates>,
    /// Control engaged to meet the target, if any
    pub pressure_control: Option<PressureControlStrategy>,
    pub is_valid: bool,
    pub failure_status: Option<FailureStatus>,
}

impl TrainResult {
    pub fn idle() -> Self {
        Self {
            stages: Vec::new(),
            speed: 0.0,
            power: 0.0,
            boundary: None,
            pressure_control: None,
            is_valid: true,
            failure_status: None,
        }
    }

    pub fn invalid(failure: FailureStatus) -> Self {
        Self {
            stages: Vec::new(),
            speed: 0.0,
            power: f64::NAN,
            boundary: None,
            pressure_control: None,
            is_valid: false,
            failure_status: Some(failure),
        }
    }

    pub fn stage_records(&self) -> Vec<StageRecord> {
        self.stages.iter().map(|s| s.to_record()).collect()
    }

    /// Mark invalid while keeping the computed stage details for reporting.
    pub fn failed(mut self, failure: FailureStatus) -> Self {
        self.is_valid = false;
        self.failure_status = Some(failure);
        self
    }
}

/// Per-stage recirculation policy used by the ASV pressure controls.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AsvPolicy {
    None,
    /// Same fraction of each stage's remaining rate capacity
    CapacityFraction(f64),
    /// Explicit extra recirculation per stage [Am3/h]
    PerStage(Vec<f64>),
}

impl AsvPolicy {
    fn extra_for(&self, stage_index: usize, headroom: f64) -> f64 {
        match self {
            AsvPolicy::None => 0.0,
            AsvPolicy::CapacityFraction(fraction) => fraction * headroom.max(0.0),
            AsvPolicy::PerStage(extras) => extras.get(stage_index).copied().unwrap_or(0.0),
        }
    }
}

/// Run a chain of stages at a common speed, threading each outlet into the
/// next inlet. Returns the per-stage calculations and the delivery stream.
pub(crate) fn evaluate_stage_chain(
    stages: &[CompressorStage],
    feed: &FluidStream,
    speed: f64,
    asv: &AsvPolicy,
) -> Result<(Vec<StageCalculation>, FluidStream), FailureStatus> {
    let mut calculations = Vec::with_capacity(stages.len());
    let mut current = feed.clone();
    for (index, stage) in stages.iter().enumerate() {
        let through = current
            .with_conditions(
                current.state.pressure - stage.pressure_drop_ahead_of_stage,
                stage.inlet_temperature,
            )
            .map(|s| s.actual_volume_rate())
            .unwrap_or(0.0);
        let headroom = stage.chart.maximum_rate_at_speed(speed) - through;
        let extra = asv.extra_for(index, headroom);
        let calculation = stage.evaluate_at_speed(&current, speed, extra)?;
        current = calculation.outlet.clone();
        calculations.push(calculation);
    }
    Ok((calculations, current))
}

pub(crate) fn total_power(stages: &[StageCalculation]) -> f64 {
    stages.iter().map(|s| s.power).sum()
}

/// First invalid chart flag across the stages, if any.
pub(crate) fn chain_failure(stages: &[StageCalculation]) -> Option<FailureStatus> {
    stages.iter().find_map(|s| s.failure())
}

/// Shared train mechanics: result assembly, power cap, and the pressure
/// control strategies. Both the variable-speed and the single-speed trains
/// run their stage chains through this.
pub(crate) struct ChainSolver<'a> {
    pub stages: &'a [CompressorStage],
    pub maximum_power: Option<f64>,
}

impl ChainSolver<'_> {
    /// Assemble a result from a solved chain. When a target is given and
    /// the stage discharge overshoots it, the delivery is choked down
    /// isenthalpically and both states are reported.
    pub fn finish(
        &self,
        feed: &FluidStream,
        stages: Vec<StageCalculation>,
        outlet: FluidStream,
        speed: f64,
        control: Option<PressureControlStrategy>,
        target_discharge: Option<f64>,
    ) -> TrainResult {
        use crate::config::constants::PRESSURE_TOLERANCE_BAR;

        let power = total_power(&stages);
        let stage_outlet = outlet.state;
        let train_outlet = match target_discharge {
            Some(target) if stage_outlet.pressure > target + PRESSURE_TOLERANCE_BAR => outlet
                .fluid
                .flash_ph(target, stage_outlet.enthalpy)
                .unwrap_or(stage_outlet),
            _ => stage_outlet,
        };
        let stage_inlet = stages.first().map(|s| s.inlet.state).unwrap_or(feed.state);

        let mut result = TrainResult {
            stages,
            speed,
            power,
            boundary: Some(TrainBoundaryStates {
                train_inlet: feed.state,
                stage_inlet,
                stage_outlet,
                train_outlet,
            }),
            pressure_control: control,
            is_valid: true,
            failure_status: None,
        };

        if let Some(failure) = chain_failure(&result.stages) {
            result = result.failed(failure);
        }
        if let Some(cap) = self.maximum_power {
            if result.power > cap {
                result = result.failed(FailureStatus::AboveMaxPower);
            }
        }
        result
    }

    /// The chain over-delivers pressure at the given speed; bring the
    /// discharge down to the target with the configured strategy. Controls
    /// that run out of authority fall back to choking the remainder.
    pub fn engage_pressure_control(
        &self,
        feed: &FluidStream,
        speed: f64,
        strategy: PressureControlStrategy,
        target: f64,
        natural: (Vec<StageCalculation>, FluidStream),
    ) -> TrainResult {
        use crate::config::constants::MINIMUM_CHOKED_SUCTION_PRESSURE_BARA;
        use crate::physics::numeric::brent;

        let control = Some(strategy);
        match strategy {
            PressureControlStrategy::DownstreamChoke => {
                let (stages, outlet) = natural;
                self.finish(feed, stages, outlet, speed, control, Some(target))
            }
            PressureControlStrategy::UpstreamChoke => {
                let inlet_temperature = self.stages[0].inlet_temperature;
                let residual = |p_in: f64| -> f64 {
                    feed.with_conditions(p_in, inlet_temperature)
                        .map_err(|_| FailureStatus::InvalidSuctionPressure)
                        .and_then(|choked| {
                            evaluate_stage_chain(self.stages, &choked, speed, &AsvPolicy::None)
                        })
                        .map(|(_, out)| out.state.pressure - target)
                        .unwrap_or(f64::MAX)
                };
                let choked_suction = match brent(
                    residual,
                    MINIMUM_CHOKED_SUCTION_PRESSURE_BARA,
                    feed.state.pressure,
                    1.0e-6,
                ) {
                    Ok(p) => p,
                    Err(_) => {
                        let (stages, outlet) = natural;
                        return self
                            .finish(feed, stages, outlet, speed, control, Some(target))
                            .failed(FailureStatus::InvalidSuctionPressure);
                    }
                };
                let choked_feed = match feed.with_conditions(choked_suction, inlet_temperature) {
                    Ok(stream) => stream,
                    Err(_) => return TrainResult::invalid(FailureStatus::InvalidSuctionPressure),
                };
                match evaluate_stage_chain(self.stages, &choked_feed, speed, &AsvPolicy::None) {
                    Ok((stages, outlet)) => {
                        let mut result =
                            self.finish(&choked_feed, stages, outlet, speed, control, Some(target));
                        // Report the unchoked feed as the train inlet
                        if let Some(boundary) = result.boundary.as_mut() {
                            boundary.train_inlet = feed.state;
                        }
                        result
                    }
                    Err(failure) => TrainResult::invalid(failure),
                }
            }
            PressureControlStrategy::IndividualAsvRate => {
                let residual = |fraction: f64| -> f64 {
                    evaluate_stage_chain(
                        self.stages,
                        feed,
                        speed,
                        &AsvPolicy::CapacityFraction(fraction),
                    )
                    .map(|(_, out)| out.state.pressure - target)
                    .unwrap_or(f64::MAX)
                };
                let fraction = brent(residual, 0.0, 1.0, 1.0e-7).unwrap_or(1.0);
                match evaluate_stage_chain(
                    self.stages,
                    feed,
                    speed,
                    &AsvPolicy::CapacityFraction(fraction),
                ) {
                    Ok((stages, outlet)) => {
                        self.finish(feed, stages, outlet, speed, control, Some(target))
                    }
                    Err(failure) => TrainResult::invalid(failure),
                }
            }
            PressureControlStrategy::IndividualAsvPressure => {
                match self.equalized_ratio_extras(feed, speed, target) {
                    Ok(extras) => match evaluate_stage_chain(
                        self.stages,
                        feed,
                        speed,
                        &AsvPolicy::PerStage(extras),
                    ) {
                        Ok((stages, outlet)) => {
                            self.finish(feed, stages, outlet, speed, control, Some(target))
                        }
                        Err(failure) => TrainResult::invalid(failure),
                    },
                    Err(failure) => TrainResult::invalid(failure),
                }
            }
            PressureControlStrategy::CommonAsv => {
                let state_in = feed.state;
                let max_extra_mass = (self.stages[0].chart.maximum_rate_at_speed(speed)
                    * state_in.density
                    - feed.mass_rate)
                    .max(0.0);
                let residual = |extra: f64| -> f64 {
                    evaluate_stage_chain(
                        self.stages,
                        &feed.with_mass_rate(feed.mass_rate + extra),
                        speed,
                        &AsvPolicy::None,
                    )
                    .map(|(_, out)| out.state.pressure - target)
                    .unwrap_or(f64::MAX)
                };
                let extra = brent(residual, 0.0, max_extra_mass, 1.0e-5).unwrap_or(max_extra_mass);
                let boosted = feed.with_mass_rate(feed.mass_rate + extra);
                match evaluate_stage_chain(self.stages, &boosted, speed, &AsvPolicy::None) {
                    Ok((stages, outlet)) => {
                        // Delivery keeps the net throughput; the loop mass
                        // stays inside the train
                        let delivery = outlet.with_mass_rate(feed.mass_rate);
                        let mut result =
                            self.finish(feed, stages, delivery, speed, control, Some(target));
                        if let Some(boundary) = result.boundary.as_mut() {
                            boundary.train_inlet = feed.state;
                        }
                        result
                    }
                    Err(failure) => TrainResult::invalid(failure),
                }
            }
        }
    }

    /// Per-stage extra recirculation so every stage runs at the same
    /// pressure ratio while the train lands on the target.
    fn equalized_ratio_extras(
        &self,
        feed: &FluidStream,
        speed: f64,
        target: f64,
    ) -> Result<Vec<f64>, FailureStatus> {
        use crate::physics::numeric::brent;

        let n = self.stages.len() as f64;
        let ratio = (target / feed.state.pressure).powf(1.0 / n);
        let mut extras = Vec::with_capacity(self.stages.len());
        let mut current = feed.clone();
        for stage in self.stages {
            let stage_target = current.state.pressure * ratio;
            let through = current
                .with_conditions(
                    current.state.pressure - stage.pressure_drop_ahead_of_stage,
                    stage.inlet_temperature,
                )
                .map(|s| s.actual_volume_rate())
                .map_err(|_| FailureStatus::InvalidSuctionPressure)?;
            let headroom = (stage.chart.maximum_rate_at_speed(speed) - through).max(0.0);

            let natural = stage.evaluate_at_speed(&current, speed, 0.0)?;
            let extra = if natural.outlet.state.pressure <= stage_target {
                0.0
            } else {
                let residual = |extra: f64| -> f64 {
                    stage
                        .evaluate_at_speed(&current, speed, extra)
                        .map(|calc| calc.outlet.state.pressure - stage_target)
                        .unwrap_or(f64::MAX)
                };
                brent(residual, 0.0, headroom, 1.0e-5).unwrap_or(headroom)
            };
            let calculation = stage.evaluate_at_speed(&current, speed, extra)?;
            current = calculation.outlet;
            extras.push(extra);
        }
        Ok(extras)
    }
}
