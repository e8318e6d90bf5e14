use super::{total_power, AsvPolicy, PressureControlStrategy, TrainBoundaryStates, TrainResult};
use crate::config::constants::{
    MINIMUM_CHOKED_SUCTION_PRESSURE_BARA, PRESSURE_TOLERANCE_BAR,
};
use crate::core::results::FailureStatus;
use crate::physics::fluid::{FluidModel, FluidStream};
use crate::physics::numeric::brent;
use crate::physics::stage::{CompressorStage, StageCalculation};

/// A named stream attached to a stage: ingoing streams carry their own
/// fluid model, outgoing streams only remove mass.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamKind {
    Ingoing(FluidModel),
    Outgoing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainStream {
    pub name: String,
    /// Stage the stream attaches to (0-based)
    pub stage_index: usize,
    pub kind: StreamKind,
}

/// Interstage pressure control: one fixed pressure target between two
/// stages, with one control strategy per sub-train for whichever one ends
/// up running above its required speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterstagePressureControl {
    /// Stage the controlled pressure applies ahead of (0-based, >= 1)
    pub stage_index: usize,
    /// Engaged when the upstream sub-train over-delivers the target
    pub upstream_control: PressureControlStrategy,
    /// Engaged when the downstream sub-train over-delivers the discharge
    pub downstream_control: PressureControlStrategy,
}

/// Compressor train with named side streams and an optional interstage
/// pressure target. With the target set, the train splits into two
/// variable-speed sub-trains; the one needing the higher speed governs and
/// the other engages its configured control.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiStreamTrain {
    pub stages: Vec<CompressorStage>,
    pub streams: Vec<TrainStream>,
    pub interstage: Option<InterstagePressureControl>,
    pub maximum_power: Option<f64>,
}

enum SectionSolve {
    /// Target met at this speed
    Speed(f64),
    /// Over-delivers even at minimum speed; control must absorb the rest
    BelowRange,
}

impl MultiStreamTrain {
    pub fn new(stages: Vec<CompressorStage>, streams: Vec<TrainStream>) -> Self {
        Self {
            stages,
            streams,
            interstage: None,
            maximum_power: None,
        }
    }

    pub fn with_interstage_control(mut self, control: InterstagePressureControl) -> Self {
        self.interstage = Some(control);
        self
    }

    pub fn with_maximum_power(mut self, maximum_power: f64) -> Self {
        self.maximum_power = Some(maximum_power);
        self
    }

    fn speed_range(&self, from: usize, to: usize) -> (f64, f64) {
        let min = self.stages[from..to]
            .iter()
            .map(|s| s.chart.minimum_speed())
            .fold(f64::NEG_INFINITY, f64::max);
        let max = self.stages[from..to]
            .iter()
            .map(|s| s.chart.maximum_speed())
            .fold(f64::INFINITY, f64::min);
        (min, max)
    }

    /// Run stages [from, to) at one speed. Ingoing streams mix with the
    /// running stream at each stage inlet; outgoing streams draw mass off
    /// ahead of the stage. `entering` is None only for the first section,
    /// whose feed is assembled from the stage-0 ingoing streams.
    ///
    /// The ASV policy adds per-stage recirculation (indexed within the
    /// section); `loop_mass` circulates extra mass around the whole section
    /// and is removed from the delivery again.
    fn run_section(
        &self,
        from: usize,
        to: usize,
        entering: Option<&FluidStream>,
        suction_pressure: f64,
        speed: f64,
        stream_rates: &[f64],
        asv: &AsvPolicy,
        loop_mass: f64,
    ) -> Result<(Vec<StageCalculation>, FluidStream), FailureStatus> {
        let mut current: Option<FluidStream> = entering.cloned();
        let mut calculations = Vec::with_capacity(to - from);

        for (index, stage) in self.stages[from..to].iter().enumerate() {
            let stage_index = from + index;
            let pressure = current
                .as_ref()
                .map(|s| s.state.pressure)
                .unwrap_or(suction_pressure);

            for (stream, rate) in self.streams.iter().zip(stream_rates.iter()) {
                if stream.stage_index != stage_index {
                    continue;
                }
                match &stream.kind {
                    StreamKind::Ingoing(fluid) => {
                        if *rate <= 0.0 {
                            continue;
                        }
                        let incoming = FluidStream::new(
                            fluid.clone(),
                            *rate,
                            pressure,
                            stage.inlet_temperature,
                        )
                        .map_err(|_| FailureStatus::InvalidSuctionPressure)?;
                        current = Some(match current.take() {
                            Some(running) => FluidStream::mix(&[running, incoming])
                                .map_err(|_| FailureStatus::StageNonConvergent)?,
                            None => incoming,
                        });
                    }
                    StreamKind::Outgoing => {
                        let running = current.as_mut().ok_or(FailureStatus::InvalidRateInput)?;
                        if *rate > running.mass_rate {
                            return Err(FailureStatus::InvalidRateInput);
                        }
                        running.mass_rate -= rate;
                    }
                }
            }

            let mut running = current.take().ok_or(FailureStatus::InvalidRateInput)?;
            if index == 0 && loop_mass > 0.0 {
                running = running.with_mass_rate(running.mass_rate + loop_mass);
            }
            let through = running
                .with_conditions(
                    running.state.pressure - stage.pressure_drop_ahead_of_stage,
                    stage.inlet_temperature,
                )
                .map(|s| s.actual_volume_rate())
                .unwrap_or(0.0);
            let headroom = stage.chart.maximum_rate_at_speed(speed) - through;
            let extra = asv.extra_for(index, headroom);
            let calculation = stage.evaluate_at_speed(&running, speed, extra)?;
            current = Some(calculation.outlet.clone());
            calculations.push(calculation);
        }

        let delivery = current.ok_or(FailureStatus::InvalidRateInput)?;
        let delivery = if loop_mass > 0.0 {
            delivery.with_mass_rate((delivery.mass_rate - loop_mass).max(0.0))
        } else {
            delivery
        };
        Ok((calculations, delivery))
    }

    fn solve_section_speed(
        &self,
        from: usize,
        to: usize,
        entering: Option<&FluidStream>,
        suction_pressure: f64,
        target: f64,
        stream_rates: &[f64],
    ) -> Result<SectionSolve, FailureStatus> {
        let (s_min, s_max) = self.speed_range(from, to);

        let discharge_at = |speed: f64| -> Result<f64, FailureStatus> {
            self.run_section(
                from,
                to,
                entering,
                suction_pressure,
                speed,
                stream_rates,
                &AsvPolicy::None,
                0.0,
            )
            .map(|(_, out)| out.state.pressure)
        };

        if discharge_at(s_max)? < target - PRESSURE_TOLERANCE_BAR {
            return Err(FailureStatus::AboveCapacity);
        }
        if discharge_at(s_min)? > target + PRESSURE_TOLERANCE_BAR {
            return Ok(SectionSolve::BelowRange);
        }
        let speed = brent(
            |s| discharge_at(s).unwrap_or(f64::MAX) - target,
            s_min,
            s_max,
            1.0e-7,
        )
        .map_err(|_| FailureStatus::StageNonConvergent)?;
        Ok(SectionSolve::Speed(speed))
    }

    /// Choke the entering pressure of a section until its discharge meets
    /// the target at the given speed. Used by UPSTREAM control on the
    /// non-governing sub-train.
    fn choked_inlet_pressure(
        &self,
        from: usize,
        to: usize,
        entering: Option<&FluidStream>,
        nominal_pressure: f64,
        speed: f64,
        target: f64,
        stream_rates: &[f64],
    ) -> f64 {
        let residual = |p: f64| -> f64 {
            let adjusted = entering.map(|stream| {
                stream
                    .with_conditions(p, self.stages[from].inlet_temperature)
                    .unwrap_or_else(|_| stream.clone())
            });
            self.run_section(
                from,
                to,
                adjusted.as_ref(),
                p,
                speed,
                stream_rates,
                &AsvPolicy::None,
                0.0,
            )
            .map(|(_, out)| out.state.pressure - target)
            .unwrap_or(f64::MAX)
        };
        brent(
            residual,
            MINIMUM_CHOKED_SUCTION_PRESSURE_BARA,
            nominal_pressure,
            1.0e-6,
        )
        .unwrap_or(nominal_pressure)
    }

    /// Bring a section that over-delivers at the given speed down to its
    /// target with the configured strategy. Same five strategies as the
    /// plain trains, applied per section with the side streams threaded
    /// through; strategies that run out of authority leave the remainder
    /// to the boundary choke.
    #[allow(clippy::too_many_arguments)]
    fn engage_section_control(
        &self,
        from: usize,
        to: usize,
        entering: Option<&FluidStream>,
        suction_pressure: f64,
        speed: f64,
        strategy: PressureControlStrategy,
        target: f64,
        stream_rates: &[f64],
    ) -> Result<(Vec<StageCalculation>, FluidStream), FailureStatus> {
        let natural = self.run_section(
            from,
            to,
            entering,
            suction_pressure,
            speed,
            stream_rates,
            &AsvPolicy::None,
            0.0,
        )?;

        match strategy {
            // The boundary valve absorbs the overshoot
            PressureControlStrategy::DownstreamChoke => Ok(natural),
            PressureControlStrategy::UpstreamChoke => {
                let choked = self.choked_inlet_pressure(
                    from,
                    to,
                    entering,
                    suction_pressure,
                    speed,
                    target,
                    stream_rates,
                );
                let adjusted = entering.map(|stream| {
                    stream
                        .with_conditions(choked, self.stages[from].inlet_temperature)
                        .unwrap_or_else(|_| stream.clone())
                });
                self.run_section(
                    from,
                    to,
                    adjusted.as_ref(),
                    choked,
                    speed,
                    stream_rates,
                    &AsvPolicy::None,
                    0.0,
                )
            }
            PressureControlStrategy::IndividualAsvRate => {
                let residual = |fraction: f64| -> f64 {
                    self.run_section(
                        from,
                        to,
                        entering,
                        suction_pressure,
                        speed,
                        stream_rates,
                        &AsvPolicy::CapacityFraction(fraction),
                        0.0,
                    )
                    .map(|(_, out)| out.state.pressure - target)
                    .unwrap_or(f64::MAX)
                };
                let fraction = brent(residual, 0.0, 1.0, 1.0e-7).unwrap_or(1.0);
                self.run_section(
                    from,
                    to,
                    entering,
                    suction_pressure,
                    speed,
                    stream_rates,
                    &AsvPolicy::CapacityFraction(fraction),
                    0.0,
                )
            }
            PressureControlStrategy::IndividualAsvPressure => {
                let extras = self.equalized_section_extras(
                    from,
                    to,
                    entering,
                    suction_pressure,
                    speed,
                    target,
                    stream_rates,
                )?;
                self.run_section(
                    from,
                    to,
                    entering,
                    suction_pressure,
                    speed,
                    stream_rates,
                    &AsvPolicy::PerStage(extras),
                    0.0,
                )
            }
            PressureControlStrategy::CommonAsv => {
                let first = natural.0.first().ok_or(FailureStatus::InvalidRateInput)?;
                let max_loop_mass = (self.stages[from].chart.maximum_rate_at_speed(speed)
                    * first.inlet.state.density
                    - first.inlet.mass_rate)
                    .max(0.0);
                let residual = |loop_mass: f64| -> f64 {
                    self.run_section(
                        from,
                        to,
                        entering,
                        suction_pressure,
                        speed,
                        stream_rates,
                        &AsvPolicy::None,
                        loop_mass,
                    )
                    .map(|(_, out)| out.state.pressure - target)
                    .unwrap_or(f64::MAX)
                };
                let loop_mass = brent(residual, 0.0, max_loop_mass, 1.0e-5).unwrap_or(max_loop_mass);
                self.run_section(
                    from,
                    to,
                    entering,
                    suction_pressure,
                    speed,
                    stream_rates,
                    &AsvPolicy::None,
                    loop_mass,
                )
            }
        }
    }

    /// Per-stage extra recirculation so every stage of the section runs at
    /// the same pressure ratio while the section lands on the target.
    /// Stages are solved front to back on growing section prefixes so the
    /// side streams stay accounted for.
    #[allow(clippy::too_many_arguments)]
    fn equalized_section_extras(
        &self,
        from: usize,
        to: usize,
        entering: Option<&FluidStream>,
        suction_pressure: f64,
        speed: f64,
        target: f64,
        stream_rates: &[f64],
    ) -> Result<Vec<f64>, FailureStatus> {
        let count = to - from;
        let entry_pressure = entering
            .map(|s| s.state.pressure)
            .unwrap_or(suction_pressure);
        let ratio = (target / entry_pressure).powf(1.0 / count as f64);

        let mut extras: Vec<f64> = Vec::with_capacity(count);
        for index in 0..count {
            let mut probe = extras.clone();
            probe.push(0.0);
            let (calculations, outlet) = self.run_section(
                from,
                from + index + 1,
                entering,
                suction_pressure,
                speed,
                stream_rates,
                &AsvPolicy::PerStage(probe),
                0.0,
            )?;
            let last = calculations.last().expect("prefix has stages");
            let through = last.inlet.actual_volume_rate();
            let headroom = (self.stages[from + index]
                .chart
                .maximum_rate_at_speed(speed)
                - through)
                .max(0.0);

            let stage_target = entry_pressure * ratio.powi(index as i32 + 1);
            let extra = if outlet.state.pressure <= stage_target {
                0.0
            } else {
                let residual = |extra: f64| -> f64 {
                    let mut trial = extras.clone();
                    trial.push(extra);
                    self.run_section(
                        from,
                        from + index + 1,
                        entering,
                        suction_pressure,
                        speed,
                        stream_rates,
                        &AsvPolicy::PerStage(trial),
                        0.0,
                    )
                    .map(|(_, out)| out.state.pressure - stage_target)
                    .unwrap_or(f64::MAX)
                };
                brent(residual, 0.0, headroom, 1.0e-5).unwrap_or(headroom)
            };
            extras.push(extra);
        }
        Ok(extras)
    }

    pub fn evaluate(
        &self,
        stream_rates: &[f64],
        suction_pressure: f64,
        discharge_pressure: f64,
        interstage_pressure: Option<f64>,
    ) -> TrainResult {
        if self.stages.is_empty()
            || stream_rates.len() != self.streams.len()
            || stream_rates.iter().any(|r| *r < 0.0 || !r.is_finite())
        {
            return TrainResult::invalid(FailureStatus::InvalidRateInput);
        }
        if stream_rates.iter().all(|r| *r == 0.0) {
            return TrainResult::idle();
        }
        if suction_pressure <= 0.0 {
            return TrainResult::invalid(FailureStatus::InvalidSuctionPressure);
        }
        if discharge_pressure <= suction_pressure {
            return TrainResult::invalid(FailureStatus::InvalidDischargePressure);
        }

        match (self.interstage, interstage_pressure) {
            (Some(control), Some(p_mid)) => {
                if p_mid <= suction_pressure || p_mid >= discharge_pressure {
                    return TrainResult::invalid(FailureStatus::InvalidIntermediatePressure);
                }
                self.evaluate_split(
                    control,
                    suction_pressure,
                    p_mid,
                    discharge_pressure,
                    stream_rates,
                )
            }
            (Some(_), None) | (None, Some(_)) => {
                TrainResult::invalid(FailureStatus::InvalidIntermediatePressure)
            }
            (None, None) => self.evaluate_single_section(
                suction_pressure,
                discharge_pressure,
                stream_rates,
            ),
        }
    }

    fn evaluate_single_section(
        &self,
        suction_pressure: f64,
        discharge_pressure: f64,
        stream_rates: &[f64],
    ) -> TrainResult {
        let n = self.stages.len();
        let solve = match self.solve_section_speed(
            0,
            n,
            None,
            suction_pressure,
            discharge_pressure,
            stream_rates,
        ) {
            Ok(solve) => solve,
            Err(FailureStatus::AboveCapacity) => {
                let (_, s_max) = self.speed_range(0, n);
                return match self.run_section(
                    0,
                    n,
                    None,
                    suction_pressure,
                    s_max,
                    stream_rates,
                    &AsvPolicy::None,
                    0.0,
                ) {
                    Ok((stages, outlet)) => self
                        .assemble(stages, outlet, s_max, discharge_pressure, None)
                        .failed(FailureStatus::AboveCapacity),
                    Err(failure) => TrainResult::invalid(failure),
                };
            }
            Err(failure) => return TrainResult::invalid(failure),
        };
        let speed = match solve {
            SectionSolve::Speed(speed) => speed,
            // Over-delivery at minimum speed: choke the delivery
            SectionSolve::BelowRange => self.speed_range(0, n).0,
        };
        match self.run_section(
            0,
            n,
            None,
            suction_pressure,
            speed,
            stream_rates,
            &AsvPolicy::None,
            0.0,
        ) {
            Ok((stages, outlet)) => self.assemble(stages, outlet, speed, discharge_pressure, None),
            Err(failure) => TrainResult::invalid(failure),
        }
    }

    fn evaluate_split(
        &self,
        control: InterstagePressureControl,
        suction_pressure: f64,
        interstage_pressure: f64,
        discharge_pressure: f64,
        stream_rates: &[f64],
    ) -> TrainResult {
        let split = control.stage_index;
        let n = self.stages.len();

        // Required speed for the upstream sub-train
        let solve_a = match self.solve_section_speed(
            0,
            split,
            None,
            suction_pressure,
            interstage_pressure,
            stream_rates,
        ) {
            Ok(solve) => solve,
            Err(failure) => return TrainResult::invalid(failure),
        };
        let (a_min, _) = self.speed_range(0, split);
        let s_a = match solve_a {
            SectionSolve::Speed(speed) => speed,
            SectionSolve::BelowRange => a_min,
        };

        // Provisional upstream delivery fixes the feed for the downstream
        // sub-train; its entry pressure is pinned to the target
        let (_, outlet_a) = match self.run_section(
            0,
            split,
            None,
            suction_pressure,
            s_a,
            stream_rates,
            &AsvPolicy::None,
            0.0,
        ) {
            Ok(result) => result,
            Err(failure) => return TrainResult::invalid(failure),
        };
        let entering_b = match outlet_a
            .fluid
            .flash_ph(interstage_pressure, outlet_a.state.enthalpy)
        {
            Ok(state) => FluidStream {
                fluid: outlet_a.fluid.clone(),
                mass_rate: outlet_a.mass_rate,
                state,
            },
            Err(_) => return TrainResult::invalid(FailureStatus::InvalidIntermediatePressure),
        };

        let solve_b = match self.solve_section_speed(
            split,
            n,
            Some(&entering_b),
            interstage_pressure,
            discharge_pressure,
            stream_rates,
        ) {
            Ok(solve) => solve,
            Err(failure) => return TrainResult::invalid(failure),
        };
        let (b_min, _) = self.speed_range(split, n);
        let s_b = match solve_b {
            SectionSolve::Speed(speed) => speed,
            SectionSolve::BelowRange => b_min,
        };

        // Higher required speed governs the common shaft
        let governing = s_a.max(s_b);

        // Upstream section at the governing speed; over-delivery of the
        // interstage target is absorbed by its configured control
        let section_a = if governing > s_a {
            self.engage_section_control(
                0,
                split,
                None,
                suction_pressure,
                governing,
                control.upstream_control,
                interstage_pressure,
                stream_rates,
            )
        } else {
            self.run_section(
                0,
                split,
                None,
                suction_pressure,
                governing,
                stream_rates,
                &AsvPolicy::None,
                0.0,
            )
        };
        let (stages_a, outlet_a) = match section_a {
            Ok(result) => result,
            Err(failure) => return TrainResult::invalid(failure),
        };

        // The downstream section always enters at the interstage pressure;
        // residual upstream overshoot is choked across the interstage valve
        let entering_b = match outlet_a
            .fluid
            .flash_ph(
                interstage_pressure.min(outlet_a.state.pressure),
                outlet_a.state.enthalpy,
            ) {
            Ok(state) => FluidStream {
                fluid: outlet_a.fluid.clone(),
                mass_rate: outlet_a.mass_rate,
                state,
            },
            Err(_) => return TrainResult::invalid(FailureStatus::InvalidIntermediatePressure),
        };

        let section_b = if governing > s_b {
            self.engage_section_control(
                split,
                n,
                Some(&entering_b),
                interstage_pressure,
                governing,
                control.downstream_control,
                discharge_pressure,
                stream_rates,
            )
        } else {
            self.run_section(
                split,
                n,
                Some(&entering_b),
                interstage_pressure,
                governing,
                stream_rates,
                &AsvPolicy::None,
                0.0,
            )
        };
        let (stages_b, outlet_b) = match section_b {
            Ok(result) => result,
            Err(failure) => return TrainResult::invalid(failure),
        };

        let mut stages = stages_a;
        stages.extend(stages_b);
        let mut result = self.assemble(stages, outlet_b, governing, discharge_pressure, None);
        if governing > s_a {
            result.pressure_control = Some(control.upstream_control);
        } else if governing > s_b {
            result.pressure_control = Some(control.downstream_control);
        }
        result
    }

    fn assemble(
        &self,
        stages: Vec<StageCalculation>,
        outlet: FluidStream,
        speed: f64,
        target_discharge: f64,
        control: Option<PressureControlStrategy>,
    ) -> TrainResult {
        let power = total_power(&stages);
        let stage_outlet = outlet.state;
        let train_outlet = if stage_outlet.pressure > target_discharge + PRESSURE_TOLERANCE_BAR {
            outlet
                .fluid
                .flash_ph(target_discharge, stage_outlet.enthalpy)
                .unwrap_or(stage_outlet)
        } else {
            stage_outlet
        };
        let train_inlet = stages.first().map(|s| s.inlet.state).unwrap_or(stage_outlet);

        let mut result = TrainResult {
            stages,
            speed,
            power,
            boundary: Some(TrainBoundaryStates {
                train_inlet,
                stage_inlet: train_inlet,
                stage_outlet,
                train_outlet,
            }),
            pressure_control: control,
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::chart::curve::ChartCurve;
    use crate::physics::chart::CompressorChart;
    use crate::physics::fluid::{Composition, EosModel};
    use approx::assert_relative_eq;

    fn wide_chart() -> CompressorChart {
        let low = ChartCurve::new(
            75.0,
            vec![500.0, 2000.0, 3500.0],
            vec![38_000.0, 30_000.0, 18_000.0],
            vec![0.72, 0.75, 0.70],
        )
        .unwrap();
        let high = ChartCurve::new(
            105.0,
            vec![700.0, 2800.0, 4900.0],
            vec![75_000.0, 60_000.0, 36_000.0],
            vec![0.73, 0.76, 0.71],
        )
        .unwrap();
        CompressorChart::variable_speed(vec![low, high]).unwrap()
    }

    fn rich() -> FluidModel {
        FluidModel::new(Composition::rich(), EosModel::Srk)
    }

    fn medium() -> FluidModel {
        FluidModel::new(Composition::medium(), EosModel::Srk)
    }

    #[test]
    fn side_streams_change_the_throughput() {
        let stages = vec![
            CompressorStage::new(303.15, wide_chart()),
            CompressorStage::new(303.15, wide_chart()),
            CompressorStage::new(303.15, wide_chart()),
        ];
        let streams = vec![
            TrainStream {
                name: "feed".to_string(),
                stage_index: 0,
                kind: StreamKind::Ingoing(rich()),
            },
            TrainStream {
                name: "boost".to_string(),
                stage_index: 1,
                kind: StreamKind::Ingoing(medium()),
            },
            TrainStream {
                name: "export".to_string(),
                stage_index: 2,
                kind: StreamKind::Outgoing,
            },
        ];
        let train = MultiStreamTrain::new(stages, streams);
        let result = train.evaluate(&[30_000.0, 10_000.0, 15_000.0], 15.0, 45.0, None);
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        assert_relative_eq!(result.stages[0].inlet.mass_rate, 30_000.0);
        assert_relative_eq!(result.stages[1].inlet.mass_rate, 40_000.0);
        assert_relative_eq!(result.stages[2].inlet.mass_rate, 25_000.0);
    }

    #[test]
    fn outgoing_stream_larger_than_throughput_is_invalid() {
        let stages = vec![
            CompressorStage::new(303.15, wide_chart()),
            CompressorStage::new(303.15, wide_chart()),
        ];
        let streams = vec![
            TrainStream {
                name: "feed".to_string(),
                stage_index: 0,
                kind: StreamKind::Ingoing(rich()),
            },
            TrainStream {
                name: "export".to_string(),
                stage_index: 1,
                kind: StreamKind::Outgoing,
            },
        ];
        let train = MultiStreamTrain::new(stages, streams);
        let result = train.evaluate(&[10_000.0, 20_000.0], 15.0, 45.0, None);
        assert!(!result.is_valid);
        assert_eq!(result.failure_status, Some(FailureStatus::InvalidRateInput));
    }

    #[test]
    fn split_train_honours_the_interstage_target() {
        let train = four_stage_train(
            PressureControlStrategy::UpstreamChoke,
            PressureControlStrategy::DownstreamChoke,
        );
        let result = train.evaluate(&[25_000.0, 8_000.0], 10.0, 60.0, Some(34.0));
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        assert_eq!(result.stages.len(), 4);
        // Stage 4 sees the interstage pressure at its inlet
        assert_relative_eq!(result.stages[3].inlet.state.pressure, 34.0, epsilon = 0.5);
        let boundary = result.boundary.unwrap();
        assert_relative_eq!(boundary.train_outlet.pressure, 60.0, epsilon = 0.5);
    }

    fn four_stage_train(
        upstream_control: PressureControlStrategy,
        downstream_control: PressureControlStrategy,
    ) -> MultiStreamTrain {
        let stages = vec![
            CompressorStage::new(303.15, wide_chart()),
            CompressorStage::new(303.15, wide_chart()),
            CompressorStage::new(303.15, wide_chart()),
            CompressorStage::new(303.15, wide_chart()),
        ];
        let streams = vec![
            TrainStream {
                name: "feed".to_string(),
                stage_index: 0,
                kind: StreamKind::Ingoing(rich()),
            },
            TrainStream {
                name: "boost".to_string(),
                stage_index: 1,
                kind: StreamKind::Ingoing(medium()),
            },
        ];
        MultiStreamTrain::new(stages, streams).with_interstage_control(
            InterstagePressureControl {
                stage_index: 3,
                upstream_control,
                downstream_control,
            },
        )
    }

    #[test]
    fn split_train_engages_asv_rate_on_the_upstream_section() {
        let train = four_stage_train(
            PressureControlStrategy::IndividualAsvRate,
            PressureControlStrategy::DownstreamChoke,
        );
        let result = train.evaluate(&[25_000.0, 8_000.0], 10.0, 60.0, Some(34.0));
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        assert_eq!(
            result.pressure_control,
            Some(PressureControlStrategy::IndividualAsvRate)
        );
        // Recirculation pulls the upstream compression itself down onto the
        // interstage target; no valve drop is left between the sections
        assert_relative_eq!(result.stages[2].outlet.state.pressure, 34.0, epsilon = 0.5);
        assert_relative_eq!(result.stages[3].inlet.state.pressure, 34.0, epsilon = 0.5);
        assert_relative_eq!(
            result.boundary.unwrap().train_outlet.pressure,
            60.0,
            epsilon = 0.5
        );
    }

    #[test]
    fn split_train_engages_asv_pressure_on_the_upstream_section() {
        let train = four_stage_train(
            PressureControlStrategy::IndividualAsvPressure,
            PressureControlStrategy::DownstreamChoke,
        );
        let result = train.evaluate(&[25_000.0, 8_000.0], 10.0, 60.0, Some(34.0));
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        assert_eq!(
            result.pressure_control,
            Some(PressureControlStrategy::IndividualAsvPressure)
        );
        assert_relative_eq!(result.stages[2].outlet.state.pressure, 34.0, epsilon = 0.5);
        // Upstream stages share the pressure ratio
        let ratios: Vec<f64> = result.stages[..3]
            .iter()
            .map(|s| s.outlet.state.pressure / s.inlet.state.pressure)
            .collect();
        assert_relative_eq!(ratios[0], ratios[1], epsilon = 0.05 * ratios[0]);
        assert_relative_eq!(ratios[1], ratios[2], epsilon = 0.05 * ratios[1]);
    }

    #[test]
    fn split_train_engages_common_asv_on_the_downstream_section() {
        // A high interstage target makes the upstream sub-train govern; the
        // single downstream stage over-delivers and recirculates
        let train = four_stage_train(
            PressureControlStrategy::UpstreamChoke,
            PressureControlStrategy::CommonAsv,
        );
        let result = train.evaluate(&[25_000.0, 8_000.0], 10.0, 60.0, Some(40.0));
        assert!(result.is_valid, "failure: {:?}", result.failure_status);
        assert_eq!(
            result.pressure_control,
            Some(PressureControlStrategy::CommonAsv)
        );
        // The recirculation loop pushes extra mass through the downstream
        // impeller while the delivery keeps the net throughput
        assert!(result.stages[3].inlet.mass_rate > 33_500.0);
        assert_relative_eq!(
            result.boundary.unwrap().train_outlet.pressure,
            60.0,
            epsilon = 0.5
        );
    }

    #[test]
    fn missing_interstage_pressure_is_invalid() {
        let stages = vec![
            CompressorStage::new(303.15, wide_chart()),
            CompressorStage::new(303.15, wide_chart()),
        ];
        let streams = vec![TrainStream {
            name: "feed".to_string(),
            stage_index: 0,
            kind: StreamKind::Ingoing(rich()),
        }];
        let train = MultiStreamTrain::new(stages, streams).with_interstage_control(
            InterstagePressureControl {
                stage_index: 1,
                upstream_control: PressureControlStrategy::UpstreamChoke,
                downstream_control: PressureControlStrategy::DownstreamChoke,
            },
        );
        let result = train.evaluate(&[20_000.0], 10.0, 40.0, None);
        assert!(!result.is_valid);
        assert_eq!(
            result.failure_status,
            Some(FailureStatus::InvalidIntermediatePressure)
        );
    }

    #[test]
    fn all_zero_rates_are_idle() {
        let stages = vec![CompressorStage::new(303.15, wide_chart())];
        let streams = vec![TrainStream {
            name: "feed".to_string(),
            stage_index: 0,
            kind: StreamKind::Ingoing(rich()),
        }];
        let train = MultiStreamTrain::new(stages, streams);
        let result = train.evaluate(&[0.0], 10.0, 40.0, None);
        assert!(result.is_valid);
        assert_relative_eq!(result.power, 0.0);
    }
}
