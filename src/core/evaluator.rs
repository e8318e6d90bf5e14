use std::collections::HashMap;

use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::config::expression::ExpressionError;
use crate::config::facility::{
    Consumer, EnergyModel, FacilityModel, Installation, PressureExpressions, SystemSettingSpec,
    TabulatedOutput,
};
use crate::config::temporal::{Period, TemporalError};
use crate::core::results::{
    ConsumerResult, EmissionResult, EnergyUnit, EnergyUsage, EvaluationResults, FailureStatus,
    GeneratorSetResult, InstallationPeriodResult, PeriodResult,
};
use crate::core::system::{OperationalSetting, PressureSpec, RateSpec};
use crate::physics::train::TrainResult;
use crate::utils::logging::{self, OperationCategory};

/// Errors of the internal-failure class (process exit 3). Per-period
/// solver trouble is captured in result records instead and never lands
/// here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Temporal(#[from] TemporalError),
    #[error("expression failure in '{owner}': {source}")]
    Expression {
        owner: String,
        source: ExpressionError,
    },
}

/// Walks the asset hierarchy one period at a time: regularity, generator
/// sets with their electric consumers, fuel consumers, then emissions.
/// The configuration is immutable; each period owns its scratch state, so
/// periods can also be evaluated in parallel.
pub struct Evaluator<'a> {
    model: &'a FacilityModel,
}

impl<'a> Evaluator<'a> {
    pub fn new(model: &'a FacilityModel) -> Self {
        Self { model }
    }

    pub fn evaluate(&self) -> Result<EvaluationResults, EvaluationError> {
        self.evaluate_with_progress(false, &|| {})
    }

    /// Period-parallel evaluation; results keep period order.
    pub fn evaluate_parallel(&self) -> Result<EvaluationResults, EvaluationError> {
        self.evaluate_with_progress(true, &|| {})
    }

    /// Evaluate with a per-period tick, e.g. for a progress bar.
    pub fn evaluate_with_progress(
        &self,
        parallel: bool,
        tick: &(impl Fn() + Sync),
    ) -> Result<EvaluationResults, EvaluationError> {
        let _timing = logging::start_timing("evaluate", OperationCategory::Evaluation);
        let periods = self.model.time_vector()?.periods();
        let evaluate_one = |period: &Period| {
            let result = self.evaluate_period(period);
            tick();
            result
        };
        let results = if parallel {
            periods
                .par_iter()
                .map(evaluate_one)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            periods
                .iter()
                .map(evaluate_one)
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(EvaluationResults {
            asset_name: self.model.name.clone(),
            periods: results,
        })
    }

    /// Resolve every reference usable in expressions for one period:
    /// time-series columns first, then variables in definition order.
    fn reference_values(&self, period: &Period) -> Result<HashMap<String, f64>, EvaluationError> {
        let mut values = HashMap::new();
        for series in &self.model.time_series {
            for (column, _) in &series.columns {
                if let Some(value) = series.value_at(column, period.start) {
                    values.insert(format!("{};{}", series.name, column), value);
                }
            }
        }
        for (name, expression) in &self.model.variables {
            let value = expression
                .evaluate(&|reference: &str| values.get(reference).copied())
                .map_err(|source| EvaluationError::Expression {
                    owner: name.clone(),
                    source,
                })?;
            values.insert(name.clone(), value);
        }
        Ok(values)
    }

    fn evaluate_period(&self, period: &Period) -> Result<PeriodResult, EvaluationError> {
        let references = self.reference_values(period)?;
        let resolver = move |name: &str| references.get(name).copied();

        let mut installations = Vec::with_capacity(self.model.installations.len());
        for installation in &self.model.installations {
            installations.push(self.evaluate_installation(installation, period, &resolver)?);
        }
        Ok(PeriodResult {
            period: *period,
            installations,
        })
    }

    fn evaluate_installation(
        &self,
        installation: &Installation,
        period: &Period,
        resolver: &impl Fn(&str) -> Option<f64>,
    ) -> Result<InstallationPeriodResult, EvaluationError> {
        let regularity = match &installation.regularity {
            Some(expression) => expression
                .evaluate(resolver)
                .map_err(|source| EvaluationError::Expression {
                    owner: installation.name.clone(),
                    source,
                })?
                .clamp(0.0, 1.0),
            None => 1.0,
        };

        let mut generator_sets = Vec::with_capacity(installation.generator_sets.len());
        for genset in &installation.generator_sets {
            let mut consumers = Vec::with_capacity(genset.consumers.len());
            let mut load = 0.0;
            for consumer in &genset.consumers {
                let result = self.evaluate_consumer(consumer, period, resolver)?;
                load += result.energy_usage.value;
                consumers.push(result);
            }
            // Negative net demand (power sales, offshore wind) clamps to 0
            let demand = if load.is_finite() { load.max(0.0) } else { load };
            if load < 0.0 {
                debug!(genset = %genset.name, load, "negative electric demand clamped to zero");
            }

            let table = genset
                .electricity_to_fuel
                .at(period.start)
                .or_else(|| genset.electricity_to_fuel.values().next())
                .expect("temporal models are non-empty");
            let (fuel_rate, overloaded) = if demand.is_nan() {
                (f64::NAN, false)
            } else {
                table.fuel_for_load(demand)
            };

            generator_sets.push(GeneratorSetResult {
                name: genset.name.clone(),
                power_demand: demand,
                fuel_rate,
                is_valid: !overloaded,
                failure_status: overloaded.then_some(FailureStatus::AboveCapacity),
                consumers,
            });
        }

        let mut fuel_consumers = Vec::with_capacity(installation.fuel_consumers.len());
        for consumer in &installation.fuel_consumers {
            fuel_consumers.push(self.evaluate_consumer(consumer, period, resolver)?);
        }

        let emissions =
            self.compute_emissions(installation, &generator_sets, &fuel_consumers, regularity, period);

        Ok(InstallationPeriodResult {
            name: installation.name.clone(),
            regularity,
            generator_sets,
            fuel_consumers,
            emissions,
        })
    }

    /// Fuel rates (Sm3/day, stream-day) map to emission mass rates through
    /// the fuel type's factors; calendar mass applies regularity and the
    /// period length. NaN fuel propagates as NaN mass.
    fn compute_emissions(
        &self,
        installation: &Installation,
        generator_sets: &[GeneratorSetResult],
        fuel_consumers: &[ConsumerResult],
        regularity: f64,
        period: &Period,
    ) -> Vec<EmissionResult> {
        let mut fuel_per_type: Vec<(String, f64)> = Vec::new();
        let mut add_fuel = |fuel_name: &str, rate: f64| {
            match fuel_per_type.iter_mut().find(|(name, _)| name == fuel_name) {
                Some((_, total)) => *total += rate,
                None => fuel_per_type.push((fuel_name.to_string(), rate)),
            }
        };

        for (genset, result) in installation.generator_sets.iter().zip(generator_sets) {
            add_fuel(&genset.fuel, result.fuel_rate);
        }
        for (consumer, result) in installation.fuel_consumers.iter().zip(fuel_consumers) {
            if let (Some(fuel_name), Some(rate)) = (&consumer.fuel, result.fuel_rate) {
                add_fuel(fuel_name, rate);
            }
        }

        let mut emissions: Vec<EmissionResult> = Vec::new();
        for (fuel_name, fuel_rate) in &fuel_per_type {
            if let Some(fuel_type) = self.model.fuel_type(fuel_name) {
                for emission in &fuel_type.emissions {
                    let rate_kg_per_day = fuel_rate * emission.factor;
                    let index = match emissions.iter().position(|e| e.name == emission.name) {
                        Some(index) => index,
                        None => {
                            emissions.push(EmissionResult {
                                name: emission.name.clone(),
                                rate_kg_per_day: 0.0,
                                period_mass_kg: 0.0,
                            });
                            emissions.len() - 1
                        }
                    };
                    emissions[index].rate_kg_per_day += rate_kg_per_day;
                    emissions[index].period_mass_kg +=
                        rate_kg_per_day * regularity * period.duration_days();
                }
            }
        }
        emissions
    }

    fn evaluate_consumer(
        &self,
        consumer: &Consumer,
        period: &Period,
        resolver: &impl Fn(&str) -> Option<f64>,
    ) -> Result<ConsumerResult, EvaluationError> {
        let model = consumer
            .model
            .at(period.start)
            .or_else(|| consumer.model.values().next())
            .expect("temporal models are non-empty");
        let unit = model.energy_unit();

        if let Some(condition) = &consumer.condition {
            let active = condition.evaluate_condition(resolver).map_err(|source| {
                EvaluationError::Expression {
                    owner: consumer.name.clone(),
                    source,
                }
            })?;
            if !active {
                return Ok(ConsumerResult::gated_off(&consumer.name, unit));
            }
        }

        let mut result = self.evaluate_model(model, &consumer.name, resolver)?;

        if let Some(loss) = &consumer.power_loss_factor {
            let beta = loss
                .evaluate(resolver)
                .map_err(|source| EvaluationError::Expression {
                    owner: consumer.name.clone(),
                    source,
                })?;
            result.energy_usage.value /= 1.0 - beta;
            if let Some(power) = result.power.as_mut() {
                *power /= 1.0 - beta;
            }
        }

        if result.energy_usage.unit == EnergyUnit::StandardCubicMetresPerDay {
            result.fuel_rate = Some(result.energy_usage.value);
        }
        Ok(result)
    }

    fn expression_value(
        &self,
        expression: &crate::config::expression::Expression,
        owner: &str,
        resolver: &impl Fn(&str) -> Option<f64>,
    ) -> Result<f64, EvaluationError> {
        expression
            .evaluate(resolver)
            .map_err(|source| EvaluationError::Expression {
                owner: owner.to_string(),
                source,
            })
    }

    fn evaluate_model(
        &self,
        model: &EnergyModel,
        name: &str,
        resolver: &impl Fn(&str) -> Option<f64>,
    ) -> Result<ConsumerResult, EvaluationError> {
        let result = match model {
            EnergyModel::DirectLoad { load } => {
                let value = self.expression_value(load, name, resolver)?;
                ConsumerResult {
                    name: name.to_string(),
                    energy_usage: EnergyUsage::megawatts(value),
                    power: Some(value),
                    is_valid: true,
                    failure_status: None,
                    chosen_operational_setting: None,
                    stages: Vec::new(),
                    fuel_rate: None,
                }
            }
            EnergyModel::DirectFuel { fuel_rate } => {
                let value = self.expression_value(fuel_rate, name, resolver)?;
                ConsumerResult {
                    name: name.to_string(),
                    energy_usage: EnergyUsage::sm3_per_day(value),
                    power: None,
                    is_valid: true,
                    failure_status: None,
                    chosen_operational_setting: None,
                    stages: Vec::new(),
                    fuel_rate: Some(value),
                }
            }
            EnergyModel::Pump {
                pump,
                rate,
                suction_pressure,
                discharge_pressure,
                density,
            } => {
                let _timing = logging::start_timing(name, OperationCategory::PumpModel);
                let rate = self.expression_value(rate, name, resolver)?;
                let suction = self.expression_value(suction_pressure, name, resolver)?;
                let discharge = self.expression_value(discharge_pressure, name, resolver)?;
                let density = match density {
                    Some(expression) => self.expression_value(expression, name, resolver)?,
                    None => pump.fluid_density,
                };
                let outcome = pump.evaluate(rate, suction, discharge, density);
                ConsumerResult {
                    name: name.to_string(),
                    energy_usage: EnergyUsage::megawatts(outcome.power),
                    power: Some(outcome.power),
                    is_valid: outcome.is_valid,
                    failure_status: outcome.failure_status,
                    chosen_operational_setting: None,
                    stages: Vec::new(),
                    fuel_rate: None,
                }
            }
            EnergyModel::PumpSystem {
                system,
                settings,
                total_rate,
            }
            | EnergyModel::CompressorSystem {
                system,
                settings,
                total_rate,
            } => {
                let _timing = logging::start_timing(name, OperationCategory::SystemSelect);
                let total = self.expression_value(total_rate, name, resolver)?;
                let resolved = self.resolve_settings(settings, name, resolver)?;
                let outcome = system.evaluate(&resolved, total);
                let stages = outcome
                    .unit_outcomes
                    .iter()
                    .flat_map(|u| u.stages.iter().copied())
                    .collect();
                let failure = outcome
                    .unit_outcomes
                    .iter()
                    .find_map(|u| u.failure_status);
                ConsumerResult {
                    name: name.to_string(),
                    energy_usage: EnergyUsage::megawatts(outcome.power),
                    power: Some(outcome.power),
                    is_valid: outcome.is_valid,
                    failure_status: if outcome.is_valid { None } else { failure },
                    chosen_operational_setting: Some(outcome.chosen_setting),
                    stages,
                    fuel_rate: None,
                }
            }
            EnergyModel::CompressorSampled {
                sampled,
                rate,
                suction_pressure,
                discharge_pressure,
            } => {
                let _timing = logging::start_timing(name, OperationCategory::TabularLookup);
                self.evaluate_sampled(
                    sampled,
                    rate,
                    suction_pressure,
                    discharge_pressure,
                    name,
                    resolver,
                )?
            }
            EnergyModel::CompressorVariableSpeed {
                train,
                rate,
                suction_pressure,
                discharge_pressure,
            } => {
                let _timing = logging::start_timing(name, OperationCategory::TrainSolve);
                let rate = self.expression_value(rate, name, resolver)?;
                let suction = self.expression_value(suction_pressure, name, resolver)?;
                let discharge = self.expression_value(discharge_pressure, name, resolver)?;
                let outcome = match train.fluid.standard_conditions_density() {
                    Ok(density) => train.evaluate(rate * density / 24.0, suction, discharge),
                    Err(_) => TrainResult::invalid(FailureStatus::InvalidRateInput),
                };
                train_consumer_result(name, outcome)
            }
            EnergyModel::CompressorSingleSpeed {
                train,
                rate,
                suction_pressure,
                discharge_pressure,
            } => {
                let _timing = logging::start_timing(name, OperationCategory::TrainSolve);
                let rate = self.expression_value(rate, name, resolver)?;
                let suction = self.expression_value(suction_pressure, name, resolver)?;
                let discharge = discharge_pressure
                    .as_ref()
                    .map(|d| self.expression_value(d, name, resolver))
                    .transpose()?;
                let outcome = match train.fluid.standard_conditions_density() {
                    Ok(density) => train.evaluate(rate * density / 24.0, suction, discharge),
                    Err(_) => TrainResult::invalid(FailureStatus::InvalidRateInput),
                };
                train_consumer_result(name, outcome)
            }
            EnergyModel::CompressorSimplified {
                train,
                rate,
                suction_pressure,
                discharge_pressure,
            } => {
                let _timing = logging::start_timing(name, OperationCategory::TrainSolve);
                let rate = self.expression_value(rate, name, resolver)?;
                let suction = self.expression_value(suction_pressure, name, resolver)?;
                let discharge = self.expression_value(discharge_pressure, name, resolver)?;
                let outcome = match train.fluid.standard_conditions_density() {
                    Ok(density) => train.evaluate(rate * density / 24.0, suction, discharge),
                    Err(_) => TrainResult::invalid(FailureStatus::InvalidRateInput),
                };
                train_consumer_result(name, outcome)
            }
            EnergyModel::CompressorWithTurbine {
                compressor,
                turbine,
            } => {
                let inner = self.evaluate_model(compressor, name, resolver)?;
                let shaft_power = inner.power.unwrap_or(f64::NAN);
                let turbine_result = if shaft_power.is_nan() {
                    turbine.evaluate(f64::NAN)
                } else {
                    turbine.evaluate(shaft_power)
                };
                ConsumerResult {
                    name: name.to_string(),
                    energy_usage: EnergyUsage::sm3_per_day(turbine_result.fuel_rate),
                    power: Some(shaft_power),
                    is_valid: inner.is_valid && turbine_result.is_valid,
                    failure_status: inner.failure_status.or(turbine_result.failure_status),
                    chosen_operational_setting: inner.chosen_operational_setting,
                    stages: inner.stages,
                    fuel_rate: Some(turbine_result.fuel_rate),
                }
            }
            EnergyModel::Tabulated {
                function,
                output,
                variables,
            } => {
                let _timing = logging::start_timing(name, OperationCategory::TabularLookup);
                let mut query = Vec::with_capacity(variables.len());
                for expression in variables {
                    query.push(self.expression_value(expression, name, resolver)?);
                }
                match function.evaluate(&query) {
                    Ok(value) => {
                        let energy_usage = match output {
                            TabulatedOutput::Power => EnergyUsage::megawatts(value),
                            TabulatedOutput::Fuel => EnergyUsage::sm3_per_day(value),
                        };
                        ConsumerResult {
                            name: name.to_string(),
                            power: matches!(output, TabulatedOutput::Power).then_some(value),
                            energy_usage,
                            is_valid: true,
                            failure_status: None,
                            chosen_operational_setting: None,
                            stages: Vec::new(),
                            fuel_rate: None,
                        }
                    }
                    Err(_) => invalid_consumer_result(name, model.energy_unit(), FailureStatus::OutsideConvexHull),
                }
            }
            EnergyModel::MultiStream {
                train,
                stream_rates,
                suction_pressure,
                discharge_pressure,
                interstage_pressure,
            } => {
                let _timing = logging::start_timing(name, OperationCategory::TrainSolve);
                self.evaluate_multi_stream(
                    train,
                    stream_rates,
                    suction_pressure,
                    discharge_pressure,
                    interstage_pressure,
                    name,
                    resolver,
                )?
            }
        };
        Ok(result)
    }

    fn evaluate_sampled(
        &self,
        sampled: &crate::physics::tabular::SampledCompressor,
        rate: &crate::config::expression::Expression,
        suction_pressure: &Option<crate::config::expression::Expression>,
        discharge_pressure: &Option<crate::config::expression::Expression>,
        name: &str,
        resolver: &impl Fn(&str) -> Option<f64>,
    ) -> Result<ConsumerResult, EvaluationError> {
        use crate::physics::tabular::SampledAxisKind;

        let mut query = Vec::with_capacity(sampled.axes.len());
        for axis in &sampled.axes {
            let value = match axis {
                SampledAxisKind::Rate => Some(self.expression_value(rate, name, resolver)?),
                SampledAxisKind::SuctionPressure => suction_pressure
                    .as_ref()
                    .map(|p| self.expression_value(p, name, resolver))
                    .transpose()?,
                SampledAxisKind::DischargePressure => discharge_pressure
                    .as_ref()
                    .map(|p| self.expression_value(p, name, resolver))
                    .transpose()?,
            };
            match value {
                Some(value) => query.push(value),
                None => {
                    let failure = match axis {
                        SampledAxisKind::SuctionPressure => FailureStatus::InvalidSuctionPressure,
                        SampledAxisKind::DischargePressure => {
                            FailureStatus::InvalidDischargePressure
                        }
                        SampledAxisKind::Rate => FailureStatus::InvalidRateInput,
                    };
                    return Ok(invalid_consumer_result(
                        name,
                        EnergyUnit::MegaWatts,
                        failure,
                    ));
                }
            }
        }

        let outcome = sampled.evaluate(&query);
        let unit = if sampled.power.is_some() {
            EnergyUnit::MegaWatts
        } else {
            EnergyUnit::StandardCubicMetresPerDay
        };
        let value = match unit {
            EnergyUnit::MegaWatts => outcome.power.unwrap_or(f64::NAN),
            _ => outcome.fuel_rate.unwrap_or(f64::NAN),
        };
        Ok(ConsumerResult {
            name: name.to_string(),
            energy_usage: EnergyUsage { value, unit },
            power: outcome.power,
            is_valid: outcome.is_valid,
            failure_status: outcome.failure_status,
            chosen_operational_setting: None,
            stages: Vec::new(),
            fuel_rate: outcome.fuel_rate,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_multi_stream(
        &self,
        train: &crate::physics::train::MultiStreamTrain,
        stream_rates: &[crate::config::expression::Expression],
        suction_pressure: &crate::config::expression::Expression,
        discharge_pressure: &crate::config::expression::Expression,
        interstage_pressure: &Option<crate::config::expression::Expression>,
        name: &str,
        resolver: &impl Fn(&str) -> Option<f64>,
    ) -> Result<ConsumerResult, EvaluationError> {
        use crate::physics::train::StreamKind;

        // Standard density of the feed converts outgoing stream rates too
        let feed_density = train
            .streams
            .iter()
            .find_map(|s| match &s.kind {
                StreamKind::Ingoing(fluid) => fluid.standard_conditions_density().ok(),
                StreamKind::Outgoing => None,
            })
            .unwrap_or(f64::NAN);

        let mut mass_rates = Vec::with_capacity(stream_rates.len());
        for (stream, expression) in train.streams.iter().zip(stream_rates.iter()) {
            let rate = self.expression_value(expression, name, resolver)?;
            let density = match &stream.kind {
                StreamKind::Ingoing(fluid) => {
                    fluid.standard_conditions_density().unwrap_or(f64::NAN)
                }
                StreamKind::Outgoing => feed_density,
            };
            mass_rates.push(rate * density / 24.0);
        }

        let suction = self.expression_value(suction_pressure, name, resolver)?;
        let discharge = self.expression_value(discharge_pressure, name, resolver)?;
        let interstage = interstage_pressure
            .as_ref()
            .map(|p| self.expression_value(p, name, resolver))
            .transpose()?;

        let outcome = train.evaluate(&mass_rates, suction, discharge, interstage);
        Ok(train_consumer_result(name, outcome))
    }

    fn resolve_settings(
        &self,
        settings: &[SystemSettingSpec],
        name: &str,
        resolver: &impl Fn(&str) -> Option<f64>,
    ) -> Result<Vec<OperationalSetting>, EvaluationError> {
        let mut resolved = Vec::with_capacity(settings.len());
        for setting in settings {
            let rates = match (&setting.rate_fractions, &setting.rates) {
                (Some(fractions), None) => RateSpec::Fractions(
                    fractions
                        .iter()
                        .map(|f| self.expression_value(f, name, resolver))
                        .collect::<Result<_, _>>()?,
                ),
                (None, Some(rates)) => RateSpec::Rates(
                    rates
                        .iter()
                        .map(|r| self.expression_value(r, name, resolver))
                        .collect::<Result<_, _>>()?,
                ),
                _ => RateSpec::Rates(Vec::new()),
            };
            let suction_pressures =
                self.resolve_pressures(&setting.suction_pressures, name, resolver)?;
            let discharge_pressures =
                self.resolve_pressures(&setting.discharge_pressures, name, resolver)?;
            resolved.push(OperationalSetting {
                rates,
                suction_pressures,
                discharge_pressures,
                crossover: setting.crossover.clone(),
            });
        }
        Ok(resolved)
    }

    fn resolve_pressures(
        &self,
        pressures: &PressureExpressions,
        name: &str,
        resolver: &impl Fn(&str) -> Option<f64>,
    ) -> Result<PressureSpec, EvaluationError> {
        Ok(match pressures {
            PressureExpressions::Common(expression) => {
                PressureSpec::Common(self.expression_value(expression, name, resolver)?)
            }
            PressureExpressions::PerUnit(expressions) => PressureSpec::PerUnit(
                expressions
                    .iter()
                    .map(|e| self.expression_value(e, name, resolver))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

fn invalid_consumer_result(name: &str, unit: EnergyUnit, failure: FailureStatus) -> ConsumerResult {
    ConsumerResult {
        name: name.to_string(),
        energy_usage: EnergyUsage {
            value: f64::NAN,
            unit,
        },
        power: None,
        is_valid: false,
        failure_status: Some(failure),
        chosen_operational_setting: None,
        stages: Vec::new(),
        fuel_rate: None,
    }
}

fn train_consumer_result(name: &str, outcome: TrainResult) -> ConsumerResult {
    ConsumerResult {
        name: name.to_string(),
        energy_usage: EnergyUsage::megawatts(outcome.power),
        power: Some(outcome.power),
        is_valid: outcome.is_valid,
        failure_status: outcome.failure_status,
        chosen_operational_setting: None,
        stages: outcome.stage_records(),
        fuel_rate: None,
    }
}
