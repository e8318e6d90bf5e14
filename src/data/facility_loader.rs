use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Deserialize;
use thiserror::Error;

use crate::config::expression::Expression;
use crate::config::facility::{
    Consumer, Emission, EnergyModel, FacilityModel, FuelType, GeneratorSet, Installation,
    PowerFuelTable, PressureExpressions, SystemSettingSpec, TabulatedOutput,
};
use crate::config::temporal::TemporalModel;
use crate::config::validation::{
    check_crossover, check_multi_stream_train, check_unique_names, reject_economic_fields,
    validate_model, ConfigError,
};
use crate::data::timeseries_loader::{load_time_series, DateFormat, ResourceError};
use crate::physics::chart::curve::ChartCurve;
use crate::physics::chart::{
    CompressorChart, GenericChartFromDesignPoint, GenericChartFromInput, PumpChart,
};
use crate::physics::fluid::{Composition, EosModel, FluidModel};
use crate::physics::pump::{EnergyAdjustment, PumpModel};
use crate::physics::stage::CompressorStage;
use crate::physics::tabular::{SampledAxisKind, SampledCompressor, TabulatedFunction};
use crate::physics::train::{
    InterstagePressureControl, MultiStreamTrain, PressureControlStrategy, SimplifiedStage,
    SimplifiedVariableSpeedTrain, SingleSpeedTrain, StreamKind, TrainStream, VariableSpeedTrain,
};
use crate::physics::train::simplified::{SimplifiedChart, StagePlan};
use crate::physics::turbine::Turbine;
use crate::core::system::{ConsumerSystem, SystemUnit};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("cannot read configuration '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl LoadError {
    /// Process exit code per the external contract: configuration errors
    /// exit 1, missing or broken resources exit 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::Config(_) | LoadError::Parse(_) => 1,
            LoadError::Resource(_) | LoadError::Io { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EfficiencyUnit {
    #[default]
    Fraction,
    Percentage,
}

impl EfficiencyUnit {
    fn to_fraction(self, value: f64) -> f64 {
        match self {
            EfficiencyUnit::Fraction => value,
            EfficiencyUnit::Percentage => value / 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeadUnit {
    #[default]
    KiloJoulePerKilogram,
    Metres,
}

impl HeadUnit {
    /// To specific energy [J/kg].
    fn to_joule_per_kg(self, value: f64) -> f64 {
        match self {
            HeadUnit::KiloJoulePerKilogram => value * 1000.0,
            HeadUnit::Metres => value * crate::config::constants::GRAVITY,
        }
    }
}

// ---------------------------------------------------------------------------
// Facility characterization CSVs
// ---------------------------------------------------------------------------

struct FacilityTable {
    headers: Vec<String>,
    rows: Vec<Vec<f64>>,
}

fn read_numeric_table(path: &Path) -> Result<FacilityTable, ResourceError> {
    let mut file = File::open(path).map_err(|source| ResourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|source| ResourceError::Io {
            path: path.display().to_string(),
            source,
        })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(contents.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .map_err(|source| ResourceError::Csv {
            path: path.display().to_string(),
            source,
        })?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let name = path.display().to_string();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| ResourceError::Csv {
            path: name.clone(),
            source,
        })?;
        let mut row = Vec::with_capacity(headers.len());
        for (index, header) in headers.iter().enumerate() {
            let raw = record.get(index).unwrap_or("");
            row.push(
                raw.parse::<f64>()
                    .map_err(|_| ResourceError::NonNumericValue {
                        resource: name.clone(),
                        column: header.clone(),
                        value: raw.to_string(),
                    })?,
            );
        }
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(ResourceError::NoRows { resource: name });
    }
    Ok(FacilityTable { headers, rows })
}

impl FacilityTable {
    fn column(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.headers.iter().position(|h| h == name)?;
        Some(self.rows.iter().map(|r| r[index]).collect())
    }

    fn require_column(&self, name: &str, path: &Path) -> Result<Vec<f64>, ResourceError> {
        self.column(name)
            .ok_or_else(|| ResourceError::InvalidFacilityFile {
                resource: path.display().to_string(),
                detail: format!("missing column {}", name),
            })
    }
}

/// Generator-set characterization: POWER [MW] to FUEL [Sm3/day].
pub fn load_generator_fuel_table(path: &Path) -> Result<PowerFuelTable, ResourceError> {
    let table = read_numeric_table(path)?;
    let power = table.require_column("POWER", path)?;
    let fuel = table.require_column("FUEL", path)?;
    PowerFuelTable::new(power, fuel).map_err(|e| ResourceError::InvalidFacilityFile {
        resource: path.display().to_string(),
        detail: e.to_string(),
    })
}

fn group_curves(
    rates: &[f64],
    heads: &[f64],
    efficiencies: &[f64],
    speeds: Option<&[f64]>,
    path: &Path,
) -> Result<Vec<ChartCurve>, ResourceError> {
    let to_error = |detail: String| ResourceError::InvalidFacilityFile {
        resource: path.display().to_string(),
        detail,
    };

    let mut groups: BTreeMap<u64, (f64, Vec<f64>, Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for index in 0..rates.len() {
        let speed = speeds.map(|s| s[index]).unwrap_or(1.0);
        let key = speed.to_bits();
        let entry = groups
            .entry(key)
            .or_insert_with(|| (speed, Vec::new(), Vec::new(), Vec::new()));
        entry.1.push(rates[index]);
        entry.2.push(heads[index]);
        entry.3.push(efficiencies[index]);
    }

    let mut curves: Vec<(f64, ChartCurve)> = Vec::new();
    for (_, (speed, rate, head, efficiency)) in groups {
        let curve =
            ChartCurve::new(speed, rate, head, efficiency).map_err(|e| to_error(e.to_string()))?;
        curves.push((speed, curve));
    }
    curves.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("finite speeds"));
    Ok(curves.into_iter().map(|(_, c)| c).collect())
}

/// Pump chart CSV: RATE [Am3/h], HEAD [m], EFFICIENCY, optional SPEED.
pub fn load_pump_chart(
    path: &Path,
    efficiency_unit: EfficiencyUnit,
) -> Result<PumpChart, ResourceError> {
    let table = read_numeric_table(path)?;
    let rates = table.require_column("RATE", path)?;
    let heads = table.require_column("HEAD", path)?;
    let efficiencies: Vec<f64> = table
        .require_column("EFFICIENCY", path)?
        .into_iter()
        .map(|e| efficiency_unit.to_fraction(e))
        .collect();
    let speeds = table.column("SPEED");

    let curves = group_curves(&rates, &heads, &efficiencies, speeds.as_deref(), path)?;
    if curves.len() == 1 {
        Ok(PumpChart::single_speed(curves.into_iter().next().expect("one curve")))
    } else {
        PumpChart::variable_speed(curves).map_err(|e| ResourceError::InvalidFacilityFile {
            resource: path.display().to_string(),
            detail: e.to_string(),
        })
    }
}

/// Compressor chart CSV: RATE [Am3/h], HEAD, EFFICIENCY, optional SPEED.
pub fn load_compressor_chart(
    path: &Path,
    head_unit: HeadUnit,
    efficiency_unit: EfficiencyUnit,
) -> Result<CompressorChart, ResourceError> {
    let table = read_numeric_table(path)?;
    let rates = table.require_column("RATE", path)?;
    let heads: Vec<f64> = table
        .require_column("HEAD", path)?
        .into_iter()
        .map(|h| head_unit.to_joule_per_kg(h))
        .collect();
    let efficiencies: Vec<f64> = table
        .require_column("EFFICIENCY", path)?
        .into_iter()
        .map(|e| efficiency_unit.to_fraction(e))
        .collect();
    let speeds = table.column("SPEED");

    let curves = group_curves(&rates, &heads, &efficiencies, speeds.as_deref(), path)?;
    if curves.len() == 1 {
        Ok(CompressorChart::single_speed(
            curves.into_iter().next().expect("one curve"),
        ))
    } else {
        CompressorChart::variable_speed(curves).map_err(|e| ResourceError::InvalidFacilityFile {
            resource: path.display().to_string(),
            detail: e.to_string(),
        })
    }
}

/// Sampled compressor CSV: input columns among RATE [Sm3/day],
/// SUCTION_PRESSURE [bar], DISCHARGE_PRESSURE [bar]; outputs POWER [MW]
/// and/or FUEL [Sm3/day].
pub fn load_sampled_compressor(path: &Path) -> Result<SampledCompressor, ResourceError> {
    let table = read_numeric_table(path)?;
    let to_error = |detail: String| ResourceError::InvalidFacilityFile {
        resource: path.display().to_string(),
        detail,
    };

    let mut axes = Vec::new();
    let mut axis_columns: Vec<Vec<f64>> = Vec::new();
    for (header, kind) in [
        ("RATE", SampledAxisKind::Rate),
        ("SUCTION_PRESSURE", SampledAxisKind::SuctionPressure),
        ("DISCHARGE_PRESSURE", SampledAxisKind::DischargePressure),
    ] {
        if let Some(column) = table.column(header) {
            axes.push(kind);
            axis_columns.push(column);
        }
    }
    if axes.is_empty() {
        return Err(to_error("needs at least one input column".to_string()));
    }

    let points: Vec<Vec<f64>> = (0..axis_columns[0].len())
        .map(|row| axis_columns.iter().map(|col| col[row]).collect())
        .collect();

    let build = |values: Vec<f64>| {
        TabulatedFunction::new(points.clone(), values).map_err(|e| to_error(e.to_string()))
    };
    let power = table.column("POWER").map(build).transpose()?;
    let fuel = table.column("FUEL").map(build).transpose()?;
    if power.is_none() && fuel.is_none() {
        return Err(to_error("needs a POWER or FUEL column".to_string()));
    }

    Ok(SampledCompressor::new(axes, power, fuel))
}

/// Generic tabulated function CSV: every column left of POWER/FUEL is an
/// input axis. Exactly one output column is required.
pub fn load_tabulated_function(
    path: &Path,
) -> Result<(TabulatedFunction, TabulatedOutput, Vec<String>), ResourceError> {
    let table = read_numeric_table(path)?;
    let to_error = |detail: String| ResourceError::InvalidFacilityFile {
        resource: path.display().to_string(),
        detail,
    };

    let power = table.column("POWER");
    let fuel = table.column("FUEL");
    let (values, output) = match (power, fuel) {
        (Some(values), None) => (values, TabulatedOutput::Power),
        (None, Some(values)) => (values, TabulatedOutput::Fuel),
        (Some(_), Some(_)) => {
            return Err(to_error("exactly one of POWER and FUEL is allowed".to_string()))
        }
        (None, None) => return Err(to_error("needs a POWER or FUEL column".to_string())),
    };

    let axis_names: Vec<String> = table
        .headers
        .iter()
        .filter(|h| *h != "POWER" && *h != "FUEL")
        .cloned()
        .collect();
    let mut columns = Vec::new();
    for name in &axis_names {
        columns.push(table.column(name).expect("header exists"));
    }
    let points: Vec<Vec<f64>> = (0..values.len())
        .map(|row| columns.iter().map(|col| col[row]).collect())
        .collect();
    let function = TabulatedFunction::new(points, values).map_err(|e| to_error(e.to_string()))?;
    Ok((function, output, axis_names))
}

// ---------------------------------------------------------------------------
// Declarative configuration (serde spec) and the model builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FacilitySpec {
    pub name: String,
    /// Optional: defaults to the first influencing time-series instant
    pub start: Option<String>,
    pub end: String,
    #[serde(default)]
    pub time_series: Vec<TimeSeriesSpec>,
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
    #[serde(default)]
    pub fuel_types: Vec<FuelTypeSpec>,
    pub installations: Vec<InstallationSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeSeriesSpec {
    pub name: String,
    pub file: String,
    #[serde(default = "default_true")]
    pub influence_time_vector: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableSpec {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuelTypeSpec {
    pub name: String,
    #[serde(default)]
    pub emissions: Vec<EmissionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmissionSpec {
    pub name: String,
    pub factor: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallationSpec {
    pub name: String,
    pub regularity: Option<String>,
    #[serde(default)]
    pub generator_sets: Vec<GeneratorSetSpec>,
    #[serde(default)]
    pub fuel_consumers: Vec<ConsumerSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorSetSpec {
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub fuel: String,
    pub electricity2fuel: TemporalSpec<String>,
    #[serde(default)]
    pub consumers: Vec<ConsumerSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerSpec {
    pub name: String,
    #[serde(default)]
    pub category: String,
    /// Fuel type for fuel consumers; electric consumers leave it out
    pub fuel: Option<String>,
    pub condition: Option<String>,
    pub power_loss_factor: Option<String>,
    pub energy_usage_model: TemporalSpec<EnergyModelSpec>,
}

/// A value constant over the horizon, or date-keyed entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TemporalSpec<T> {
    Constant(T),
    Dated(Vec<DatedEntry<T>>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatedEntry<T> {
    pub start: String,
    pub model: T,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FluidSpec {
    pub preset: Option<String>,
    pub composition: Option<Composition>,
    pub eos: EosModel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TurbineSpec {
    pub loads: Vec<f64>,
    pub efficiencies: Vec<f64>,
    pub lower_heating_value: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    pub inlet_temperature: f64,
    pub chart: String,
    #[serde(default)]
    pub head_unit: HeadUnit,
    #[serde(default)]
    pub efficiency_unit: EfficiencyUnit,
    pub control_margin: Option<f64>,
    #[serde(default)]
    pub control_margin_unit: EfficiencyUnit,
    pub pressure_drop_ahead_of_stage: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenericChartSpec {
    GenericFromDesignPoint {
        design_rate: f64,
        design_head: f64,
        design_efficiency: f64,
        #[serde(default)]
        head_unit: HeadUnit,
    },
    GenericFromInput {
        efficiency: f64,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimplifiedStageSpec {
    pub inlet_temperature: f64,
    pub chart: GenericChartSpec,
    pub control_margin: Option<f64>,
    pub pressure_drop_ahead_of_stage: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamSpec {
    pub name: String,
    /// 1-based stage number
    pub stage: usize,
    #[serde(rename = "type")]
    pub kind: StreamKindSpec,
    pub fluid: Option<FluidSpec>,
    pub rate: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamKindSpec {
    Ingoing,
    Outgoing,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterstageControlSpec {
    /// 1-based stage number the controlled pressure applies ahead of
    pub stage: usize,
    pub upstream_control: PressureControlStrategy,
    pub downstream_control: PressureControlStrategy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemUnitSpec {
    Pump {
        name: String,
        chart: String,
        #[serde(default)]
        efficiency_unit: EfficiencyUnit,
        density: f64,
        head_margin: Option<f64>,
    },
    CompressorVariableSpeed {
        name: String,
        stages: Vec<StageSpec>,
        fluid: FluidSpec,
        pressure_control: Option<PressureControlStrategy>,
        maximum_power: Option<f64>,
    },
    CompressorSingleSpeed {
        name: String,
        stages: Vec<StageSpec>,
        fluid: FluidSpec,
        pressure_control: PressureControlStrategy,
        maximum_discharge_pressure: Option<f64>,
        maximum_power: Option<f64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingSpec {
    pub rate_fractions: Option<Vec<String>>,
    pub rates: Option<Vec<String>>,
    pub suction_pressure: Option<String>,
    pub suction_pressures: Option<Vec<String>>,
    pub discharge_pressure: Option<String>,
    pub discharge_pressures: Option<Vec<String>>,
    pub crossover: Option<Vec<usize>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnergyModelSpec {
    DirectLoad {
        load: String,
    },
    DirectFuel {
        fuel_rate: String,
    },
    Pump {
        chart: String,
        #[serde(default)]
        efficiency_unit: EfficiencyUnit,
        density: f64,
        rate: String,
        suction_pressure: String,
        discharge_pressure: String,
        density_expression: Option<String>,
        head_margin: Option<f64>,
        mechanical_efficiency: Option<f64>,
        power_adjustment_factor: Option<f64>,
        power_adjustment_constant: Option<f64>,
        power_loss_factor: Option<f64>,
    },
    PumpSystem {
        units: Vec<SystemUnitSpec>,
        settings: Vec<SettingSpec>,
        total_rate: String,
    },
    CompressorSampled {
        table: String,
        rate: String,
        suction_pressure: Option<String>,
        discharge_pressure: Option<String>,
        turbine: Option<TurbineSpec>,
    },
    CompressorVariableSpeed {
        stages: Vec<StageSpec>,
        fluid: FluidSpec,
        pressure_control: Option<PressureControlStrategy>,
        maximum_power: Option<f64>,
        rate: String,
        suction_pressure: String,
        discharge_pressure: String,
    },
    CompressorSingleSpeed {
        stages: Vec<StageSpec>,
        fluid: FluidSpec,
        pressure_control: PressureControlStrategy,
        maximum_discharge_pressure: Option<f64>,
        maximum_power: Option<f64>,
        rate: String,
        suction_pressure: String,
        discharge_pressure: Option<String>,
    },
    CompressorSimplified {
        fluid: FluidSpec,
        stages: Option<Vec<SimplifiedStageSpec>>,
        unknown_stages: Option<UnknownStagesSpec>,
        maximum_power: Option<f64>,
        rate: String,
        suction_pressure: String,
        discharge_pressure: String,
    },
    CompressorSystem {
        units: Vec<SystemUnitSpec>,
        settings: Vec<SettingSpec>,
        total_rate: String,
    },
    CompressorWithTurbine {
        compressor: Box<EnergyModelSpec>,
        turbine: TurbineSpec,
    },
    Tabulated {
        table: String,
        /// Expression per axis name, matched against the table header
        variables: Vec<VariableSpec>,
    },
    CompressorMultiStream {
        stages: Vec<StageSpec>,
        streams: Vec<StreamSpec>,
        interstage_control: Option<InterstageControlSpec>,
        maximum_power: Option<f64>,
        suction_pressure: String,
        discharge_pressure: String,
        interstage_pressure: Option<String>,
    },
}

/// Load a facility configuration from a JSON file and build the runtime
/// model, loading every referenced CSV resource relative to the config.
pub fn load_facility(config_path: &Path) -> Result<FacilityModel, LoadError> {
    let mut file = File::open(config_path).map_err(|source| LoadError::Io {
        path: config_path.display().to_string(),
        source,
    })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|source| LoadError::Io {
            path: config_path.display().to_string(),
            source,
        })?;

    // Economic sections are rejected before the typed parse
    let raw: serde_json::Value = serde_json::from_str(&contents)?;
    reject_economic_fields(collect_keys(&raw).iter().map(|s| s.as_str()))?;

    let spec: FacilitySpec = serde_json::from_value(raw)?;
    let base_dir = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
    build_facility(spec, &base_dir)
}

fn collect_keys(value: &serde_json::Value) -> Vec<String> {
    let mut keys = Vec::new();
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                keys.push(key.clone());
                keys.extend(collect_keys(nested));
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                keys.extend(collect_keys(item));
            }
        }
        _ => {}
    }
    keys
}

struct Builder {
    base_dir: PathBuf,
}

pub fn build_facility(spec: FacilitySpec, base_dir: &Path) -> Result<FacilityModel, LoadError> {
    let builder = Builder {
        base_dir: base_dir.to_path_buf(),
    };

    let mut time_series = Vec::new();
    for series in &spec.time_series {
        time_series.push(load_time_series(
            &builder.base_dir.join(&series.file),
            &series.name,
            series.influence_time_vector,
        )?);
    }

    let start = match &spec.start {
        Some(text) => parse_instant(text, "start")?,
        None => time_series
            .iter()
            .filter(|t| t.influence_time_vector)
            .filter_map(|t| t.instants.first())
            .min()
            .copied()
            .ok_or_else(|| ConfigError::InvalidDefinition {
                name: spec.name.clone(),
                detail: "no start date and no influencing time series".to_string(),
            })?,
    };
    let end = parse_instant(&spec.end, "end")?;

    let mut variables = Vec::new();
    for variable in &spec.variables {
        variables.push((variable.name.clone(), parse_expression(&variable.value, &variable.name)?));
    }

    let fuel_types = spec
        .fuel_types
        .iter()
        .map(|f| FuelType {
            name: f.name.clone(),
            emissions: f
                .emissions
                .iter()
                .map(|e| Emission {
                    name: e.name.clone(),
                    factor: e.factor,
                })
                .collect(),
        })
        .collect();

    let mut installations = Vec::new();
    for installation in &spec.installations {
        installations.push(builder.build_installation(installation)?);
    }

    let model = FacilityModel {
        name: spec.name,
        start,
        end,
        time_series,
        variables,
        fuel_types,
        installations,
    };
    validate_model(&model)?;
    Ok(model)
}

fn parse_instant(text: &str, field: &str) -> Result<NaiveDateTime, ConfigError> {
    DateFormat::detect(text)
        .map(|(_, instant)| instant)
        .ok_or_else(|| ConfigError::InvalidDefinition {
            name: field.to_string(),
            detail: format!("cannot parse date '{}'", text),
        })
}

fn parse_expression(text: &str, owner: &str) -> Result<Expression, ConfigError> {
    Expression::parse(text).map_err(|e| ConfigError::InvalidDefinition {
        name: owner.to_string(),
        detail: e.to_string(),
    })
}

impl Builder {
    fn build_installation(&self, spec: &InstallationSpec) -> Result<Installation, LoadError> {
        let regularity = spec
            .regularity
            .as_ref()
            .map(|r| parse_expression(r, &spec.name))
            .transpose()?;

        let mut generator_sets = Vec::new();
        for genset in &spec.generator_sets {
            generator_sets.push(self.build_generator_set(genset)?);
        }
        let mut fuel_consumers = Vec::new();
        for consumer in &spec.fuel_consumers {
            fuel_consumers.push(self.build_consumer(consumer)?);
        }

        Ok(Installation {
            name: spec.name.clone(),
            regularity,
            generator_sets,
            fuel_consumers,
        })
    }

    fn build_generator_set(&self, spec: &GeneratorSetSpec) -> Result<GeneratorSet, LoadError> {
        let electricity_to_fuel = self.build_temporal(&spec.electricity2fuel, &spec.name, |file| {
            load_generator_fuel_table(&self.base_dir.join(file)).map_err(LoadError::from)
        })?;

        let mut consumers = Vec::new();
        for consumer in &spec.consumers {
            consumers.push(self.build_consumer(consumer)?);
        }

        Ok(GeneratorSet {
            name: spec.name.clone(),
            category: spec.category.clone(),
            fuel: spec.fuel.clone(),
            electricity_to_fuel,
            consumers,
        })
    }

    fn build_temporal<S, T>(
        &self,
        spec: &TemporalSpec<S>,
        owner: &str,
        mut build: impl FnMut(&S) -> Result<T, LoadError>,
    ) -> Result<TemporalModel<T>, LoadError> {
        match spec {
            TemporalSpec::Constant(value) => Ok(TemporalModel::constant(build(value)?)),
            TemporalSpec::Dated(entries) => {
                let mut built = Vec::new();
                for entry in entries {
                    built.push((parse_instant(&entry.start, owner)?, build(&entry.model)?));
                }
                TemporalModel::new(built).map_err(|e| {
                    LoadError::Config(ConfigError::InvalidDefinition {
                        name: owner.to_string(),
                        detail: e.to_string(),
                    })
                })
            }
        }
    }

    fn build_consumer(&self, spec: &ConsumerSpec) -> Result<Consumer, LoadError> {
        let condition = spec
            .condition
            .as_ref()
            .map(|c| parse_expression(c, &spec.name))
            .transpose()?;
        let power_loss_factor = spec
            .power_loss_factor
            .as_ref()
            .map(|p| parse_expression(p, &spec.name))
            .transpose()?;
        let model = self.build_temporal(&spec.energy_usage_model, &spec.name, |m| {
            self.build_energy_model(m, &spec.name)
        })?;

        Ok(Consumer {
            name: spec.name.clone(),
            category: spec.category.clone(),
            fuel: spec.fuel.clone(),
            condition,
            power_loss_factor,
            model,
        })
    }

    fn build_fluid(&self, spec: &FluidSpec, owner: &str) -> Result<FluidModel, LoadError> {
        let composition = match (&spec.preset, &spec.composition) {
            (Some(preset), None) => {
                Composition::preset(preset).ok_or_else(|| ConfigError::InvalidDefinition {
                    name: owner.to_string(),
                    detail: format!("unknown fluid preset '{}'", preset),
                })?
            }
            (None, Some(composition)) => composition.clone(),
            _ => {
                return Err(LoadError::Config(ConfigError::InvalidDefinition {
                    name: owner.to_string(),
                    detail: "fluid needs exactly one of preset or composition".to_string(),
                }))
            }
        };
        if composition.normalized().is_err() {
            return Err(LoadError::Config(ConfigError::MissingMethane {
                owner: owner.to_string(),
            }));
        }
        Ok(FluidModel::new(composition, spec.eos))
    }

    fn build_stage(&self, spec: &StageSpec, _owner: &str) -> Result<CompressorStage, LoadError> {
        let mut chart = load_compressor_chart(
            &self.base_dir.join(&spec.chart),
            spec.head_unit,
            spec.efficiency_unit,
        )?;
        if let Some(margin) = spec.control_margin {
            chart = chart.with_control_margin(spec.control_margin_unit.to_fraction(margin));
        }
        let mut stage = CompressorStage::new(spec.inlet_temperature, chart);
        if let Some(drop) = spec.pressure_drop_ahead_of_stage {
            stage = stage.with_pressure_drop(drop);
        }
        Ok(stage)
    }

    fn build_stages(&self, specs: &[StageSpec], owner: &str) -> Result<Vec<CompressorStage>, LoadError> {
        specs.iter().map(|s| self.build_stage(s, owner)).collect()
    }

    fn build_turbine(&self, spec: &TurbineSpec, owner: &str) -> Result<Turbine, LoadError> {
        Turbine::new(
            spec.loads.clone(),
            spec.efficiencies.clone(),
            spec.lower_heating_value,
        )
        .map_err(|e| {
            LoadError::Config(ConfigError::InvalidDefinition {
                name: owner.to_string(),
                detail: e.to_string(),
            })
        })
    }

    fn build_pump(
        &self,
        owner: &str,
        chart: &str,
        efficiency_unit: EfficiencyUnit,
        density: f64,
        head_margin: Option<f64>,
        mechanical_efficiency: Option<f64>,
        power_adjustment_factor: Option<f64>,
        power_adjustment_constant: Option<f64>,
        power_loss_factor: Option<f64>,
    ) -> Result<PumpModel, LoadError> {
        if mechanical_efficiency.is_some() && power_adjustment_factor.is_some() {
            return Err(LoadError::Config(
                ConfigError::MechanicalEfficiencyWithAdjustment {
                    name: owner.to_string(),
                },
            ));
        }
        let mut pump_chart = load_pump_chart(&self.base_dir.join(chart), efficiency_unit)?;
        if let Some(margin) = head_margin {
            pump_chart = pump_chart.with_head_margin(margin);
        }
        let factor = match (mechanical_efficiency, power_adjustment_factor) {
            (Some(efficiency), None) => 1.0 / efficiency,
            (None, Some(factor)) => factor,
            _ => 1.0,
        };
        let mut pump = PumpModel::new(pump_chart, density).with_energy_adjustment(EnergyAdjustment {
            factor,
            constant: power_adjustment_constant.unwrap_or(0.0),
        });
        if let Some(loss) = power_loss_factor {
            pump = pump.with_power_loss_factor(loss);
        }
        Ok(pump)
    }

    fn build_system_units(&self, specs: &[SystemUnitSpec]) -> Result<ConsumerSystem, LoadError> {
        let mut units = Vec::new();
        for unit in specs {
            match unit {
                SystemUnitSpec::Pump {
                    name,
                    chart,
                    efficiency_unit,
                    density,
                    head_margin,
                } => {
                    let pump = self.build_pump(
                        name,
                        chart,
                        *efficiency_unit,
                        *density,
                        *head_margin,
                        None,
                        None,
                        None,
                        None,
                    )?;
                    units.push((name.clone(), SystemUnit::Pump(pump)));
                }
                SystemUnitSpec::CompressorVariableSpeed {
                    name,
                    stages,
                    fluid,
                    pressure_control,
                    maximum_power,
                } => {
                    let mut train = VariableSpeedTrain::new(
                        self.build_stages(stages, name)?,
                        self.build_fluid(fluid, name)?,
                    );
                    if let Some(control) = pressure_control {
                        train = train.with_pressure_control(*control);
                    }
                    if let Some(cap) = maximum_power {
                        train = train.with_maximum_power(*cap);
                    }
                    units.push((name.clone(), SystemUnit::VariableSpeedTrain(train)));
                }
                SystemUnitSpec::CompressorSingleSpeed {
                    name,
                    stages,
                    fluid,
                    pressure_control,
                    maximum_discharge_pressure,
                    maximum_power,
                } => {
                    let mut train = SingleSpeedTrain::new(
                        self.build_stages(stages, name)?,
                        self.build_fluid(fluid, name)?,
                        *pressure_control,
                    );
                    if let Some(cap) = maximum_discharge_pressure {
                        if *pressure_control != PressureControlStrategy::DownstreamChoke {
                            return Err(LoadError::Config(
                                ConfigError::MaximumDischargeWithoutDownstreamChoke {
                                    name: name.clone(),
                                },
                            ));
                        }
                        train = train.with_maximum_discharge_pressure(*cap);
                    }
                    if let Some(cap) = maximum_power {
                        train = train.with_maximum_power(*cap);
                    }
                    units.push((name.clone(), SystemUnit::SingleSpeedTrain(train)));
                }
            }
        }
        check_unique_names("system unit", units.iter().map(|(n, _)| n.as_str()))?;
        Ok(ConsumerSystem::new(units))
    }

    fn build_settings(
        &self,
        specs: &[SettingSpec],
        unit_count: usize,
        owner: &str,
    ) -> Result<Vec<SystemSettingSpec>, LoadError> {
        let parse_all = |texts: &Vec<String>| -> Result<Vec<Expression>, ConfigError> {
            texts.iter().map(|t| parse_expression(t, owner)).collect()
        };

        let mut settings = Vec::new();
        for spec in specs {
            let rate_fractions = spec.rate_fractions.as_ref().map(parse_all).transpose()?;
            let rates = spec.rates.as_ref().map(parse_all).transpose()?;
            if rate_fractions.is_none() == rates.is_none() {
                return Err(LoadError::Config(ConfigError::InvalidDefinition {
                    name: owner.to_string(),
                    detail: "setting needs exactly one of rate_fractions and rates".to_string(),
                }));
            }
            let rate_count = rate_fractions
                .as_ref()
                .or(rates.as_ref())
                .map(|r| r.len())
                .unwrap_or(0);
            if rate_count != unit_count {
                return Err(LoadError::Config(ConfigError::InvalidDefinition {
                    name: owner.to_string(),
                    detail: "setting rates must match the unit count".to_string(),
                }));
            }

            // Fractions that are plain constants must sum to one
            if let Some(fractions) = &rate_fractions {
                let constants: Option<Vec<f64>> = fractions
                    .iter()
                    .map(|f| f.evaluate(&|_: &str| None).ok())
                    .collect();
                if let Some(values) = constants {
                    if (values.iter().sum::<f64>() - 1.0).abs() > 1.0e-9 {
                        return Err(LoadError::Config(ConfigError::RateFractionsNotNormalized {
                            name: owner.to_string(),
                        }));
                    }
                }
            }

            let suction_pressures =
                self.build_pressures(&spec.suction_pressure, &spec.suction_pressures, owner)?;
            let discharge_pressures =
                self.build_pressures(&spec.discharge_pressure, &spec.discharge_pressures, owner)?;
            for pressures in [&suction_pressures, &discharge_pressures] {
                if let PressureExpressions::PerUnit(values) = pressures {
                    if values.len() != unit_count {
                        return Err(LoadError::Config(ConfigError::InvalidDefinition {
                            name: owner.to_string(),
                            detail: "per-unit pressures must match the unit count".to_string(),
                        }));
                    }
                }
            }

            if let Some(crossover) = &spec.crossover {
                if crossover.len() != unit_count {
                    return Err(LoadError::Config(ConfigError::InvalidDefinition {
                        name: owner.to_string(),
                        detail: "crossover length must match the unit count".to_string(),
                    }));
                }
                check_crossover(owner, crossover)?;
            }

            settings.push(SystemSettingSpec {
                rate_fractions,
                rates,
                suction_pressures,
                discharge_pressures,
                crossover: spec.crossover.clone(),
            });
        }
        Ok(settings)
    }

    fn build_pressures(
        &self,
        scalar: &Option<String>,
        vector: &Option<Vec<String>>,
        owner: &str,
    ) -> Result<PressureExpressions, LoadError> {
        match (scalar, vector) {
            (Some(text), None) => Ok(PressureExpressions::Common(parse_expression(text, owner)?)),
            (None, Some(texts)) => Ok(PressureExpressions::PerUnit(
                texts
                    .iter()
                    .map(|t| parse_expression(t, owner))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(LoadError::Config(ConfigError::InvalidDefinition {
                name: owner.to_string(),
                detail: "setting needs exactly one scalar or per-unit pressure list".to_string(),
            })),
        }
    }

    fn build_energy_model(
        &self,
        spec: &EnergyModelSpec,
        owner: &str,
    ) -> Result<EnergyModel, LoadError> {
        match spec {
            EnergyModelSpec::DirectLoad { load } => Ok(EnergyModel::DirectLoad {
                load: parse_expression(load, owner)?,
            }),
            EnergyModelSpec::DirectFuel { fuel_rate } => Ok(EnergyModel::DirectFuel {
                fuel_rate: parse_expression(fuel_rate, owner)?,
            }),
            EnergyModelSpec::Pump {
                chart,
                efficiency_unit,
                density,
                rate,
                suction_pressure,
                discharge_pressure,
                density_expression,
                head_margin,
                mechanical_efficiency,
                power_adjustment_factor,
                power_adjustment_constant,
                power_loss_factor,
            } => Ok(EnergyModel::Pump {
                pump: self.build_pump(
                    owner,
                    chart,
                    *efficiency_unit,
                    *density,
                    *head_margin,
                    *mechanical_efficiency,
                    *power_adjustment_factor,
                    *power_adjustment_constant,
                    *power_loss_factor,
                )?,
                rate: parse_expression(rate, owner)?,
                suction_pressure: parse_expression(suction_pressure, owner)?,
                discharge_pressure: parse_expression(discharge_pressure, owner)?,
                density: density_expression
                    .as_ref()
                    .map(|d| parse_expression(d, owner))
                    .transpose()?,
            }),
            EnergyModelSpec::PumpSystem {
                units,
                settings,
                total_rate,
            } => {
                let system = self.build_system_units(units)?;
                let settings = self.build_settings(settings, system.units.len(), owner)?;
                Ok(EnergyModel::PumpSystem {
                    system,
                    settings,
                    total_rate: parse_expression(total_rate, owner)?,
                })
            }
            EnergyModelSpec::CompressorSampled {
                table,
                rate,
                suction_pressure,
                discharge_pressure,
                turbine,
            } => {
                let sampled = load_sampled_compressor(&self.base_dir.join(table))?;
                let base = EnergyModel::CompressorSampled {
                    sampled,
                    rate: parse_expression(rate, owner)?,
                    suction_pressure: suction_pressure
                        .as_ref()
                        .map(|p| parse_expression(p, owner))
                        .transpose()?,
                    discharge_pressure: discharge_pressure
                        .as_ref()
                        .map(|p| parse_expression(p, owner))
                        .transpose()?,
                };
                match turbine {
                    Some(turbine_spec) => Ok(EnergyModel::CompressorWithTurbine {
                        compressor: Box::new(base),
                        turbine: self.build_turbine(turbine_spec, owner)?,
                    }),
                    None => Ok(base),
                }
            }
            EnergyModelSpec::CompressorVariableSpeed {
                stages,
                fluid,
                pressure_control,
                maximum_power,
                rate,
                suction_pressure,
                discharge_pressure,
            } => {
                let mut train = VariableSpeedTrain::new(
                    self.build_stages(stages, owner)?,
                    self.build_fluid(fluid, owner)?,
                );
                if let Some(control) = pressure_control {
                    train = train.with_pressure_control(*control);
                }
                if let Some(cap) = maximum_power {
                    train = train.with_maximum_power(*cap);
                }
                Ok(EnergyModel::CompressorVariableSpeed {
                    train,
                    rate: parse_expression(rate, owner)?,
                    suction_pressure: parse_expression(suction_pressure, owner)?,
                    discharge_pressure: parse_expression(discharge_pressure, owner)?,
                })
            }
            EnergyModelSpec::CompressorSingleSpeed {
                stages,
                fluid,
                pressure_control,
                maximum_discharge_pressure,
                maximum_power,
                rate,
                suction_pressure,
                discharge_pressure,
            } => {
                let mut train = SingleSpeedTrain::new(
                    self.build_stages(stages, owner)?,
                    self.build_fluid(fluid, owner)?,
                    *pressure_control,
                );
                if let Some(cap) = maximum_discharge_pressure {
                    if *pressure_control != PressureControlStrategy::DownstreamChoke {
                        return Err(LoadError::Config(
                            ConfigError::MaximumDischargeWithoutDownstreamChoke {
                                name: owner.to_string(),
                            },
                        ));
                    }
                    train = train.with_maximum_discharge_pressure(*cap);
                }
                if let Some(cap) = maximum_power {
                    train = train.with_maximum_power(*cap);
                }
                Ok(EnergyModel::CompressorSingleSpeed {
                    train,
                    rate: parse_expression(rate, owner)?,
                    suction_pressure: parse_expression(suction_pressure, owner)?,
                    discharge_pressure: discharge_pressure
                        .as_ref()
                        .map(|p| parse_expression(p, owner))
                        .transpose()?,
                })
            }
            EnergyModelSpec::CompressorSimplified {
                fluid,
                stages,
                unknown_stages,
                maximum_power,
                rate,
                suction_pressure,
                discharge_pressure,
            } => {
                let plan = match (stages, unknown_stages) {
                    (Some(stage_specs), None) => {
                        let mut built = Vec::new();
                        for stage in stage_specs {
                            built.push(self.build_simplified_stage(stage, owner)?);
                        }
                        StagePlan::Known(built)
                    }
                    (None, Some(unknown)) => StagePlan::Unknown {
                        template: self.build_simplified_stage(
                            &SimplifiedStageSpec {
                                inlet_temperature: unknown.inlet_temperature,
                                chart: unknown.chart.clone(),
                                control_margin: None,
                                pressure_drop_ahead_of_stage: None,
                            },
                            owner,
                        )?,
                        maximum_pressure_ratio_per_stage: unknown
                            .maximum_pressure_ratio_per_stage
                            .unwrap_or(
                                crate::config::constants::DEFAULT_MAX_PRESSURE_RATIO_PER_STAGE,
                            ),
                    },
                    _ => {
                        return Err(LoadError::Config(ConfigError::InvalidDefinition {
                            name: owner.to_string(),
                            detail: "simplified train needs exactly one of stages and unknown_stages"
                                .to_string(),
                        }))
                    }
                };
                let mut train =
                    SimplifiedVariableSpeedTrain::new(self.build_fluid(fluid, owner)?, plan);
                if let Some(cap) = maximum_power {
                    train = train.with_maximum_power(*cap);
                }
                Ok(EnergyModel::CompressorSimplified {
                    train,
                    rate: parse_expression(rate, owner)?,
                    suction_pressure: parse_expression(suction_pressure, owner)?,
                    discharge_pressure: parse_expression(discharge_pressure, owner)?,
                })
            }
            EnergyModelSpec::CompressorSystem {
                units,
                settings,
                total_rate,
            } => {
                let system = self.build_system_units(units)?;
                let settings = self.build_settings(settings, system.units.len(), owner)?;
                Ok(EnergyModel::CompressorSystem {
                    system,
                    settings,
                    total_rate: parse_expression(total_rate, owner)?,
                })
            }
            EnergyModelSpec::CompressorWithTurbine {
                compressor,
                turbine,
            } => {
                let inner = self.build_energy_model(compressor, owner)?;
                if !matches!(
                    inner,
                    EnergyModel::CompressorSampled { .. }
                        | EnergyModel::CompressorVariableSpeed { .. }
                        | EnergyModel::CompressorSingleSpeed { .. }
                        | EnergyModel::CompressorSimplified { .. }
                        | EnergyModel::MultiStream { .. }
                ) {
                    return Err(LoadError::Config(ConfigError::InvalidDefinition {
                        name: owner.to_string(),
                        detail: "COMPRESSOR_WITH_TURBINE needs a compressor model inside".to_string(),
                    }));
                }
                Ok(EnergyModel::CompressorWithTurbine {
                    compressor: Box::new(inner),
                    turbine: self.build_turbine(turbine, owner)?,
                })
            }
            EnergyModelSpec::Tabulated { table, variables } => {
                let (function, output, axis_names) =
                    load_tabulated_function(&self.base_dir.join(table))?;
                let mut expressions = Vec::new();
                for axis in &axis_names {
                    let variable = variables.iter().find(|v| v.name == *axis).ok_or_else(|| {
                        ConfigError::InvalidDefinition {
                            name: owner.to_string(),
                            detail: format!("no expression for table axis '{}'", axis),
                        }
                    })?;
                    expressions.push(parse_expression(&variable.value, owner)?);
                }
                Ok(EnergyModel::Tabulated {
                    function,
                    output,
                    variables: expressions,
                })
            }
            EnergyModelSpec::CompressorMultiStream {
                stages,
                streams,
                interstage_control,
                maximum_power,
                suction_pressure,
                discharge_pressure,
                interstage_pressure,
            } => {
                let built_stages = self.build_stages(stages, owner)?;
                let mut built_streams = Vec::new();
                let mut stream_rates = Vec::new();
                for stream in streams {
                    let kind = match (stream.kind, &stream.fluid) {
                        (StreamKindSpec::Ingoing, Some(fluid)) => {
                            StreamKind::Ingoing(self.build_fluid(fluid, &stream.name)?)
                        }
                        (StreamKindSpec::Outgoing, None) => StreamKind::Outgoing,
                        _ => {
                            return Err(LoadError::Config(ConfigError::InvalidDefinition {
                                name: stream.name.clone(),
                                detail:
                                    "ingoing streams need a fluid, outgoing streams carry none"
                                        .to_string(),
                            }))
                        }
                    };
                    if stream.stage == 0 {
                        return Err(LoadError::Config(ConfigError::InvalidDefinition {
                            name: stream.name.clone(),
                            detail: "stream stage numbers are 1-based".to_string(),
                        }));
                    }
                    built_streams.push(TrainStream {
                        name: stream.name.clone(),
                        stage_index: stream.stage - 1,
                        kind,
                    });
                    stream_rates.push(parse_expression(&stream.rate, &stream.name)?);
                }

                let mut train = MultiStreamTrain::new(built_stages, built_streams);
                if let Some(control) = interstage_control {
                    if control.stage == 0 {
                        return Err(LoadError::Config(ConfigError::InvalidDefinition {
                            name: owner.to_string(),
                            detail: "interstage stage numbers are 1-based".to_string(),
                        }));
                    }
                    train = train.with_interstage_control(InterstagePressureControl {
                        stage_index: control.stage - 1,
                        upstream_control: control.upstream_control,
                        downstream_control: control.downstream_control,
                    });
                }
                if let Some(cap) = maximum_power {
                    train = train.with_maximum_power(*cap);
                }
                check_multi_stream_train(owner, &train)?;

                Ok(EnergyModel::MultiStream {
                    train,
                    stream_rates,
                    suction_pressure: parse_expression(suction_pressure, owner)?,
                    discharge_pressure: parse_expression(discharge_pressure, owner)?,
                    interstage_pressure: interstage_pressure
                        .as_ref()
                        .map(|p| parse_expression(p, owner))
                        .transpose()?,
                })
            }
        }
    }

    fn build_simplified_stage(
        &self,
        spec: &SimplifiedStageSpec,
        owner: &str,
    ) -> Result<SimplifiedStage, LoadError> {
        if spec.control_margin.is_some() {
            return Err(LoadError::Config(ConfigError::SimplifiedTrainUnsupportedField {
                name: owner.to_string(),
                field: "CONTROL_MARGIN",
            }));
        }
        if spec.pressure_drop_ahead_of_stage.is_some() {
            return Err(LoadError::Config(ConfigError::SimplifiedTrainUnsupportedField {
                name: owner.to_string(),
                field: "PRESSURE_DROP_AHEAD_OF_STAGE",
            }));
        }
        let chart = match &spec.chart {
            GenericChartSpec::GenericFromDesignPoint {
                design_rate,
                design_head,
                design_efficiency,
                head_unit,
            } => SimplifiedChart::FromDesignPoint(GenericChartFromDesignPoint::new(
                *design_rate,
                head_unit.to_joule_per_kg(*design_head),
                *design_efficiency,
            )),
            GenericChartSpec::GenericFromInput { efficiency } => {
                SimplifiedChart::FromInput(GenericChartFromInput::new(*efficiency))
            }
        };
        Ok(SimplifiedStage {
            inlet_temperature: spec.inlet_temperature,
            chart,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnknownStagesSpec {
    pub inlet_temperature: f64,
    pub chart: GenericChartSpec,
    pub maximum_pressure_ratio_per_stage: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("petrowatt-loader-{}", tag));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn generator_fuel_table_loads() {
        let dir = temp_dir("genset");
        let path = write_file(&dir, "genset.csv", "POWER,FUEL\n0,0\n10,10000\n40,40000\n");
        let table = load_generator_fuel_table(&path).unwrap();
        assert_eq!(table.maximum_power(), 40.0);
    }

    #[test]
    fn pump_chart_with_speed_column_is_variable_speed() {
        let dir = temp_dir("pump");
        let path = write_file(
            &dir,
            "pump.csv",
            "RATE,HEAD,EFFICIENCY,SPEED\n\
             100,1300,70,0.8\n200,1100,72,0.8\n\
             120,2100,71,1.0\n240,1800,74,1.0\n",
        );
        let chart = load_pump_chart(&path, EfficiencyUnit::Percentage).unwrap();
        assert!(!chart.is_single_speed());
    }

    #[test]
    fn sampled_compressor_requires_an_output() {
        let dir = temp_dir("sampled");
        let path = write_file(&dir, "bad.csv", "RATE\n0\n100\n");
        assert!(load_sampled_compressor(&path).is_err());

        let path = write_file(&dir, "good.csv", "RATE,POWER\n0,0\n1000000,10\n");
        let sampled = load_sampled_compressor(&path).unwrap();
        assert!(sampled.power.is_some());
        assert!(sampled.fuel.is_none());
    }

    #[test]
    fn tabulated_function_rejects_double_output() {
        let dir = temp_dir("tabulated");
        let path = write_file(&dir, "both.csv", "RATE,POWER,FUEL\n0,0,0\n1,1,1\n");
        assert!(load_tabulated_function(&path).is_err());
    }

    #[test]
    fn economic_sections_are_rejected_before_parse() {
        let dir = temp_dir("economic");
        let config = write_file(
            &dir,
            "config.json",
            r#"{
                "name": "Asset",
                "end": "2026-01-01",
                "installations": [],
                "TAX": 1.0
            }"#,
        );
        let err = load_facility(&config).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Config(ConfigError::EconomicFieldRejected { .. })
        ));
    }

    #[test]
    fn minimal_facility_builds() {
        let dir = temp_dir("minimal");
        write_file(
            &dir,
            "prod.csv",
            "DATE,GAS_PROD\n2024-01-01,1000\n2025-01-01,1200\n",
        );
        write_file(&dir, "genset.csv", "POWER,FUEL\n0,0\n10,10000\n40,40000\n");
        let config = write_file(
            &dir,
            "config.json",
            r#"{
                "name": "Asset",
                "end": "2026-01-01",
                "time_series": [
                    {"name": "SIM", "file": "prod.csv"}
                ],
                "fuel_types": [
                    {"name": "fuel_gas", "emissions": [{"name": "co2", "factor": 2.2}]}
                ],
                "installations": [
                    {
                        "name": "platform",
                        "generator_sets": [
                            {
                                "name": "genset",
                                "fuel": "fuel_gas",
                                "electricity2fuel": "genset.csv",
                                "consumers": [
                                    {
                                        "name": "base_load",
                                        "energy_usage_model": {"type": "DIRECT_LOAD", "load": "5"}
                                    }
                                ]
                            }
                        ]
                    }
                ]
            }"#,
        );
        let model = load_facility(&config).unwrap();
        assert_eq!(model.installations.len(), 1);
        // Start defaults to the first influencing instant
        assert_eq!(
            model.start,
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
        let tv = model.time_vector().unwrap();
        assert_eq!(tv.period_count(), 2);
    }
}
