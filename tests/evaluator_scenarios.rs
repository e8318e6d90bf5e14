use chrono::{NaiveDate, NaiveDateTime};

use petrowatt::config::expression::Expression;
use petrowatt::config::facility::{
    Consumer, EnergyModel, FacilityModel, FuelType, GeneratorSet, Installation, PowerFuelTable,
    PressureExpressions, SystemSettingSpec,
};
use petrowatt::config::facility::Emission;
use petrowatt::config::temporal::TemporalModel;
use petrowatt::core::evaluator::Evaluator;
use petrowatt::core::results::FailureStatus;
use petrowatt::core::system::{ConsumerSystem, SystemUnit};
use petrowatt::data::timeseries_loader::TimeSeriesResource;
use petrowatt::physics::chart::curve::ChartCurve;
use petrowatt::physics::chart::PumpChart;
use petrowatt::physics::pump::PumpModel;
use petrowatt::physics::tabular::{SampledAxisKind, SampledCompressor, TabulatedFunction};
use petrowatt::physics::turbine::Turbine;

use approx::assert_relative_eq;

fn instant(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn production_series() -> TimeSeriesResource {
    TimeSeriesResource {
        name: "SIM".to_string(),
        instants: vec![instant(2024, 1, 1), instant(2025, 1, 1)],
        columns: vec![
            ("WATER_PROD".to_string(), vec![1000.0, 0.0]),
            ("GAS_PROD".to_string(), vec![2.6e6, 2.6e6]),
        ],
        influence_time_vector: true,
    }
}

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

fn genset_table() -> PowerFuelTable {
    PowerFuelTable::new(vec![0.0, 10.0, 40.0], vec![0.0, 10_000.0, 40_000.0]).unwrap()
}

fn fuel_gas() -> FuelType {
    FuelType {
        name: "fuel_gas".to_string(),
        emissions: vec![Emission {
            name: "co2".to_string(),
            factor: 2.2,
        }],
    }
}

fn pump_consumer() -> Consumer {
    Consumer {
        name: "water_injection".to_string(),
        category: "PUMP".to_string(),
        fuel: None,
        condition: Some(Expression::parse("SIM;WATER_PROD > 0").unwrap()),
        power_loss_factor: None,
        model: TemporalModel::constant(EnergyModel::Pump {
            pump: water_pump(),
            rate: Expression::constant(5000.0),
            suction_pressure: Expression::constant(3.0),
            discharge_pressure: Expression::constant(200.0),
            density: None,
        }),
    }
}

fn single_installation_model(installation: Installation) -> FacilityModel {
    FacilityModel {
        name: "Asset".to_string(),
        start: instant(2024, 1, 1),
        end: instant(2026, 1, 1),
        time_series: vec![production_series()],
        variables: Vec::new(),
        fuel_types: vec![fuel_gas()],
        installations: vec![installation],
    }
}

#[test]
fn pump_with_condition_gating() {
    let installation = Installation {
        name: "platform".to_string(),
        regularity: None,
        generator_sets: vec![GeneratorSet {
            name: "genset".to_string(),
            category: "TURBINE-GENERATOR".to_string(),
            fuel: "fuel_gas".to_string(),
            electricity_to_fuel: TemporalModel::constant(genset_table()),
            consumers: vec![pump_consumer()],
        }],
        fuel_consumers: Vec::new(),
    };
    let model = single_installation_model(installation);
    let results = Evaluator::new(&model).evaluate().unwrap();

    // Two periods: water production on, then off
    assert_eq!(results.periods.len(), 2);

    let active = &results.periods[0].installations[0].generator_sets[0].consumers[0];
    assert!(active.is_valid);
    assert_relative_eq!(active.energy_usage.value, 1.74, epsilon = 0.01);

    let gated = &results.periods[1].installations[0].generator_sets[0].consumers[0];
    assert!(gated.is_valid);
    assert_relative_eq!(gated.energy_usage.value, 0.0);
    assert!(gated.failure_status.is_none());

    // Aggregated electric load equals the sum of electric consumer loads
    for period in &results.periods {
        let genset = &period.installations[0].generator_sets[0];
        let consumer_sum: f64 = genset.consumers.iter().map(|c| c.energy_usage.value).sum();
        assert_relative_eq!(genset.power_demand, consumer_sum.max(0.0));
    }
}

#[test]
fn turbine_driven_sampled_compressor() {
    let table = TabulatedFunction::new(
        vec![vec![0.0], vec![1.0e6], vec![2.6e6], vec![4.4e6]],
        vec![0.0, 10.0, 15.0, 20.0],
    )
    .unwrap();
    let sampled = SampledCompressor::new(vec![SampledAxisKind::Rate], Some(table), None);
    let turbine = Turbine::new(
        vec![0.0, 2.352, 11.399, 15.0, 22.767],
        vec![0.0, 0.138, 0.310, 0.328, 0.362],
        38.0,
    )
    .unwrap();

    let consumer = Consumer {
        name: "export_compressor".to_string(),
        category: "COMPRESSOR".to_string(),
        fuel: Some("fuel_gas".to_string()),
        condition: None,
        power_loss_factor: None,
        model: TemporalModel::constant(EnergyModel::CompressorWithTurbine {
            compressor: Box::new(EnergyModel::CompressorSampled {
                sampled,
                rate: Expression::parse("SIM;GAS_PROD").unwrap(),
                suction_pressure: None,
                discharge_pressure: None,
            }),
            turbine,
        }),
    };
    let installation = Installation {
        name: "platform".to_string(),
        regularity: None,
        generator_sets: Vec::new(),
        fuel_consumers: vec![consumer],
    };
    let model = single_installation_model(installation);
    let results = Evaluator::new(&model).evaluate().unwrap();

    let result = &results.periods[0].installations[0].fuel_consumers[0];
    assert!(result.is_valid);
    assert_relative_eq!(result.power.unwrap(), 15.0, epsilon = 1e-9);
    // fuel = 15 * 86400 / (38 * 0.328)
    assert_relative_eq!(
        result.fuel_rate.unwrap(),
        15.0 * 86_400.0 / (38.0 * 0.328),
        epsilon = 1e-6
    );

    // Emissions follow the computed fuel rate
    let emissions = &results.periods[0].installations[0].emissions[0];
    assert_eq!(emissions.name, "co2");
    assert_relative_eq!(
        emissions.rate_kg_per_day,
        result.fuel_rate.unwrap() * 2.2,
        epsilon = 1e-6
    );
}

#[test]
fn consumer_system_falls_through_settings() {
    // Head requirement of 1800 m: feasible at half rate, infeasible at the
    // stonewall rate, so the single-pump setting fails on head
    let discharge = 3.0 + 1800.0 * 1026.0 * 9.81 / 1.0e5;

    let system = ConsumerSystem::new(vec![
        ("pump_a".to_string(), SystemUnit::Pump(water_pump())),
        ("pump_b".to_string(), SystemUnit::Pump(water_pump())),
    ]);
    let settings = vec![
        SystemSettingSpec {
            rate_fractions: Some(vec![Expression::constant(1.0), Expression::constant(0.0)]),
            rates: None,
            suction_pressures: PressureExpressions::Common(Expression::constant(3.0)),
            discharge_pressures: PressureExpressions::Common(Expression::constant(discharge)),
            crossover: Some(vec![2, 0]),
        },
        SystemSettingSpec {
            rate_fractions: Some(vec![Expression::constant(0.5), Expression::constant(0.5)]),
            rates: None,
            suction_pressures: PressureExpressions::Common(Expression::constant(3.0)),
            discharge_pressures: PressureExpressions::Common(Expression::constant(discharge)),
            crossover: None,
        },
    ];

    let consumer = Consumer {
        name: "injection_system".to_string(),
        category: "PUMP_SYSTEM".to_string(),
        fuel: None,
        condition: None,
        power_loss_factor: None,
        model: TemporalModel::constant(EnergyModel::PumpSystem {
            system,
            settings,
            total_rate: Expression::constant(12_000.0),
        }),
    };
    let installation = Installation {
        name: "platform".to_string(),
        regularity: None,
        generator_sets: vec![GeneratorSet {
            name: "genset".to_string(),
            category: "TURBINE-GENERATOR".to_string(),
            fuel: "fuel_gas".to_string(),
            electricity_to_fuel: TemporalModel::constant(genset_table()),
            consumers: vec![consumer],
        }],
        fuel_consumers: Vec::new(),
    };
    let model = single_installation_model(installation);
    let results = Evaluator::new(&model).evaluate().unwrap();

    let result = &results.periods[0].installations[0].generator_sets[0].consumers[0];
    assert!(result.is_valid);
    assert_eq!(result.chosen_operational_setting, Some(2));
}

#[test]
fn generator_set_overload_clamps_and_marks() {
    let consumer = Consumer {
        name: "base_load".to_string(),
        category: "BASE-LOAD".to_string(),
        fuel: None,
        condition: None,
        power_loss_factor: None,
        model: TemporalModel::constant(EnergyModel::DirectLoad {
            load: Expression::constant(45.0),
        }),
    };
    let installation = Installation {
        name: "platform".to_string(),
        regularity: None,
        generator_sets: vec![GeneratorSet {
            name: "genset".to_string(),
            category: "TURBINE-GENERATOR".to_string(),
            fuel: "fuel_gas".to_string(),
            electricity_to_fuel: TemporalModel::constant(genset_table()),
            consumers: vec![consumer],
        }],
        fuel_consumers: Vec::new(),
    };
    let model = single_installation_model(installation);
    let results = Evaluator::new(&model).evaluate().unwrap();

    let genset = &results.periods[0].installations[0].generator_sets[0];
    assert!(!genset.is_valid);
    assert_eq!(genset.failure_status, Some(FailureStatus::AboveCapacity));
    assert_relative_eq!(genset.fuel_rate, 40_000.0);
    assert_relative_eq!(genset.power_demand, 45.0);
}

#[test]
fn regularity_scales_calendar_volumes() {
    let consumer = Consumer {
        name: "flare".to_string(),
        category: "FLARE".to_string(),
        fuel: Some("fuel_gas".to_string()),
        condition: None,
        power_loss_factor: None,
        model: TemporalModel::constant(EnergyModel::DirectFuel {
            fuel_rate: Expression::constant(1000.0),
        }),
    };
    let installation = Installation {
        name: "platform".to_string(),
        regularity: Some(Expression::constant(0.5)),
        generator_sets: Vec::new(),
        fuel_consumers: vec![consumer],
    };
    let model = single_installation_model(installation);
    let results = Evaluator::new(&model).evaluate().unwrap();

    let period = &results.periods[0];
    let installation_result = &period.installations[0];
    // Stream-day fuel rate is unscaled; calendar emission mass carries r
    let consumer_result = &installation_result.fuel_consumers[0];
    assert_relative_eq!(consumer_result.fuel_rate.unwrap(), 1000.0);
    let emission = &installation_result.emissions[0];
    let expected_mass = 1000.0 * 2.2 * 0.5 * period.period.duration_days();
    assert_relative_eq!(emission.period_mass_kg, expected_mass, epsilon = 1e-6);
}

#[test]
fn zero_regularity_keeps_stream_day_rates_and_zeroes_calendar_mass() {
    let consumer = Consumer {
        name: "flare".to_string(),
        category: "FLARE".to_string(),
        fuel: Some("fuel_gas".to_string()),
        condition: None,
        power_loss_factor: None,
        model: TemporalModel::constant(EnergyModel::DirectFuel {
            fuel_rate: Expression::constant(1000.0),
        }),
    };
    let installation = Installation {
        name: "platform".to_string(),
        regularity: Some(Expression::constant(0.0)),
        generator_sets: Vec::new(),
        fuel_consumers: vec![consumer],
    };
    let model = single_installation_model(installation);
    let results = Evaluator::new(&model).evaluate().unwrap();

    let installation_result = &results.periods[0].installations[0];
    assert_relative_eq!(
        installation_result.fuel_consumers[0].fuel_rate.unwrap(),
        1000.0
    );
    assert_relative_eq!(installation_result.emissions[0].period_mass_kg, 0.0);
}

#[test]
fn power_loss_factor_divides_energy() {
    let consumer = Consumer {
        name: "base_load".to_string(),
        category: "BASE-LOAD".to_string(),
        fuel: None,
        condition: None,
        power_loss_factor: Some(Expression::constant(0.05)),
        model: TemporalModel::constant(EnergyModel::DirectLoad {
            load: Expression::constant(9.5),
        }),
    };
    let installation = Installation {
        name: "platform".to_string(),
        regularity: None,
        generator_sets: vec![GeneratorSet {
            name: "genset".to_string(),
            category: "TURBINE-GENERATOR".to_string(),
            fuel: "fuel_gas".to_string(),
            electricity_to_fuel: TemporalModel::constant(genset_table()),
            consumers: vec![consumer],
        }],
        fuel_consumers: Vec::new(),
    };
    let model = single_installation_model(installation);
    let results = Evaluator::new(&model).evaluate().unwrap();

    let consumer_result = &results.periods[0].installations[0].generator_sets[0].consumers[0];
    assert_relative_eq!(consumer_result.energy_usage.value, 10.0, epsilon = 1e-9);
}

#[test]
fn negative_net_demand_clamps_to_zero() {
    let wind = Consumer {
        name: "offshore_wind".to_string(),
        category: "WIND".to_string(),
        fuel: None,
        condition: None,
        power_loss_factor: None,
        model: TemporalModel::constant(EnergyModel::DirectLoad {
            load: Expression::constant(-12.0),
        }),
    };
    let load = Consumer {
        name: "base_load".to_string(),
        category: "BASE-LOAD".to_string(),
        fuel: None,
        condition: None,
        power_loss_factor: None,
        model: TemporalModel::constant(EnergyModel::DirectLoad {
            load: Expression::constant(5.0),
        }),
    };
    let installation = Installation {
        name: "platform".to_string(),
        regularity: None,
        generator_sets: vec![GeneratorSet {
            name: "genset".to_string(),
            category: "TURBINE-GENERATOR".to_string(),
            fuel: "fuel_gas".to_string(),
            electricity_to_fuel: TemporalModel::constant(genset_table()),
            consumers: vec![load, wind],
        }],
        fuel_consumers: Vec::new(),
    };
    let model = single_installation_model(installation);
    let results = Evaluator::new(&model).evaluate().unwrap();

    let genset = &results.periods[0].installations[0].generator_sets[0];
    assert_relative_eq!(genset.power_demand, 0.0);
    assert_relative_eq!(genset.fuel_rate, 0.0);
    assert!(genset.is_valid);
}

#[test]
fn evaluation_is_deterministic_and_order_stable() {
    let installation = Installation {
        name: "platform".to_string(),
        regularity: None,
        generator_sets: vec![GeneratorSet {
            name: "genset".to_string(),
            category: "TURBINE-GENERATOR".to_string(),
            fuel: "fuel_gas".to_string(),
            electricity_to_fuel: TemporalModel::constant(genset_table()),
            consumers: vec![pump_consumer()],
        }],
        fuel_consumers: Vec::new(),
    };
    let model = single_installation_model(installation);

    let first = Evaluator::new(&model).evaluate().unwrap();
    let second = Evaluator::new(&model).evaluate().unwrap();
    let parallel = Evaluator::new(&model).evaluate_parallel().unwrap();

    let as_json = |r: &petrowatt::core::results::EvaluationResults| {
        serde_json::to_string(r).expect("results serialize")
    };
    assert_eq!(as_json(&first), as_json(&second));
    assert_eq!(as_json(&first), as_json(&parallel));

    // Series accessors return results in period order
    let series = first.consumer_series("water_injection");
    assert_eq!(series.len(), 2);
    assert!(series[0].energy_usage.value > series[1].energy_usage.value);
    assert_eq!(first.genset_series("genset").len(), 2);
}
