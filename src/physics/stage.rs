use crate::config::constants::{
    GAS_CONSTANT, JOULES_PER_HOUR_PER_MW, MAX_SOLVER_ITERATIONS, STAGE_CONVERGENCE_TOLERANCE,
};
use crate::core::results::{FailureStatus, StageRecord};
use crate::physics::chart::{ChartAreaFlag, CompressorChart, CompressorChartQuery};
use crate::physics::fluid::{FluidError, FluidStream};

/// One compression stage: inter-stage cooling to a fixed inlet
/// temperature, an optional pressure drop ahead of the inlet, and a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressorStage {
    /// Inlet temperature after cooling [K]
    pub inlet_temperature: f64,
    pub chart: CompressorChart,
    /// Pressure drop ahead of the stage [bar]
    pub pressure_drop_ahead_of_stage: f64,
}

/// Outcome of a forward stage calculation at a given shaft speed.
#[derive(Debug, Clone, PartialEq)]
pub struct StageCalculation {
    /// Conditioned inlet (cooled, pressure drop applied)
    pub inlet: FluidStream,
    pub outlet: FluidStream,
    pub chart: CompressorChartQuery,
    pub speed: f64,
    /// Shaft power including recirculated flow [MW]
    pub power: f64,
}

impl StageCalculation {
    pub fn failure(&self) -> Option<FailureStatus> {
        match self.chart.flag {
            ChartAreaFlag::AboveMaximumFlow => Some(FailureStatus::AboveMaxFlow),
            ChartAreaFlag::AboveMaximumHead => Some(FailureStatus::AboveMaxHead),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.failure().is_none()
    }

    pub fn to_record(&self) -> StageRecord {
        StageRecord {
            inlet_pressure: self.inlet.state.pressure,
            outlet_pressure: self.outlet.state.pressure,
            inlet_temperature: self.inlet.state.temperature,
            outlet_temperature: self.outlet.state.temperature,
            inlet_density: self.inlet.state.density,
            outlet_density: self.outlet.state.density,
            rate: self.chart.rate_applied,
            recirculation: self.chart.recirculation,
            speed: self.speed,
            polytropic_head: self.chart.polytropic_head,
            polytropic_efficiency: self.chart.polytropic_efficiency,
            power: self.power,
        }
    }
}

impl CompressorStage {
    pub fn new(inlet_temperature: f64, chart: CompressorChart) -> Self {
        Self {
            inlet_temperature,
            chart,
            pressure_drop_ahead_of_stage: 0.0,
        }
    }

    pub fn with_pressure_drop(mut self, pressure_drop_bar: f64) -> Self {
        self.pressure_drop_ahead_of_stage = pressure_drop_bar;
        self
    }

    /// Forward polytropic calculation: chart head at (rate, speed) fixes the
    /// discharge pressure. The average compressibility and heat-capacity
    /// ratio over the stage are iterated to convergence.
    ///
    /// Extra recirculation [Am3/h] is added on top of the through-flow
    /// before the chart lookup; the ASV may add more below the surge line.
    pub fn evaluate_at_speed(
        &self,
        feed: &FluidStream,
        speed: f64,
        extra_recirculation: f64,
    ) -> Result<StageCalculation, FailureStatus> {
        let inlet_pressure = feed.state.pressure - self.pressure_drop_ahead_of_stage;
        if inlet_pressure <= 0.0 {
            return Err(FailureStatus::InvalidSuctionPressure);
        }
        let inlet = feed
            .with_conditions(inlet_pressure, self.inlet_temperature)
            .map_err(map_fluid_error)?;

        let through_rate = inlet.actual_volume_rate();
        let query = self.chart.query(through_rate + extra_recirculation, speed);

        let head = query.polytropic_head;
        let efficiency = query.polytropic_efficiency;
        let state_in = inlet.state;

        let mut z_avg = state_in.z;
        let mut kappa_avg = state_in.kappa;
        let mut outlet_state = state_in;
        let mut converged = false;
        for _ in 0..MAX_SOLVER_ITERATIONS {
            let n_over_n_minus_1 = kappa_avg * efficiency / (kappa_avg - 1.0);
            let specific_gas_energy =
                z_avg * GAS_CONSTANT * state_in.temperature / state_in.molar_mass;
            let pressure_ratio =
                (1.0 + head / (specific_gas_energy * n_over_n_minus_1)).powf(n_over_n_minus_1);
            if !pressure_ratio.is_finite() || pressure_ratio <= 0.0 {
                return Err(FailureStatus::StageNonConvergent);
            }
            let outlet_pressure = state_in.pressure * pressure_ratio;
            let outlet_enthalpy = state_in.enthalpy + head / efficiency;
            outlet_state = inlet
                .fluid
                .flash_ph(outlet_pressure, outlet_enthalpy)
                .map_err(map_fluid_error)?;

            let z_next = 0.5 * (state_in.z + outlet_state.z);
            let kappa_next = 0.5 * (state_in.kappa + outlet_state.kappa);
            if (z_next - z_avg).abs() < STAGE_CONVERGENCE_TOLERANCE
                && (kappa_next - kappa_avg).abs() < STAGE_CONVERGENCE_TOLERANCE
            {
                converged = true;
                z_avg = z_next;
                kappa_avg = kappa_next;
                break;
            }
            z_avg = z_next;
            kappa_avg = kappa_next;
        }
        if !converged {
            return Err(FailureStatus::StageNonConvergent);
        }

        // Recirculated mass passes the impeller too
        let impeller_mass_rate = query.rate_applied * state_in.density;
        let power = head * impeller_mass_rate / efficiency / JOULES_PER_HOUR_PER_MW;

        let outlet = FluidStream {
            fluid: inlet.fluid.clone(),
            mass_rate: inlet.mass_rate,
            state: outlet_state,
        };

        Ok(StageCalculation {
            inlet,
            outlet,
            chart: query,
            speed,
            power,
        })
    }
}

fn map_fluid_error(err: FluidError) -> FailureStatus {
    match err {
        FluidError::NonPhysicalState { .. } => FailureStatus::InvalidSuctionPressure,
        _ => FailureStatus::StageNonConvergent,
    }
}
