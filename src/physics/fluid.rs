use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::constants::{
    GAS_CONSTANT, STANDARD_PRESSURE_BARA, STANDARD_TEMPERATURE_KELVIN,
};

/// Fixed component slate. Compositions are mole fractions over this set.
pub const N_COMPONENTS: usize = 11;

#[derive(Debug, Clone, Copy)]
struct ComponentData {
    /// Molar mass [kg/mol]
    molar_mass: f64,
    /// Critical temperature [K]
    critical_temperature: f64,
    /// Critical pressure [bara]
    critical_pressure: f64,
    /// Acentric factor
    acentric_factor: f64,
    /// Ideal-gas heat capacity cp = a + bT + cT^2 + dT^3 [J/(mol K)]
    cp_coefficients: [f64; 4],
}

// Order matches Composition::as_fractions: water, nitrogen, CO2, methane,
// ethane, propane, i-butane, n-butane, i-pentane, n-pentane, n-hexane.
const COMPONENTS: [ComponentData; N_COMPONENTS] = [
    ComponentData {
        molar_mass: 0.018_015,
        critical_temperature: 647.10,
        critical_pressure: 220.64,
        acentric_factor: 0.345,
        cp_coefficients: [32.24, 0.1923e-2, 1.055e-5, -3.595e-9],
    },
    ComponentData {
        molar_mass: 0.028_014,
        critical_temperature: 126.20,
        critical_pressure: 33.98,
        acentric_factor: 0.037,
        cp_coefficients: [28.90, -0.1571e-2, 0.8081e-5, -2.873e-9],
    },
    ComponentData {
        molar_mass: 0.044_010,
        critical_temperature: 304.13,
        critical_pressure: 73.77,
        acentric_factor: 0.225,
        cp_coefficients: [22.26, 5.981e-2, -3.501e-5, 7.469e-9],
    },
    ComponentData {
        molar_mass: 0.016_043,
        critical_temperature: 190.56,
        critical_pressure: 45.99,
        acentric_factor: 0.011,
        cp_coefficients: [19.89, 5.024e-2, 1.269e-5, -11.01e-9],
    },
    ComponentData {
        molar_mass: 0.030_069,
        critical_temperature: 305.32,
        critical_pressure: 48.72,
        acentric_factor: 0.099,
        cp_coefficients: [6.900, 17.27e-2, -6.406e-5, 7.285e-9],
    },
    ComponentData {
        molar_mass: 0.044_096,
        critical_temperature: 369.83,
        critical_pressure: 42.48,
        acentric_factor: 0.152,
        cp_coefficients: [-4.04, 30.48e-2, -15.72e-5, 31.74e-9],
    },
    ComponentData {
        molar_mass: 0.058_122,
        critical_temperature: 407.85,
        critical_pressure: 36.40,
        acentric_factor: 0.186,
        cp_coefficients: [-7.913, 41.60e-2, -23.01e-5, 49.91e-9],
    },
    ComponentData {
        molar_mass: 0.058_122,
        critical_temperature: 425.12,
        critical_pressure: 37.96,
        acentric_factor: 0.200,
        cp_coefficients: [3.96, 37.15e-2, -18.34e-5, 35.00e-9],
    },
    ComponentData {
        molar_mass: 0.072_149,
        critical_temperature: 460.40,
        critical_pressure: 33.80,
        acentric_factor: 0.229,
        cp_coefficients: [-9.525, 50.66e-2, -27.29e-5, 57.23e-9],
    },
    ComponentData {
        molar_mass: 0.072_149,
        critical_temperature: 469.70,
        critical_pressure: 33.70,
        acentric_factor: 0.252,
        cp_coefficients: [6.774, 45.43e-2, -22.46e-5, 42.29e-9],
    },
    ComponentData {
        molar_mass: 0.086_175,
        critical_temperature: 507.60,
        critical_pressure: 30.25,
        acentric_factor: 0.301,
        cp_coefficients: [6.938, 55.22e-2, -28.65e-5, 57.69e-9],
    },
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FluidError {
    #[error("equation of state did not converge during {operation}")]
    EosConvergence { operation: String },
    #[error("non-physical state requested: pressure {pressure_bara} bara, temperature {temperature_kelvin} K")]
    NonPhysicalState {
        pressure_bara: f64,
        temperature_kelvin: f64,
    },
    #[error("composition must contain methane")]
    MissingMethane,
    #[error("cannot mix streams with different equations of state")]
    IncompatibleEos,
    #[error("cannot mix an empty set of streams")]
    EmptyMixing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EosModel {
    Srk,
    Pr,
    GergSrk,
    GergPr,
}

impl EosModel {
    /// The GERG variants share the cubic property path; molar mass always
    /// comes from the cubic component table.
    fn cubic(self) -> CubicForm {
        match self {
            EosModel::Srk | EosModel::GergSrk => CubicForm::Srk,
            EosModel::Pr | EosModel::GergPr => CubicForm::Pr,
        }
    }
}

impl FromStr for EosModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SRK" => Ok(EosModel::Srk),
            "PR" => Ok(EosModel::Pr),
            "GERG_SRK" => Ok(EosModel::GergSrk),
            "GERG_PR" => Ok(EosModel::GergPr),
            _ => Err(format!("Unknown equation of state: {}", s)),
        }
    }
}

impl fmt::Display for EosModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EosModel::Srk => write!(f, "SRK"),
            EosModel::Pr => write!(f, "PR"),
            EosModel::GergSrk => write!(f, "GERG_SRK"),
            EosModel::GergPr => write!(f, "GERG_PR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CubicForm {
    Srk,
    Pr,
}

/// Mole fractions over the fixed component set. Stored as entered;
/// normalized on the fly wherever fractions are consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    #[serde(default)]
    pub water: f64,
    #[serde(default)]
    pub nitrogen: f64,
    #[serde(default)]
    pub co2: f64,
    pub methane: f64,
    #[serde(default)]
    pub ethane: f64,
    #[serde(default)]
    pub propane: f64,
    #[serde(default)]
    pub i_butane: f64,
    #[serde(default)]
    pub n_butane: f64,
    #[serde(default)]
    pub i_pentane: f64,
    #[serde(default)]
    pub n_pentane: f64,
    #[serde(default)]
    pub n_hexane: f64,
}

impl Composition {
    pub fn from_fractions(fractions: [f64; N_COMPONENTS]) -> Self {
        Self {
            water: fractions[0],
            nitrogen: fractions[1],
            co2: fractions[2],
            methane: fractions[3],
            ethane: fractions[4],
            propane: fractions[5],
            i_butane: fractions[6],
            n_butane: fractions[7],
            i_pentane: fractions[8],
            n_pentane: fractions[9],
            n_hexane: fractions[10],
        }
    }

    pub fn as_fractions(&self) -> [f64; N_COMPONENTS] {
        [
            self.water,
            self.nitrogen,
            self.co2,
            self.methane,
            self.ethane,
            self.propane,
            self.i_butane,
            self.n_butane,
            self.i_pentane,
            self.n_pentane,
            self.n_hexane,
        ]
    }

    pub fn normalized(&self) -> Result<[f64; N_COMPONENTS], FluidError> {
        if self.methane <= 0.0 {
            return Err(FluidError::MissingMethane);
        }
        let raw = self.as_fractions();
        let total: f64 = raw.iter().sum();
        let mut out = [0.0; N_COMPONENTS];
        for (o, r) in out.iter_mut().zip(raw.iter()) {
            *o = r / total;
        }
        Ok(out)
    }

    /// Mole-fraction-weighted molar mass [kg/mol].
    pub fn molar_mass(&self) -> Result<f64, FluidError> {
        let fractions = self.normalized()?;
        Ok(fractions
            .iter()
            .zip(COMPONENTS.iter())
            .map(|(y, c)| y * c.molar_mass)
            .sum())
    }

    pub fn dry() -> Self {
        Self::from_fractions([
            0.0, 0.0074, 0.0242, 0.9404, 0.0180, 0.0050, 0.0010, 0.0015, 0.0005, 0.0005, 0.0015,
        ])
    }

    pub fn medium() -> Self {
        Self::from_fractions([
            0.0, 0.0074, 0.0242, 0.8561, 0.0681, 0.0219, 0.0031, 0.0063, 0.0014, 0.0014, 0.0101,
        ])
    }

    pub fn rich() -> Self {
        Self::from_fractions([
            0.0, 0.0100, 0.0200, 0.7900, 0.0800, 0.0500, 0.0100, 0.0200, 0.0050, 0.0050, 0.0100,
        ])
    }

    pub fn ultra_rich() -> Self {
        Self::from_fractions([
            0.0, 0.0050, 0.0200, 0.7200, 0.1000, 0.0800, 0.0150, 0.0300, 0.0080, 0.0080, 0.0140,
        ])
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "DRY" => Some(Self::dry()),
            "MEDIUM" => Some(Self::medium()),
            "RICH" => Some(Self::rich()),
            "ULTRA_RICH" => Some(Self::ultra_rich()),
            _ => None,
        }
    }
}

/// A fully resolved thermodynamic state at one (P, T).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FluidState {
    /// Pressure [bara]
    pub pressure: f64,
    /// Temperature [K]
    pub temperature: f64,
    /// Density [kg/m3]
    pub density: f64,
    /// Compressibility factor
    pub z: f64,
    /// Heat capacity ratio cp/cv
    pub kappa: f64,
    /// Specific enthalpy [J/kg], ideal baseline at standard temperature
    pub enthalpy: f64,
    /// Specific entropy [J/(kg K)], same baseline
    pub entropy: f64,
    /// Molar mass [kg/mol]
    pub molar_mass: f64,
}

/// Composition plus equation of state. All property queries go through this
/// type; callers never see the cubic internals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluidModel {
    pub composition: Composition,
    pub eos: EosModel,
}

impl FluidModel {
    pub fn new(composition: Composition, eos: EosModel) -> Self {
        Self { composition, eos }
    }

    pub fn flash_pt(&self, pressure_bara: f64, temperature_kelvin: f64) -> Result<FluidState, FluidError> {
        if pressure_bara <= 0.0 || temperature_kelvin <= 0.0 {
            return Err(FluidError::NonPhysicalState {
                pressure_bara,
                temperature_kelvin,
            });
        }
        let fractions = self.composition.normalized()?;
        let molar_mass = self.composition.molar_mass()?;
        let form = self.eos.cubic();

        let mixture = CubicMixture::build(&fractions, form, temperature_kelvin);
        let pressure_pa = pressure_bara * 1.0e5;
        let rt = GAS_CONSTANT * temperature_kelvin;
        let a_big = mixture.a * pressure_pa / (rt * rt);
        let b_big = mixture.b * pressure_pa / rt;

        let z = solve_compressibility(form, a_big, b_big).ok_or_else(|| {
            FluidError::EosConvergence {
                operation: format!("flash_pt at {:.3} bara, {:.2} K", pressure_bara, temperature_kelvin),
            }
        })?;

        let density = pressure_pa * molar_mass / (z * rt);

        let cp_ideal = ideal_cp(&fractions, temperature_kelvin);
        let kappa = cp_ideal / (cp_ideal - GAS_CONSTANT);

        let h_departure = mixture.enthalpy_departure(form, z, b_big, temperature_kelvin);
        let s_departure = mixture.entropy_departure(form, z, b_big);
        let h_molar = ideal_enthalpy(&fractions, temperature_kelvin) + h_departure;
        let s_molar = ideal_entropy(&fractions, temperature_kelvin, pressure_bara) + s_departure;

        Ok(FluidState {
            pressure: pressure_bara,
            temperature: temperature_kelvin,
            density,
            z,
            kappa,
            enthalpy: h_molar / molar_mass,
            entropy: s_molar / molar_mass,
            molar_mass,
        })
    }

    /// Flash at fixed pressure to the temperature matching the target
    /// specific enthalpy [J/kg]. Newton iteration with the ideal cp slope.
    pub fn flash_ph(&self, pressure_bara: f64, enthalpy: f64) -> Result<FluidState, FluidError> {
        self.flash_iterate(pressure_bara, enthalpy, |state| state.enthalpy, "flash_ph")
    }

    /// Isentropic flash at fixed pressure to the target specific entropy.
    pub fn flash_ps(&self, pressure_bara: f64, entropy: f64) -> Result<FluidState, FluidError> {
        self.flash_iterate(pressure_bara, entropy, |state| state.entropy, "flash_ps")
    }

    fn flash_iterate<F>(
        &self,
        pressure_bara: f64,
        target: f64,
        property: F,
        operation: &str,
    ) -> Result<FluidState, FluidError>
    where
        F: Fn(&FluidState) -> f64,
    {
        let fractions = self.composition.normalized()?;
        let molar_mass = self.composition.molar_mass()?;

        let mut temperature = STANDARD_TEMPERATURE_KELVIN;
        for _ in 0..50 {
            let state = self.flash_pt(pressure_bara, temperature)?;
            let residual = property(&state) - target;
            let cp_mass = ideal_cp(&fractions, temperature) / molar_mass;
            // Entropy residuals scale as cp/T, enthalpy residuals as cp
            let slope = if operation == "flash_ps" {
                cp_mass / temperature
            } else {
                cp_mass
            };
            let step = residual / slope;
            if step.abs() < 1.0e-6 {
                return Ok(state);
            }
            temperature = (temperature - step).max(20.0);
        }
        Err(FluidError::EosConvergence {
            operation: operation.to_string(),
        })
    }

    /// Density at standard reference conditions (1.01325 bara, 15 C).
    pub fn standard_conditions_density(&self) -> Result<f64, FluidError> {
        Ok(self
            .flash_pt(STANDARD_PRESSURE_BARA, STANDARD_TEMPERATURE_KELVIN)?
            .density)
    }
}

/// A fluid model carrying a mass rate and a resolved state.
#[derive(Debug, Clone, PartialEq)]
pub struct FluidStream {
    pub fluid: FluidModel,
    /// Mass rate [kg/h]
    pub mass_rate: f64,
    pub state: FluidState,
}

impl FluidStream {
    pub fn new(
        fluid: FluidModel,
        mass_rate: f64,
        pressure_bara: f64,
        temperature_kelvin: f64,
    ) -> Result<Self, FluidError> {
        let state = fluid.flash_pt(pressure_bara, temperature_kelvin)?;
        Ok(Self {
            fluid,
            mass_rate,
            state,
        })
    }

    pub fn with_conditions(&self, pressure_bara: f64, temperature_kelvin: f64) -> Result<Self, FluidError> {
        let state = self.fluid.flash_pt(pressure_bara, temperature_kelvin)?;
        Ok(Self {
            fluid: self.fluid.clone(),
            mass_rate: self.mass_rate,
            state,
        })
    }

    pub fn with_mass_rate(&self, mass_rate: f64) -> Self {
        Self {
            fluid: self.fluid.clone(),
            mass_rate,
            state: self.state,
        }
    }

    /// Actual volume rate at the stream conditions [m3/h].
    pub fn actual_volume_rate(&self) -> f64 {
        if self.state.density > 0.0 {
            self.mass_rate / self.state.density
        } else {
            0.0
        }
    }

    /// Mix streams at a common pressure. Composition mixes by moles, outlet
    /// temperature comes from the enthalpy balance. Equal pressures are an
    /// external precondition; the first stream's pressure is used.
    pub fn mix(streams: &[FluidStream]) -> Result<FluidStream, FluidError> {
        let first = streams.first().ok_or(FluidError::EmptyMixing)?;
        if streams.len() == 1 {
            return Ok(first.clone());
        }
        if streams.iter().any(|s| s.fluid.eos != first.fluid.eos) {
            return Err(FluidError::IncompatibleEos);
        }

        let mut total_moles = [0.0; N_COMPONENTS];
        let mut total_mass = 0.0;
        let mut total_enthalpy = 0.0;
        for stream in streams {
            let fractions = stream.fluid.composition.normalized()?;
            let molar_mass = stream.fluid.composition.molar_mass()?;
            let moles = stream.mass_rate / molar_mass;
            for (acc, y) in total_moles.iter_mut().zip(fractions.iter()) {
                *acc += moles * y;
            }
            total_mass += stream.mass_rate;
            total_enthalpy += stream.mass_rate * stream.state.enthalpy;
        }

        let mole_total: f64 = total_moles.iter().sum();
        let mut fractions = [0.0; N_COMPONENTS];
        for (f, m) in fractions.iter_mut().zip(total_moles.iter()) {
            *f = m / mole_total;
        }

        let mixed = FluidModel::new(Composition::from_fractions(fractions), first.fluid.eos);
        let state = mixed.flash_ph(first.state.pressure, total_enthalpy / total_mass)?;
        Ok(FluidStream {
            fluid: mixed,
            mass_rate: total_mass,
            state,
        })
    }
}

struct CubicMixture {
    a: f64,
    b: f64,
    da_dt: f64,
}

impl CubicMixture {
    fn build(fractions: &[f64; N_COMPONENTS], form: CubicForm, temperature: f64) -> Self {
        let (omega_a, omega_b) = match form {
            CubicForm::Srk => (0.42748, 0.08664),
            CubicForm::Pr => (0.45724, 0.07780),
        };

        let mut a_i = [0.0; N_COMPONENTS];
        let mut da_i = [0.0; N_COMPONENTS];
        let mut b = 0.0;
        for (i, component) in COMPONENTS.iter().enumerate() {
            let tc = component.critical_temperature;
            let pc = component.critical_pressure * 1.0e5;
            let omega = component.acentric_factor;
            let m = match form {
                CubicForm::Srk => 0.480 + 1.574 * omega - 0.176 * omega * omega,
                CubicForm::Pr => 0.37464 + 1.54226 * omega - 0.26992 * omega * omega,
            };
            let tr_sqrt = (temperature / tc).sqrt();
            let alpha_sqrt = 1.0 + m * (1.0 - tr_sqrt);
            let a_c = omega_a * GAS_CONSTANT * GAS_CONSTANT * tc * tc / pc;
            a_i[i] = a_c * alpha_sqrt * alpha_sqrt;
            da_i[i] = -a_c * m * alpha_sqrt / (temperature * tc).sqrt();
            b += fractions[i] * omega_b * GAS_CONSTANT * tc / pc;
        }

        let mut a = 0.0;
        let mut da_dt = 0.0;
        for i in 0..N_COMPONENTS {
            for j in 0..N_COMPONENTS {
                let yy = fractions[i] * fractions[j];
                if yy == 0.0 {
                    continue;
                }
                let aij = (a_i[i] * a_i[j]).sqrt();
                a += yy * aij;
                da_dt += yy * (a_i[j] * da_i[i] + a_i[i] * da_i[j]) / (2.0 * aij);
            }
        }

        Self { a, b, da_dt }
    }

    fn enthalpy_departure(&self, form: CubicForm, z: f64, b_big: f64, temperature: f64) -> f64 {
        let rt = GAS_CONSTANT * temperature;
        match form {
            CubicForm::Srk => {
                rt * (z - 1.0)
                    + (temperature * self.da_dt - self.a) / self.b * (z / (z + b_big)).ln()
            }
            CubicForm::Pr => {
                let sqrt2 = std::f64::consts::SQRT_2;
                rt * (z - 1.0)
                    + (temperature * self.da_dt - self.a) / (2.0 * sqrt2 * self.b)
                        * ((z + (1.0 + sqrt2) * b_big) / (z + (1.0 - sqrt2) * b_big)).ln()
            }
        }
    }

    fn entropy_departure(&self, form: CubicForm, z: f64, b_big: f64) -> f64 {
        match form {
            CubicForm::Srk => {
                GAS_CONSTANT * (z - b_big).ln() + self.da_dt / self.b * (z / (z + b_big)).ln()
            }
            CubicForm::Pr => {
                let sqrt2 = std::f64::consts::SQRT_2;
                GAS_CONSTANT * (z - b_big).ln()
                    + self.da_dt / (2.0 * sqrt2 * self.b)
                        * ((z + (1.0 + sqrt2) * b_big) / (z + (1.0 - sqrt2) * b_big)).ln()
            }
        }
    }
}

/// Largest real root of the cubic in Z, vapour branch. Returns None when no
/// root exceeds the covolume.
fn solve_compressibility(form: CubicForm, a: f64, b: f64) -> Option<f64> {
    let (c2, c1, c0) = match form {
        CubicForm::Srk => (-1.0, a - b - b * b, -(a * b)),
        CubicForm::Pr => (
            -(1.0 - b),
            a - 2.0 * b - 3.0 * b * b,
            -(a * b - b * b - b * b * b),
        ),
    };

    let roots = solve_cubic(c2, c1, c0);
    roots
        .into_iter()
        .filter(|z| *z > b)
        .fold(None, |best: Option<f64>, z| match best {
            Some(current) if current >= z => Some(current),
            _ => Some(z),
        })
}

/// Real roots of z^3 + c2 z^2 + c1 z + c0 = 0 (Cardano).
fn solve_cubic(c2: f64, c1: f64, c0: f64) -> Vec<f64> {
    let p = c1 - c2 * c2 / 3.0;
    let q = 2.0 * c2 * c2 * c2 / 27.0 - c2 * c1 / 3.0 + c0;
    let shift = c2 / 3.0;
    let discriminant = (q / 2.0) * (q / 2.0) + (p / 3.0) * (p / 3.0) * (p / 3.0);

    if discriminant > 0.0 {
        let sqrt_d = discriminant.sqrt();
        let u = (-q / 2.0 + sqrt_d).cbrt();
        let v = (-q / 2.0 - sqrt_d).cbrt();
        vec![u + v - shift]
    } else if discriminant == 0.0 {
        if q == 0.0 {
            vec![-shift]
        } else {
            let u = (-q / 2.0).cbrt();
            vec![2.0 * u - shift, -u - shift]
        }
    } else {
        let r = (-p * p * p / 27.0).sqrt();
        let phi = (-q / (2.0 * r)).clamp(-1.0, 1.0).acos();
        let m = 2.0 * (-p / 3.0).sqrt();
        (0..3)
            .map(|k| m * ((phi + 2.0 * std::f64::consts::PI * k as f64) / 3.0).cos() - shift)
            .collect()
    }
}

fn ideal_cp(fractions: &[f64; N_COMPONENTS], temperature: f64) -> f64 {
    let t = temperature;
    fractions
        .iter()
        .zip(COMPONENTS.iter())
        .map(|(y, c)| {
            let [a, b, cc, d] = c.cp_coefficients;
            y * (a + b * t + cc * t * t + d * t * t * t)
        })
        .sum()
}

/// Ideal-gas enthalpy relative to the standard reference temperature [J/mol].
fn ideal_enthalpy(fractions: &[f64; N_COMPONENTS], temperature: f64) -> f64 {
    let t0 = STANDARD_TEMPERATURE_KELVIN;
    let t = temperature;
    fractions
        .iter()
        .zip(COMPONENTS.iter())
        .map(|(y, c)| {
            let [a, b, cc, d] = c.cp_coefficients;
            y * (a * (t - t0)
                + b / 2.0 * (t * t - t0 * t0)
                + cc / 3.0 * (t * t * t - t0 * t0 * t0)
                + d / 4.0 * (t * t * t * t - t0 * t0 * t0 * t0))
        })
        .sum()
}

/// Ideal-gas entropy relative to the reference state [J/(mol K)].
fn ideal_entropy(fractions: &[f64; N_COMPONENTS], temperature: f64, pressure_bara: f64) -> f64 {
    let t0 = STANDARD_TEMPERATURE_KELVIN;
    let t = temperature;
    let thermal: f64 = fractions
        .iter()
        .zip(COMPONENTS.iter())
        .map(|(y, c)| {
            let [a, b, cc, d] = c.cp_coefficients;
            y * (a * (t / t0).ln()
                + b * (t - t0)
                + cc / 2.0 * (t * t - t0 * t0)
                + d / 3.0 * (t * t * t - t0 * t0 * t0))
        })
        .sum();
    let mixing: f64 = fractions
        .iter()
        .filter(|y| **y > 0.0)
        .map(|y| y * y.ln())
        .sum();
    thermal - GAS_CONSTANT * (pressure_bara / STANDARD_PRESSURE_BARA).ln() - GAS_CONSTANT * mixing
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn methane_model() -> FluidModel {
        FluidModel::new(
            Composition::from_fractions([0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            EosModel::Srk,
        )
    }

    #[test]
    fn methane_standard_density_close_to_ideal() {
        let state = methane_model()
            .flash_pt(STANDARD_PRESSURE_BARA, STANDARD_TEMPERATURE_KELVIN)
            .unwrap();
        // Near-ideal at atmospheric conditions
        assert!(state.z > 0.99 && state.z <= 1.0);
        assert_relative_eq!(state.density, 0.680, epsilon = 0.01);
    }

    #[test]
    fn compressibility_drops_at_high_pressure() {
        let low = methane_model().flash_pt(1.0, 300.0).unwrap();
        let high = methane_model().flash_pt(100.0, 300.0).unwrap();
        assert!(high.z < low.z);
        assert!(high.density > 50.0 * low.density);
    }

    #[test]
    fn flash_ph_round_trips_flash_pt() {
        let model = FluidModel::new(Composition::medium(), EosModel::Srk);
        let state = model.flash_pt(40.0, 330.0).unwrap();
        let back = model.flash_ph(40.0, state.enthalpy).unwrap();
        assert_relative_eq!(back.temperature, 330.0, epsilon = 0.05);
    }

    #[test]
    fn flash_ps_round_trips_flash_pt() {
        let model = FluidModel::new(Composition::medium(), EosModel::Pr);
        let state = model.flash_pt(25.0, 310.0).unwrap();
        let back = model.flash_ps(25.0, state.entropy).unwrap();
        assert_relative_eq!(back.temperature, 310.0, epsilon = 0.05);
    }

    #[test]
    fn isentropic_compression_heats_the_gas() {
        let model = FluidModel::new(Composition::dry(), EosModel::Srk);
        let inlet = model.flash_pt(10.0, 300.0).unwrap();
        let outlet = model.flash_ps(30.0, inlet.entropy).unwrap();
        assert!(outlet.temperature > inlet.temperature + 30.0);
    }

    #[test]
    fn missing_methane_is_rejected() {
        let composition =
            Composition::from_fractions([0.0, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(composition.normalized().unwrap_err(), FluidError::MissingMethane);
    }

    #[test]
    fn non_physical_state_is_rejected() {
        let err = methane_model().flash_pt(-1.0, 300.0).unwrap_err();
        assert!(matches!(err, FluidError::NonPhysicalState { .. }));
    }

    #[test]
    fn mixing_balances_mass_and_temperature() {
        let cold = FluidStream::new(methane_model(), 1000.0, 20.0, 290.0).unwrap();
        let hot = FluidStream::new(methane_model(), 1000.0, 20.0, 350.0).unwrap();
        let mixed = FluidStream::mix(&[cold, hot]).unwrap();
        assert_relative_eq!(mixed.mass_rate, 2000.0);
        assert!(mixed.state.temperature > 305.0 && mixed.state.temperature < 335.0);
    }

    #[test]
    fn mixing_rejects_mismatched_eos() {
        let a = FluidStream::new(methane_model(), 1.0, 20.0, 300.0).unwrap();
        let b = FluidStream::new(
            FluidModel::new(Composition::dry(), EosModel::Pr),
            1.0,
            20.0,
            300.0,
        )
        .unwrap();
        assert_eq!(FluidStream::mix(&[a, b]).unwrap_err(), FluidError::IncompatibleEos);
    }

    #[test]
    fn presets_normalize_to_unity() {
        for name in ["DRY", "MEDIUM", "RICH", "ULTRA_RICH"] {
            let composition = Composition::preset(name).unwrap();
            let total: f64 = composition.normalized().unwrap().iter().sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        }
        assert!(Composition::preset("WET").is_none());
    }
}
