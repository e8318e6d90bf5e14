// Physical constants and solver tolerances shared across the solver layer.

/// Universal gas constant [J/(mol K)]
pub const GAS_CONSTANT: f64 = 8.314_462_618;

/// Standard gravity [m/s2]
pub const GRAVITY: f64 = 9.81;

/// Standard reference pressure [bara]
pub const STANDARD_PRESSURE_BARA: f64 = 1.013_25;

/// Standard reference temperature [K] (15 C)
pub const STANDARD_TEMPERATURE_KELVIN: f64 = 288.15;

/// Pascals per bar
pub const PA_PER_BAR: f64 = 1.0e5;

/// Seconds per day, used for MW to daily-energy conversions
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Joules per hour in one megawatt
pub const JOULES_PER_HOUR_PER_MW: f64 = 3.6e9;

/// Convergence tolerance for the stage inlet/outlet property averaging loop
pub const STAGE_CONVERGENCE_TOLERANCE: f64 = 1.0e-4;

/// Iteration cap shared by the stage loop and the root finders
pub const MAX_SOLVER_ITERATIONS: usize = 50;

/// Relative tolerance for pressure targets in the train solvers [bar]
pub const PRESSURE_TOLERANCE_BAR: f64 = 1.0e-3;

/// Default maximum pressure ratio per stage for runtime stage-count estimation
pub const DEFAULT_MAX_PRESSURE_RATIO_PER_STAGE: f64 = 3.5;

/// Pump heads closer than this to the chart maximum are lifted onto it [m]
pub const DEFAULT_PUMP_HEAD_MARGIN: f64 = 0.0;

/// Lowest suction pressure the upstream-choke control will consider [bara]
pub const MINIMUM_CHOKED_SUCTION_PRESSURE_BARA: f64 = 0.1;

/// Geometry tolerance for convex-hull membership in the tabular interpolator
pub const BARYCENTRIC_TOLERANCE: f64 = 1.0e-9;
