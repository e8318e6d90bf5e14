use serde::{Deserialize, Serialize};

use super::curve::ChartCurve;
use super::{ChartAreaFlag, ChartError};
use crate::physics::numeric::unit_fraction;

/// Compressor chart: one curve (single speed) or an ordered family of
/// curves (variable speed). Heads are stored in J/kg.
///
/// The derived envelope (surge locus, stonewall locus, min and max speed
/// curves) is implicit in the curve family; the control margin shifts the
/// effective surge line right by a fraction of the speed's rate span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressorChart {
    curves: Vec<ChartCurve>,
    control_margin: f64,
}

/// Result of a chart lookup at (rate, speed).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorChartQuery {
    /// Polytropic head [J/kg]
    pub polytropic_head: f64,
    pub polytropic_efficiency: f64,
    /// Rate after any ASV recirculation [Am3/h]
    pub rate_applied: f64,
    /// Recirculated rate [Am3/h]
    pub recirculation: f64,
    pub flag: ChartAreaFlag,
}

impl CompressorChart {
    pub fn single_speed(curve: ChartCurve) -> Self {
        Self {
            curves: vec![curve],
            control_margin: 0.0,
        }
    }

    pub fn variable_speed(curves: Vec<ChartCurve>) -> Result<Self, ChartError> {
        if curves.len() < 2 {
            return Err(ChartError::GeometryInvalid {
                reason: "variable-speed chart needs at least two curves".to_string(),
            });
        }
        if curves.windows(2).any(|w| w[1].speed <= w[0].speed) {
            return Err(ChartError::GeometryInvalid {
                reason: "curves must be ordered by strictly increasing speed".to_string(),
            });
        }
        Ok(Self {
            curves,
            control_margin: 0.0,
        })
    }

    /// Control margin as a fraction of the rate span per speed.
    pub fn with_control_margin(mut self, margin: f64) -> Self {
        self.control_margin = margin;
        self
    }

    pub fn is_single_speed(&self) -> bool {
        self.curves.len() == 1
    }

    pub fn minimum_speed(&self) -> f64 {
        self.curves[0].speed
    }

    pub fn maximum_speed(&self) -> f64 {
        self.curves[self.curves.len() - 1].speed
    }

    fn bracketing_curves(&self, speed: f64) -> (&ChartCurve, &ChartCurve, f64) {
        let last = self.curves.len() - 1;
        if speed <= self.curves[0].speed {
            return (&self.curves[0], &self.curves[0], 0.0);
        }
        if speed >= self.curves[last].speed {
            return (&self.curves[last], &self.curves[last], 0.0);
        }
        let upper = self
            .curves
            .iter()
            .position(|c| c.speed > speed)
            .expect("speed below maximum");
        let lo = &self.curves[upper - 1];
        let hi = &self.curves[upper];
        (lo, hi, unit_fraction(lo.speed, hi.speed, speed))
    }

    /// Surge-line rate at a speed, control margin applied.
    pub fn minimum_rate_at_speed(&self, speed: f64) -> f64 {
        let (lo, hi, t) = self.bracketing_curves(speed);
        let min = lo.minimum_rate() + t * (hi.minimum_rate() - lo.minimum_rate());
        let max = lo.maximum_rate() + t * (hi.maximum_rate() - lo.maximum_rate());
        min + self.control_margin * (max - min)
    }

    /// Stonewall rate at a speed.
    pub fn maximum_rate_at_speed(&self, speed: f64) -> f64 {
        let (lo, hi, t) = self.bracketing_curves(speed);
        lo.maximum_rate() + t * (hi.maximum_rate() - lo.maximum_rate())
    }

    pub fn head_at_rate_and_speed(&self, rate: f64, speed: f64) -> f64 {
        let (lo, hi, t) = self.bracketing_curves(speed);
        lo.head_at(rate) + t * (hi.head_at(rate) - lo.head_at(rate))
    }

    pub fn efficiency_at_rate_and_speed(&self, rate: f64, speed: f64) -> f64 {
        let (lo, hi, t) = self.bracketing_curves(speed);
        (lo.efficiency_at(rate) + t * (hi.efficiency_at(rate) - lo.efficiency_at(rate)))
            .clamp(1.0e-6, 1.0)
    }

    /// Maximum head the chart can deliver at a rate (max-speed curve).
    pub fn maximum_head_at_rate(&self, rate: f64) -> f64 {
        self.curves[self.curves.len() - 1].head_at(rate)
    }

    /// Chart lookup at (actual volume rate, speed), applying the surge-side
    /// ASV recirculation and flagging stonewall violations.
    pub fn query(&self, rate: f64, speed: f64) -> CompressorChartQuery {
        let minimum = self.minimum_rate_at_speed(speed);
        let maximum = self.maximum_rate_at_speed(speed);

        let (rate_applied, recirculation, flag) = if rate < minimum {
            (minimum, minimum - rate, ChartAreaFlag::BelowMinimumFlowRecirculated)
        } else if rate > maximum {
            (maximum, 0.0, ChartAreaFlag::AboveMaximumFlow)
        } else {
            (rate, 0.0, ChartAreaFlag::Internal)
        };

        CompressorChartQuery {
            polytropic_head: self.head_at_rate_and_speed(rate_applied, speed),
            polytropic_efficiency: self.efficiency_at_rate_and_speed(rate_applied, speed),
            rate_applied,
            recirculation,
            flag,
        }
    }

}
