use serde::{Deserialize, Serialize};

use super::curve::ChartCurve;
use super::{ChartAreaFlag, ChartError};
use crate::physics::numeric::{brent, unit_fraction};

/// Pump chart in (Am3/h, metres). Single speed or a family of curves
/// ordered by speed. A head margin lifts slightly infeasible heads onto
/// the chart before the query is declared invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpChart {
    curves: Vec<ChartCurve>,
    head_margin: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpChartQuery {
    /// Head the pump actually produces [m]
    pub head: f64,
    pub efficiency: f64,
    /// Rate after ASV recirculation [Am3/h]
    pub rate_applied: f64,
    pub speed: f64,
    pub flag: ChartAreaFlag,
}

impl PumpChart {
    pub fn single_speed(curve: ChartCurve) -> Self {
        Self {
            curves: vec![curve],
            head_margin: crate::config::constants::DEFAULT_PUMP_HEAD_MARGIN,
        }
    }

    pub fn variable_speed(curves: Vec<ChartCurve>) -> Result<Self, ChartError> {
        if curves.len() < 2 {
            return Err(ChartError::GeometryInvalid {
                reason: "variable-speed pump chart needs at least two curves".to_string(),
            });
        }
        if curves.windows(2).any(|w| w[1].speed <= w[0].speed) {
            return Err(ChartError::GeometryInvalid {
                reason: "pump curves must be ordered by strictly increasing speed".to_string(),
            });
        }
        Ok(Self {
            curves,
            head_margin: crate::config::constants::DEFAULT_PUMP_HEAD_MARGIN,
        })
    }

    /// Heads up to this many metres above the chart maximum are lifted
    /// down onto the chart instead of failing the query.
    pub fn with_head_margin(mut self, margin_metres: f64) -> Self {
        self.head_margin = margin_metres;
        self
    }

    pub fn is_single_speed(&self) -> bool {
        self.curves.len() == 1
    }

    fn minimum_curve(&self) -> &ChartCurve {
        &self.curves[0]
    }

    fn maximum_curve(&self) -> &ChartCurve {
        &self.curves[self.curves.len() - 1]
    }

    pub fn maximum_rate(&self) -> f64 {
        self.maximum_curve().maximum_rate()
    }

    fn head_at(&self, rate: f64, speed: f64) -> f64 {
        let (lo, hi, t) = self.bracketing(speed);
        lo.head_at(rate) + t * (hi.head_at(rate) - lo.head_at(rate))
    }

    fn efficiency_at(&self, rate: f64, speed: f64) -> f64 {
        let (lo, hi, t) = self.bracketing(speed);
        (lo.efficiency_at(rate) + t * (hi.efficiency_at(rate) - lo.efficiency_at(rate)))
            .clamp(1.0e-6, 1.0)
    }

    fn bracketing(&self, speed: f64) -> (&ChartCurve, &ChartCurve, f64) {
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

    /// Query the chart for a rate and a required head.
    ///
    /// Single speed: the pump delivers the curve head at the rate; required
    /// heads below it are choked downstream, above it the head margin
    /// applies. Variable speed: the speed is solved so the produced head
    /// matches the requirement, saturating at the speed limits.
    pub fn query(&self, rate: f64, required_head: f64) -> PumpChartQuery {
        let min_rate = self.minimum_curve().minimum_rate();

        let (rate_applied, mut flag) = if rate < min_rate {
            (min_rate, ChartAreaFlag::BelowMinimumFlowRecirculated)
        } else if rate > self.maximum_rate() {
            return PumpChartQuery {
                head: self.head_at(rate.min(self.maximum_rate()), self.maximum_curve().speed),
                efficiency: self.efficiency_at(self.maximum_rate(), self.maximum_curve().speed),
                rate_applied: rate,
                speed: self.maximum_curve().speed,
                flag: ChartAreaFlag::AboveMaximumFlow,
            };
        } else {
            (rate, ChartAreaFlag::Internal)
        };

        let head_floor = self.head_at(rate_applied, self.minimum_curve().speed);
        let head_ceiling = self.head_at(rate_applied, self.maximum_curve().speed);

        let (head, speed) = if required_head <= head_floor {
            // Pump over-delivers; excess head is throttled downstream
            if flag == ChartAreaFlag::Internal {
                flag = ChartAreaFlag::BelowCurveHeadChoked;
            }
            (head_floor, self.minimum_curve().speed)
        } else if required_head > head_ceiling {
            if required_head - head_ceiling <= self.head_margin {
                (head_ceiling, self.maximum_curve().speed)
            } else {
                return PumpChartQuery {
                    head: head_ceiling,
                    efficiency: self.efficiency_at(rate_applied, self.maximum_curve().speed),
                    rate_applied,
                    speed: self.maximum_curve().speed,
                    flag: ChartAreaFlag::AboveMaximumHead,
                };
            }
        } else if self.is_single_speed() {
            (head_floor, self.minimum_curve().speed)
        } else {
            let lo = self.minimum_curve().speed;
            let hi = self.maximum_curve().speed;
            let speed = brent(
                |s| self.head_at(rate_applied, s) - required_head,
                lo,
                hi,
                1.0e-7,
            )
            .unwrap_or(hi);
            (required_head, speed)
        };

        PumpChartQuery {
            head,
            efficiency: self.efficiency_at(rate_applied, speed),
            rate_applied,
            speed,
            flag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn single_speed() -> PumpChart {
        PumpChart::single_speed(
            ChartCurve::new(
                1.0,
                vec![100.0, 200.0, 300.0],
                vec![2100.0, 1900.0, 1500.0],
                vec![0.70, 0.75, 0.68],
            )
            .unwrap(),
        )
    }

    fn variable_speed() -> PumpChart {
        let low = ChartCurve::new(
            0.8,
            vec![80.0, 160.0, 240.0],
            vec![1350.0, 1200.0, 950.0],
            vec![0.68, 0.73, 0.66],
        )
        .unwrap();
        let high = ChartCurve::new(
            1.0,
            vec![100.0, 200.0, 300.0],
            vec![2100.0, 1900.0, 1500.0],
            vec![0.70, 0.75, 0.68],
        )
        .unwrap();
        PumpChart::variable_speed(vec![low, high]).unwrap()
    }

    #[test]
    fn choking_lifts_low_required_head() {
        let q = single_speed().query(200.0, 1000.0);
        assert_eq!(q.flag, ChartAreaFlag::BelowCurveHeadChoked);
        assert_relative_eq!(q.head, 1900.0);
    }

    #[test]
    fn recirculation_below_minimum_flow() {
        let q = single_speed().query(50.0, 2000.0);
        assert_eq!(q.flag, ChartAreaFlag::BelowMinimumFlowRecirculated);
        assert_relative_eq!(q.rate_applied, 100.0);
    }

    #[test]
    fn head_above_chart_is_invalid_without_margin() {
        let q = single_speed().query(200.0, 2500.0);
        assert_eq!(q.flag, ChartAreaFlag::AboveMaximumHead);
        assert!(!q.flag.is_valid());
    }

    #[test]
    fn head_margin_rescues_marginal_head() {
        let chart = single_speed().with_head_margin(700.0);
        let q = chart.query(200.0, 2500.0);
        assert!(q.flag.is_valid());
        assert_relative_eq!(q.head, 1900.0);
    }

    #[test]
    fn variable_speed_meets_head_between_curves() {
        let q = variable_speed().query(180.0, 1500.0);
        assert_eq!(q.flag, ChartAreaFlag::Internal);
        assert_relative_eq!(q.head, 1500.0);
        assert!(q.speed > 0.8 && q.speed < 1.0);
    }

    #[test]
    fn rate_above_stonewall_is_invalid() {
        let q = variable_speed().query(400.0, 1000.0);
        assert_eq!(q.flag, ChartAreaFlag::AboveMaximumFlow);
    }
}
