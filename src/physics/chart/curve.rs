use serde::{Deserialize, Serialize};

use super::ChartError;
use crate::physics::numeric::interp_linear;

/// One chart curve at a fixed speed: head and efficiency against actual
/// volume rate. Rate must increase strictly; head may not increase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartCurve {
    pub speed: f64,
    pub rate: Vec<f64>,
    pub head: Vec<f64>,
    pub efficiency: Vec<f64>,
}

impl ChartCurve {
    pub fn new(
        speed: f64,
        rate: Vec<f64>,
        head: Vec<f64>,
        efficiency: Vec<f64>,
    ) -> Result<Self, ChartError> {
        if rate.len() < 2 {
            return Err(ChartError::GeometryInvalid {
                reason: "curve needs at least two points".to_string(),
            });
        }
        if rate.len() != head.len() || rate.len() != efficiency.len() {
            return Err(ChartError::GeometryInvalid {
                reason: format!(
                    "column lengths differ: {} rates, {} heads, {} efficiencies",
                    rate.len(),
                    head.len(),
                    efficiency.len()
                ),
            });
        }
        if rate.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ChartError::GeometryInvalid {
                reason: "rate values must be strictly increasing".to_string(),
            });
        }
        if head.windows(2).any(|w| w[1] > w[0]) {
            return Err(ChartError::GeometryInvalid {
                reason: "head values must be non-increasing".to_string(),
            });
        }
        if efficiency.iter().any(|e| *e <= 0.0 || *e > 1.0) {
            return Err(ChartError::GeometryInvalid {
                reason: "efficiency values must be in (0, 1]".to_string(),
            });
        }
        Ok(Self {
            speed,
            rate,
            head,
            efficiency,
        })
    }

    /// Minimum-flow point of the curve.
    pub fn minimum_rate(&self) -> f64 {
        self.rate[0]
    }

    /// Maximum-flow (stonewall) point of the curve.
    pub fn maximum_rate(&self) -> f64 {
        *self.rate.last().expect("validated non-empty")
    }

    pub fn maximum_head(&self) -> f64 {
        self.head[0]
    }

    pub fn minimum_head(&self) -> f64 {
        *self.head.last().expect("validated non-empty")
    }

    pub fn head_at(&self, rate: f64) -> f64 {
        interp_linear(&self.rate, &self.head, rate)
    }

    pub fn efficiency_at(&self, rate: f64) -> f64 {
        interp_linear(&self.rate, &self.efficiency, rate).clamp(1.0e-6, 1.0)
    }

    /// Rate producing the given head, from the non-increasing head column.
    /// Clamped to the curve's rate span.
    pub fn rate_at_head(&self, head: f64) -> f64 {
        if head >= self.maximum_head() {
            return self.minimum_rate();
        }
        if head <= self.minimum_head() {
            return self.maximum_rate();
        }
        let reversed_head: Vec<f64> = self.head.iter().rev().copied().collect();
        let reversed_rate: Vec<f64> = self.rate.iter().rev().copied().collect();
        interp_linear(&reversed_head, &reversed_rate, head)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn curve() -> ChartCurve {
        ChartCurve::new(
            1.0,
            vec![1000.0, 2000.0, 3000.0, 4000.0],
            vec![120.0, 110.0, 90.0, 60.0],
            vec![0.70, 0.75, 0.74, 0.65],
        )
        .unwrap()
    }

    #[test]
    fn envelope_points() {
        let c = curve();
        assert_relative_eq!(c.minimum_rate(), 1000.0);
        assert_relative_eq!(c.maximum_rate(), 4000.0);
        assert_relative_eq!(c.maximum_head(), 120.0);
    }

    #[test]
    fn head_interpolation_and_inverse_agree() {
        let c = curve();
        let h = c.head_at(2500.0);
        assert_relative_eq!(h, 100.0);
        assert_relative_eq!(c.rate_at_head(h), 2500.0, epsilon = 1e-9);
    }

    #[test]
    fn non_monotonic_rate_is_rejected() {
        let err = ChartCurve::new(
            1.0,
            vec![1000.0, 1000.0],
            vec![100.0, 90.0],
            vec![0.7, 0.7],
        )
        .unwrap_err();
        assert!(matches!(err, ChartError::GeometryInvalid { .. }));
    }

    #[test]
    fn efficiency_above_unity_is_rejected() {
        let err = ChartCurve::new(1.0, vec![1.0, 2.0], vec![10.0, 8.0], vec![0.9, 1.2]).unwrap_err();
        assert!(matches!(err, ChartError::GeometryInvalid { .. }));
    }
}
