use serde::{Deserialize, Serialize};

use super::compressor::CompressorChart;
use super::curve::ChartCurve;
use crate::physics::numeric::interp_linear;

// Unified normalized compressor curve. The design point sits at
// (rate, head, efficiency) = (1, 1, 1); speeds scale by the affinity laws
// (rate with speed, head with speed squared).
const UNIFIED_RATE_FRACTIONS: [f64; 7] = [0.72, 0.80, 0.90, 1.00, 1.10, 1.20, 1.28];
const UNIFIED_HEAD_FRACTIONS: [f64; 7] = [1.20, 1.16, 1.09, 1.00, 0.88, 0.72, 0.60];
const UNIFIED_EFFICIENCY_FRACTIONS: [f64; 7] = [0.88, 0.94, 0.98, 1.00, 0.98, 0.92, 0.85];
const UNIFIED_SPEED_FRACTIONS: [f64; 5] = [0.75, 0.85, 0.95, 1.00, 1.05];

const MAX_SPEED_FRACTION: f64 = 1.05;
const MAX_RATE_FRACTION: f64 = 1.28;
const MAX_HEAD_FRACTION: f64 = 1.20;

/// Generic chart anchored at an explicit design point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenericChartFromDesignPoint {
    /// Design actual volume rate [Am3/h]
    pub design_rate: f64,
    /// Design polytropic head [J/kg]
    pub design_head: f64,
    /// Design polytropic efficiency
    pub design_efficiency: f64,
}

impl GenericChartFromDesignPoint {
    pub fn new(design_rate: f64, design_head: f64, design_efficiency: f64) -> Self {
        Self {
            design_rate,
            design_head,
            design_efficiency,
        }
    }

    /// Expand the unified curve into a variable-speed chart scaled to the
    /// design point. Speed is dimensionless (fraction of design speed).
    pub fn build(&self) -> CompressorChart {
        let curves: Vec<ChartCurve> = UNIFIED_SPEED_FRACTIONS
            .iter()
            .map(|s| {
                let rate: Vec<f64> = UNIFIED_RATE_FRACTIONS
                    .iter()
                    .map(|f| self.design_rate * s * f)
                    .collect();
                let head: Vec<f64> = UNIFIED_HEAD_FRACTIONS
                    .iter()
                    .map(|f| self.design_head * s * s * f)
                    .collect();
                let efficiency: Vec<f64> = UNIFIED_EFFICIENCY_FRACTIONS
                    .iter()
                    .map(|f| (self.design_efficiency * f).min(1.0))
                    .collect();
                ChartCurve::new(*s, rate, head, efficiency).expect("unified curve is valid")
            })
            .collect();
        CompressorChart::variable_speed(curves).expect("unified chart is valid")
    }
}

/// Generic chart whose design point is fitted at evaluation time to cover
/// the observed (rate, head) operating points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenericChartFromInput {
    pub design_efficiency: f64,
}

impl GenericChartFromInput {
    pub fn new(design_efficiency: f64) -> Self {
        Self { design_efficiency }
    }

    /// Fit the smallest design point whose envelope contains every observed
    /// point. Rate first (stonewall at maximum speed), then head lifted so
    /// no point sits above the maximum-speed head line at its rate. The
    /// rule is monotone: adding a higher observation never shrinks the fit.
    pub fn fit_design_point(&self, points: &[(f64, f64)]) -> GenericChartFromDesignPoint {
        let max_rate = points.iter().map(|p| p.0).fold(0.0_f64, f64::max);
        let max_head = points.iter().map(|p| p.1).fold(0.0_f64, f64::max);

        let design_rate = (max_rate / MAX_SPEED_FRACTION).max(1.0e-9);
        let mut design_head =
            (max_head / (MAX_SPEED_FRACTION * MAX_SPEED_FRACTION * MAX_HEAD_FRACTION)).max(1.0e-9);

        // Lift the head scale until the max-speed head line covers all points
        let mut lift: f64 = 1.0;
        for (rate, head) in points {
            if *head <= 0.0 {
                continue;
            }
            let rate_fraction =
                (rate / (design_rate * MAX_SPEED_FRACTION)).clamp(UNIFIED_RATE_FRACTIONS[0], MAX_RATE_FRACTION);
            let capacity = design_head
                * MAX_SPEED_FRACTION
                * MAX_SPEED_FRACTION
                * interp_linear(&UNIFIED_RATE_FRACTIONS, &UNIFIED_HEAD_FRACTIONS, rate_fraction);
            if capacity > 0.0 {
                lift = lift.max(head / capacity);
            }
        }
        design_head *= lift;

        GenericChartFromDesignPoint::new(design_rate, design_head, self.design_efficiency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::chart::ChartAreaFlag;

    #[test]
    fn design_point_query_sits_inside_the_chart() {
        let chart = GenericChartFromDesignPoint::new(3000.0, 60_000.0, 0.77).build();
        let q = chart.query(3000.0, 1.0);
        assert_eq!(q.flag, ChartAreaFlag::Internal);
        assert!((q.polytropic_head - 60_000.0).abs() / 60_000.0 < 1e-6);
        assert!((q.polytropic_efficiency - 0.77).abs() < 1e-9);
    }

    #[test]
    fn fitted_chart_covers_all_observations() {
        let generic = GenericChartFromInput::new(0.75);
        let points = vec![(2000.0, 40_000.0), (2600.0, 55_000.0), (3100.0, 35_000.0)];
        let design = generic.fit_design_point(&points);
        let chart = design.build();
        for (rate, head) in &points {
            assert!(
                chart.maximum_head_at_rate(*rate) >= *head * (1.0 - 1e-9),
                "point ({rate}, {head}) above the fitted envelope"
            );
            assert!(*rate <= chart.maximum_rate_at_speed(chart.maximum_speed()) * (1.0 + 1e-9));
        }
    }

    #[test]
    fn adding_a_high_rate_point_grows_the_design_point() {
        let generic = GenericChartFromInput::new(0.75);
        let base = generic.fit_design_point(&[(2000.0, 40_000.0)]);
        let grown = generic.fit_design_point(&[(2000.0, 40_000.0), (2800.0, 40_000.0)]);
        assert!(grown.design_rate > base.design_rate);
        assert!(grown.design_head >= base.design_head);
    }
}
