use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use thiserror::Error;

use crate::config::constants::BARYCENTRIC_TOLERANCE;
use crate::core::results::FailureStatus;
use crate::physics::numeric::interp_linear;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TabularError {
    #[error("query {0:?} lies outside the convex hull of the table")]
    OutsideConvexHull(Vec<f64>),
    #[error("table needs at least {needed} points in {dimension} dimensions, got {got}")]
    TooFewPoints {
        dimension: usize,
        needed: usize,
        got: usize,
    },
    #[error("point has {got} coordinates, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("table geometry is degenerate and cannot be triangulated")]
    DegenerateGeometry,
}

/// N-variable tabulated function interpolated barycentrically over the
/// Delaunay triangulation of the sample points. Queries outside the convex
/// hull fail; extrapolation policy is the caller's business.
///
/// Axes with no spread are factored out before triangulation so grid
/// tables degenerate gracefully to lower dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct TabulatedFunction {
    dimension: usize,
    active_axes: Vec<usize>,
    fixed_values: Vec<(usize, f64)>,
    points: Vec<Vec<f64>>,
    values: Vec<f64>,
    interpolator: Interpolator,
}

#[derive(Debug, Clone, PartialEq)]
enum Interpolator {
    /// One active axis: plain piecewise-linear interpolation
    Line { xs: Vec<f64>, ys: Vec<f64> },
    /// Two or more active axes: simplices as vertex index lists
    Simplicial { simplices: Vec<Vec<usize>> },
}

impl TabulatedFunction {
    pub fn new(raw_points: Vec<Vec<f64>>, values: Vec<f64>) -> Result<Self, TabularError> {
        let dimension = raw_points.first().map(|p| p.len()).unwrap_or(0);
        if raw_points.len() != values.len() || raw_points.is_empty() {
            return Err(TabularError::TooFewPoints {
                dimension,
                needed: 2,
                got: raw_points.len(),
            });
        }
        for p in &raw_points {
            if p.len() != dimension {
                return Err(TabularError::DimensionMismatch {
                    expected: dimension,
                    got: p.len(),
                });
            }
        }

        // Factor out axes with no spread
        let mut active_axes = Vec::new();
        let mut fixed_values = Vec::new();
        for axis in 0..dimension {
            let min = raw_points.iter().map(|p| p[axis]).fold(f64::INFINITY, f64::min);
            let max = raw_points.iter().map(|p| p[axis]).fold(f64::NEG_INFINITY, f64::max);
            if max - min < 1.0e-12 * (1.0 + max.abs()) {
                fixed_values.push((axis, min));
            } else {
                active_axes.push(axis);
            }
        }

        let points: Vec<Vec<f64>> = raw_points
            .iter()
            .map(|p| active_axes.iter().map(|a| p[*a]).collect())
            .collect();

        let interpolator = match active_axes.len() {
            0 => {
                // Degenerate table: every point identical; treat as a line
                // with a single value on a dummy axis
                Interpolator::Line {
                    xs: vec![0.0, 1.0],
                    ys: vec![values[0], values[0]],
                }
            }
            1 => {
                let mut order: Vec<usize> = (0..points.len()).collect();
                order.sort_by(|a, b| points[*a][0].partial_cmp(&points[*b][0]).expect("finite"));
                let xs: Vec<f64> = order.iter().map(|i| points[*i][0]).collect();
                let ys: Vec<f64> = order.iter().map(|i| values[*i]).collect();
                if xs.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(TabularError::DegenerateGeometry);
                }
                Interpolator::Line { xs, ys }
            }
            d => {
                if points.len() < d + 1 {
                    return Err(TabularError::TooFewPoints {
                        dimension: d,
                        needed: d + 1,
                        got: points.len(),
                    });
                }
                let simplices = triangulate(&points, d)?;
                Interpolator::Simplicial { simplices }
            }
        };

        Ok(Self {
            dimension,
            active_axes,
            fixed_values,
            points,
            values,
            interpolator,
        })
    }

    pub fn axis_minimum(&self, axis: usize) -> f64 {
        if let Some((_, v)) = self.fixed_values.iter().find(|(a, _)| *a == axis) {
            return *v;
        }
        let local = self.active_axes.iter().position(|a| *a == axis).expect("axis exists");
        self.points.iter().map(|p| p[local]).fold(f64::INFINITY, f64::min)
    }

    pub fn axis_maximum(&self, axis: usize) -> f64 {
        if let Some((_, v)) = self.fixed_values.iter().find(|(a, _)| *a == axis) {
            return *v;
        }
        let local = self.active_axes.iter().position(|a| *a == axis).expect("axis exists");
        self.points.iter().map(|p| p[local]).fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn evaluate(&self, query: &[f64]) -> Result<f64, TabularError> {
        if query.len() != self.dimension {
            return Err(TabularError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        for (axis, fixed) in &self.fixed_values {
            if (query[*axis] - fixed).abs() > 1.0e-9 * (1.0 + fixed.abs()) {
                return Err(TabularError::OutsideConvexHull(query.to_vec()));
            }
        }
        let local: Vec<f64> = self.active_axes.iter().map(|a| query[*a]).collect();

        match &self.interpolator {
            Interpolator::Line { xs, ys } => {
                if local.is_empty() {
                    return Ok(ys[0]);
                }
                let x = local[0];
                if x < xs[0] - BARYCENTRIC_TOLERANCE
                    || x > xs[xs.len() - 1] + BARYCENTRIC_TOLERANCE
                {
                    return Err(TabularError::OutsideConvexHull(query.to_vec()));
                }
                Ok(interp_linear(xs, ys, x))
            }
            Interpolator::Simplicial { simplices } => {
                let d = self.active_axes.len();
                for simplex in simplices {
                    if let Some(weights) = barycentric_weights(&self.points, simplex, &local, d) {
                        let value = simplex
                            .iter()
                            .zip(weights.iter())
                            .map(|(i, w)| self.values[*i] * w)
                            .sum();
                        return Ok(value);
                    }
                }
                Err(TabularError::OutsideConvexHull(query.to_vec()))
            }
        }
    }
}

/// Barycentric coordinates of `query` in the simplex, or None when the
/// query is outside (any negative weight) or the simplex is degenerate.
fn barycentric_weights(
    points: &[Vec<f64>],
    simplex: &[usize],
    query: &[f64],
    dimension: usize,
) -> Option<Vec<f64>> {
    let n = dimension + 1;
    let mut m = DMatrix::zeros(n, n);
    let mut rhs = DVector::zeros(n);
    for col in 0..n {
        m[(0, col)] = 1.0;
        for row in 0..dimension {
            m[(row + 1, col)] = points[simplex[col]][row];
        }
    }
    rhs[0] = 1.0;
    for row in 0..dimension {
        rhs[row + 1] = query[row];
    }
    let lu = m.lu();
    let weights = lu.solve(&rhs)?;
    if weights.iter().any(|w| *w < -1.0e-7) {
        return None;
    }
    Some(weights.iter().copied().collect())
}

/// Incremental Bowyer-Watson triangulation in `dimension` dimensions.
/// Points are normalized to the unit box first; a large super-simplex is
/// stripped at the end.
fn triangulate(points: &[Vec<f64>], dimension: usize) -> Result<Vec<Vec<usize>>, TabularError> {
    let n = points.len();

    let mut mins = vec![f64::INFINITY; dimension];
    let mut maxs = vec![f64::NEG_INFINITY; dimension];
    for p in points {
        for (axis, v) in p.iter().enumerate() {
            mins[axis] = mins[axis].min(*v);
            maxs[axis] = maxs[axis].max(*v);
        }
    }
    let scale: Vec<f64> = mins
        .iter()
        .zip(maxs.iter())
        .map(|(lo, hi)| (hi - lo).max(1.0e-12))
        .collect();
    let normalize = |p: &[f64]| -> Vec<f64> {
        p.iter()
            .enumerate()
            .map(|(axis, v)| (v - mins[axis]) / scale[axis])
            .collect()
    };

    // Working vertex list: normalized inputs then super-simplex corners
    let mut vertices: Vec<Vec<f64>> = points.iter().map(|p| normalize(p)).collect();
    // Super-simplex spanning the unit box with room to spare; the span must
    // grow with dimension so the far corner of the box stays inside
    let margin = 10.0;
    let span = margin * (dimension as f64 + 2.0);
    let mut base = vec![-margin; dimension];
    vertices.push(base.clone());
    for axis in 0..dimension {
        base[axis] += span;
        vertices.push(base.clone());
        base[axis] -= span;
    }

    let super_start = n;
    let mut simplices: Vec<Vec<usize>> = vec![(super_start..super_start + dimension + 1).collect()];

    for point_index in 0..n {
        let point = vertices[point_index].clone();

        let mut bad = Vec::new();
        for (i, simplex) in simplices.iter().enumerate() {
            if circumsphere_contains(&vertices, simplex, &point, dimension) {
                bad.push(i);
            }
        }
        if bad.is_empty() {
            // Numerical trouble; every input point must land in some
            // circumsphere of the current triangulation
            return Err(TabularError::DegenerateGeometry);
        }

        // Boundary facets appear in exactly one bad simplex
        let mut facets: Vec<(Vec<usize>, usize)> = Vec::new();
        for &i in &bad {
            let simplex = &simplices[i];
            for skip in 0..simplex.len() {
                let mut facet: Vec<usize> = simplex
                    .iter()
                    .enumerate()
                    .filter(|(k, _)| *k != skip)
                    .map(|(_, v)| *v)
                    .collect();
                facet.sort_unstable();
                match facets.iter_mut().find(|(f, _)| *f == facet) {
                    Some((_, count)) => *count += 1,
                    None => facets.push((facet, 1)),
                }
            }
        }

        let mut keep: Vec<Vec<usize>> = Vec::new();
        for (i, simplex) in simplices.iter().enumerate() {
            if !bad.contains(&i) {
                keep.push(simplex.clone());
            }
        }
        for (facet, count) in facets {
            if count == 1 {
                let mut simplex = facet;
                simplex.push(point_index);
                keep.push(simplex);
            }
        }
        simplices = keep;
    }

    let interior: Vec<Vec<usize>> = simplices
        .into_iter()
        .filter(|s| s.iter().all(|v| *v < super_start))
        .filter(|s| !is_degenerate(&vertices, s, dimension))
        .collect();

    if interior.is_empty() {
        return Err(TabularError::DegenerateGeometry);
    }
    Ok(interior)
}

fn circumsphere_contains(
    vertices: &[Vec<f64>],
    simplex: &[usize],
    point: &[f64],
    dimension: usize,
) -> bool {
    let v0 = &vertices[simplex[0]];
    let mut m = DMatrix::zeros(dimension, dimension);
    let mut rhs = DVector::zeros(dimension);
    for row in 0..dimension {
        let vi = &vertices[simplex[row + 1]];
        let mut norm_diff = 0.0;
        for col in 0..dimension {
            m[(row, col)] = 2.0 * (vi[col] - v0[col]);
            norm_diff += vi[col] * vi[col] - v0[col] * v0[col];
        }
        rhs[row] = norm_diff;
    }
    let center = match m.lu().solve(&rhs) {
        Some(c) => c,
        // Flat simplex: treat its circumsphere as all-containing so it is
        // flushed from the triangulation as soon as possible
        None => return true,
    };
    let radius2: f64 = v0
        .iter()
        .enumerate()
        .map(|(axis, v)| (v - center[axis]) * (v - center[axis]))
        .sum();
    let dist2: f64 = point
        .iter()
        .enumerate()
        .map(|(axis, v)| (v - center[axis]) * (v - center[axis]))
        .sum();
    dist2 < radius2 * (1.0 - 1.0e-12)
}

fn is_degenerate(vertices: &[Vec<f64>], simplex: &[usize], dimension: usize) -> bool {
    let v0 = &vertices[simplex[0]];
    let mut m = DMatrix::zeros(dimension, dimension);
    for row in 0..dimension {
        let vi = &vertices[simplex[row + 1]];
        for col in 0..dimension {
            m[(row, col)] = vi[col] - v0[col];
        }
    }
    m.determinant().abs() < 1.0e-12
}

/// Which physical input each table column carries. Determines the allowed
/// extrapolation axis for that column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampledAxisKind {
    Rate,
    SuctionPressure,
    DischargePressure,
}

/// Sampled compressor: (rate, suction pressure, discharge pressure) to
/// power and/or fuel. Extrapolation is allowed only along documented axes:
/// rate below the table minimum (ASV recirculation), suction pressure
/// below minimum, discharge pressure above maximum (downstream choking).
#[derive(Debug, Clone, PartialEq)]
pub struct SampledCompressor {
    pub axes: Vec<SampledAxisKind>,
    pub power: Option<TabulatedFunction>,
    pub fuel: Option<TabulatedFunction>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledCompressorResult {
    pub power: Option<f64>,
    pub fuel_rate: Option<f64>,
    pub is_valid: bool,
    pub failure_status: Option<FailureStatus>,
}

impl SampledCompressor {
    pub fn new(
        axes: Vec<SampledAxisKind>,
        power: Option<TabulatedFunction>,
        fuel: Option<TabulatedFunction>,
    ) -> Self {
        Self { axes, power, fuel }
    }

    fn reference_table(&self) -> &TabulatedFunction {
        self.power
            .as_ref()
            .or(self.fuel.as_ref())
            .expect("sampled compressor has at least one output table")
    }

    /// Clamp the query along the axes where extrapolation is documented.
    fn clamped_query(&self, query: &[f64]) -> Vec<f64> {
        let table = self.reference_table();
        query
            .iter()
            .enumerate()
            .map(|(axis, v)| match self.axes[axis] {
                SampledAxisKind::Rate => v.max(table.axis_minimum(axis)),
                SampledAxisKind::SuctionPressure => v.max(table.axis_minimum(axis)),
                SampledAxisKind::DischargePressure => v.min(table.axis_maximum(axis)),
            })
            .collect()
    }

    pub fn evaluate(&self, query: &[f64]) -> SampledCompressorResult {
        if query.iter().any(|v| !v.is_finite()) {
            return SampledCompressorResult {
                power: None,
                fuel_rate: None,
                is_valid: false,
                failure_status: Some(FailureStatus::InvalidRateInput),
            };
        }
        let clamped = self.clamped_query(query);

        let mut power = None;
        let mut fuel = None;
        for (table, slot) in [(&self.power, &mut power), (&self.fuel, &mut fuel)] {
            if let Some(table) = table {
                match table.evaluate(&clamped) {
                    Ok(v) => *slot = Some(v),
                    Err(_) => {
                        return SampledCompressorResult {
                            power: None,
                            fuel_rate: None,
                            is_valid: false,
                            failure_status: Some(FailureStatus::OutsideConvexHull),
                        }
                    }
                }
            }
        }

        SampledCompressorResult {
            power,
            fuel_rate: fuel,
            is_valid: true,
            failure_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn one_dimensional_table_interpolates() {
        let table = TabulatedFunction::new(
            vec![vec![0.0], vec![1.0e6], vec![2.6e6], vec![4.4e6]],
            vec![0.0, 10.0, 15.0, 20.0],
        )
        .unwrap();
        assert_relative_eq!(table.evaluate(&[2.6e6]).unwrap(), 15.0, epsilon = 1e-9);
        assert_relative_eq!(
            table.evaluate(&[1.8e6]).unwrap(),
            10.0 + 0.8 / 1.6 * 5.0,
            epsilon = 1e-9
        );
        assert!(table.evaluate(&[5.0e6]).is_err());
    }

    #[test]
    fn two_dimensional_vertex_queries_return_vertex_values() {
        let points = vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![0.5, 0.5],
        ];
        let values = vec![1.0, 2.0, 3.0, 4.0, 10.0];
        let table = TabulatedFunction::new(points.clone(), values.clone()).unwrap();
        for (p, v) in points.iter().zip(values.iter()) {
            assert_relative_eq!(table.evaluate(p).unwrap(), *v, epsilon = 1e-9);
        }
    }

    #[test]
    fn interior_queries_interpolate_and_exterior_fail() {
        let table = TabulatedFunction::new(
            vec![vec![0.0, 0.0], vec![2.0, 0.0], vec![0.0, 2.0]],
            vec![0.0, 2.0, 4.0],
        )
        .unwrap();
        // Barycentric in one triangle: linear function x + 2y
        assert_relative_eq!(table.evaluate(&[0.5, 0.5]).unwrap(), 1.5, epsilon = 1e-9);
        assert!(matches!(
            table.evaluate(&[2.0, 2.0]).unwrap_err(),
            TabularError::OutsideConvexHull(_)
        ));
    }

    #[test]
    fn three_dimensional_linear_field_is_reproduced() {
        let mut points = Vec::new();
        let mut values = Vec::new();
        for x in [0.0, 1.0] {
            for y in [0.0, 1.0] {
                for z in [0.0, 1.0] {
                    points.push(vec![x, y, z]);
                    values.push(1.0 + 2.0 * x + 3.0 * y + 4.0 * z);
                }
            }
        }
        let table = TabulatedFunction::new(points, values).unwrap();
        let got = table.evaluate(&[0.25, 0.5, 0.75]).unwrap();
        assert_relative_eq!(got, 1.0 + 0.5 + 1.5 + 3.0, epsilon = 1e-7);
    }

    #[test]
    fn constant_axis_is_factored_out() {
        let table = TabulatedFunction::new(
            vec![vec![1.0, 50.0], vec![2.0, 50.0], vec![3.0, 50.0]],
            vec![10.0, 20.0, 30.0],
        )
        .unwrap();
        assert_relative_eq!(table.evaluate(&[2.5, 50.0]).unwrap(), 25.0, epsilon = 1e-9);
        assert!(table.evaluate(&[2.5, 60.0]).is_err());
    }

    #[test]
    fn sampled_compressor_clamps_only_documented_axes() {
        let table = TabulatedFunction::new(
            vec![
                vec![1000.0, 20.0],
                vec![2000.0, 20.0],
                vec![1000.0, 40.0],
                vec![2000.0, 40.0],
            ],
            vec![5.0, 8.0, 7.0, 11.0],
        )
        .unwrap();
        let sampled = SampledCompressor::new(
            vec![SampledAxisKind::Rate, SampledAxisKind::DischargePressure],
            Some(table),
            None,
        );

        // Rate below minimum clamps up (ASV), discharge above maximum clamps
        // down (choking)
        let low = sampled.evaluate(&[500.0, 30.0]);
        assert!(low.is_valid);
        let at_min = sampled.evaluate(&[1000.0, 30.0]);
        assert_relative_eq!(low.power.unwrap(), at_min.power.unwrap(), epsilon = 1e-9);

        let choked = sampled.evaluate(&[1500.0, 60.0]);
        assert!(choked.is_valid);

        // Rate above maximum is not a documented extrapolation axis
        let high = sampled.evaluate(&[3000.0, 30.0]);
        assert!(!high.is_valid);
        assert_eq!(high.failure_status, Some(FailureStatus::OutsideConvexHull));
    }
}
