use thiserror::Error;

use crate::config::constants::MAX_SOLVER_ITERATIONS;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RootFindError {
    #[error("root is not bracketed: f({a}) = {fa}, f({b}) = {fb}")]
    NotBracketed { a: f64, b: f64, fa: f64, fb: f64 },
    #[error("no convergence after {0} iterations")]
    MaxIterations(usize),
}

/// Brent's method on [a, b]. The bracket must straddle the root.
///
/// Combines bisection, secant and inverse quadratic interpolation, which is
/// what keeps the train solvers stable near the chart envelope where the
/// residual flattens out.
pub fn brent<F>(f: F, a: f64, b: f64, tol: f64) -> Result<f64, RootFindError>
where
    F: Fn(f64) -> f64,
{
    let (mut a, mut b) = (a, b);
    let mut fa = f(a);
    let mut fb = f(b);

    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    if fa * fb > 0.0 {
        return Err(RootFindError::NotBracketed { a, b, fa, fb });
    }

    if fa.abs() < fb.abs() {
        std::mem::swap(&mut a, &mut b);
        std::mem::swap(&mut fa, &mut fb);
    }

    let mut c = a;
    let mut fc = fa;
    let mut d = b - a;
    let mut mflag = true;

    for _ in 0..MAX_SOLVER_ITERATIONS {
        if fb.abs() < tol || (b - a).abs() < tol {
            return Ok(b);
        }

        let mut s = if fa != fc && fb != fc {
            // Inverse quadratic interpolation
            a * fb * fc / ((fa - fb) * (fa - fc))
                + b * fa * fc / ((fb - fa) * (fb - fc))
                + c * fa * fb / ((fc - fa) * (fc - fb))
        } else {
            // Secant
            b - fb * (b - a) / (fb - fa)
        };

        let lo = (3.0 * a + b) / 4.0;
        let hi = b;
        let (lo, hi) = if lo < hi { (lo, hi) } else { (hi, lo) };
        let use_bisection = s < lo
            || s > hi
            || (mflag && (s - b).abs() >= (b - c).abs() / 2.0)
            || (!mflag && (s - b).abs() >= (c - d).abs() / 2.0)
            || (mflag && (b - c).abs() < tol)
            || (!mflag && (c - d).abs() < tol);

        if use_bisection {
            s = (a + b) / 2.0;
            mflag = true;
        } else {
            mflag = false;
        }

        let fs = f(s);
        d = c;
        c = b;
        fc = fb;

        if fa * fs < 0.0 {
            b = s;
            fb = fs;
        } else {
            a = s;
            fa = fs;
        }

        if fa.abs() < fb.abs() {
            std::mem::swap(&mut a, &mut b);
            std::mem::swap(&mut fa, &mut fb);
        }
    }

    Err(RootFindError::MaxIterations(MAX_SOLVER_ITERATIONS))
}

/// Piecewise-linear interpolation with linear extension beyond the endpoints.
///
/// Callers that must reject out-of-range queries check the range themselves;
/// the linear extension keeps residual functions smooth for the root finders.
pub fn interp_linear(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());
    debug_assert!(xs.len() >= 2);

    let n = xs.len();
    let i = match xs.iter().position(|&v| v > x) {
        Some(0) => 0,
        Some(i) => i - 1,
        None => n - 2,
    };
    let (x0, x1) = (xs[i], xs[i + 1]);
    let (y0, y1) = (ys[i], ys[i + 1]);
    if x1 == x0 {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Fraction of the way x sits between lo and hi, clamped to [0, 1].
pub fn unit_fraction(lo: f64, hi: f64, x: f64) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn brent_finds_cubic_root() {
        let f = |x: f64| x * x * x - 2.0 * x - 5.0;
        let root = brent(f, 2.0, 3.0, 1e-10).unwrap();
        assert_relative_eq!(root, 2.094_551_481_542_327, epsilon = 1e-8);
    }

    #[test]
    fn brent_rejects_unbracketed_interval() {
        let err = brent(|x| x * x + 1.0, -1.0, 1.0, 1e-10).unwrap_err();
        assert!(matches!(err, RootFindError::NotBracketed { .. }));
    }

    #[test]
    fn brent_accepts_root_at_endpoint() {
        let root = brent(|x| x - 2.0, 2.0, 5.0, 1e-10).unwrap();
        assert_relative_eq!(root, 2.0);
    }

    #[test]
    fn interpolation_hits_nodes_and_midpoints() {
        let xs = [0.0, 1.0, 3.0];
        let ys = [0.0, 10.0, 20.0];
        assert_relative_eq!(interp_linear(&xs, &ys, 1.0), 10.0);
        assert_relative_eq!(interp_linear(&xs, &ys, 2.0), 15.0);
        // Linear extension beyond the last node
        assert_relative_eq!(interp_linear(&xs, &ys, 4.0), 25.0);
    }
}
