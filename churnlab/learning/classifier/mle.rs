use linfa::traits::Fit;
use linfa_logistic::{
    error::Error as SolverError, FittedLogisticRegression, LogisticRegression as LinfaLogistic,
};
use nalgebra::{Cholesky, DMatrix};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{ChurnError, DegenerateReason, Result};

/// Ratio of a Cholesky pivot to its diagonal entry below which a column
/// counts as collinear with the columns before it.
const RANK_TOLERANCE: f64 = 1e-9;

/// Bounds keeping fitted probabilities away from exact 0 and 1.
const MU_EPS: f64 = f64::EPSILON;

/// Maximum-likelihood estimate with its Wald standard errors.
#[derive(Debug, Clone)]
pub(crate) struct MleFit {
    /// Coefficients, intercept first.
    pub beta: Array1<f64>,
    /// Square roots of the inverse Fisher information diagonal.
    pub std_errors: Array1<f64>,
    pub deviance: f64,
    /// Euclidean norm of the log-likelihood score at `beta`.
    pub score_norm: f64,
}

pub(crate) fn logistic(eta: f64) -> f64 {
    (1.0 / (1.0 + (-eta).exp())).clamp(MU_EPS, 1.0 - MU_EPS)
}

/// Binomial deviance of probabilities `mu` for 0/1 responses `y`.
pub(crate) fn deviance(y: ArrayView1<'_, f64>, mu: ArrayView1<'_, f64>) -> f64 {
    -2.0 * y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| if yi > 0.5 { mi.ln() } else { (1.0 - mi).ln() })
        .sum::<f64>()
}

/// Fits `positive ~ 1 + design` by unpenalized maximum likelihood.
///
/// `names` labels the intercept followed by the design columns. The
/// optimisation runs in `linfa-logistic` (L-BFGS); the information matrix
/// `X'WX` at the optimum is factored with `nalgebra` for the standard errors.
pub(crate) fn fit(
    design: ArrayView2<'_, f64>,
    positive: &Array1<bool>,
    names: &[String],
    max_iterations: usize,
    tolerance: f64,
) -> Result<MleFit> {
    let n = design.nrows();
    let mut x = Array2::<f64>::ones((n, design.ncols() + 1));
    x.slice_mut(s![.., 1..]).assign(&design);
    let y = positive.mapv(|p| f64::from(u8::from(p)));

    if let Some(column) = collinear_column(&x.t().dot(&x)) {
        return Err(rank_deficient(names, column));
    }

    let dataset = linfa::DatasetBase::new(design.to_owned(), positive.clone());
    let solved: std::result::Result<FittedLogisticRegression<f64, bool>, SolverError> =
        LinfaLogistic::default()
            .alpha(0.0)
            .with_intercept(true)
            .max_iterations(u64::try_from(max_iterations).unwrap_or(u64::MAX))
            .gradient_tolerance(tolerance)
            .fit(&dataset);
    let fitted = solved?;

    // linfa picks its own positive label; flip to churn-positive log-odds.
    let sign = if fitted.labels().pos.class { 1.0 } else { -1.0 };
    let mut beta = Array1::<f64>::zeros(x.ncols());
    beta[0] = sign * fitted.intercept();
    beta.slice_mut(s![1..]).assign(&fitted.params().mapv(|value| sign * value));

    let eta = x.dot(&beta);
    let separated = eta
        .iter()
        .zip(positive)
        .all(|(&e, &p)| if p { e > 0.0 } else { e < 0.0 });
    if separated {
        return Err(ChurnError::degenerate(DegenerateReason::Separation));
    }

    let mu = eta.mapv(logistic);
    let score = x.t().dot(&(&y - &mu));
    let score_norm = score.dot(&score).sqrt();
    let converged = score_norm.is_finite() && score_norm <= tolerance.sqrt() * n as f64;
    if !converged {
        return Err(ChurnError::degenerate(DegenerateReason::NotConverged {
            iterations: max_iterations,
        }));
    }

    let weights = mu.mapv(|m| m * (1.0 - m));
    let information = weighted_gram(x.view(), weights.view());
    let covariance = Cholesky::new(to_dmatrix(&information))
        .map(|chol| chol.inverse())
        .ok_or_else(|| {
            let column = collinear_column(&information).unwrap_or(names.len().saturating_sub(1));
            rank_deficient(names, column)
        })?;
    let std_errors = covariance.diagonal().iter().map(|var| var.sqrt()).collect();

    Ok(MleFit {
        beta,
        std_errors,
        deviance: deviance(y.view(), mu.view()),
        score_norm,
    })
}

/// Returns `X'WX` for diagonal weights `w`.
fn weighted_gram(x: ArrayView2<'_, f64>, w: ArrayView1<'_, f64>) -> Array2<f64> {
    let mut wx = x.to_owned();
    for (mut row, &wi) in wx.axis_iter_mut(Axis(0)).zip(w.iter()) {
        row.mapv_inplace(|v| v * wi);
    }
    x.t().dot(&wx)
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// First column whose pivot collapses when the leading blocks of a Gram
/// matrix are factored in turn.
pub(crate) fn collinear_column(gram: &Array2<f64>) -> Option<usize> {
    let gram = to_dmatrix(gram);
    (0..gram.nrows()).find(|&j| {
        let block = gram.view((0, 0), (j + 1, j + 1)).clone_owned();
        match Cholesky::new(block) {
            Some(chol) => {
                let pivot = chol.l_dirty()[(j, j)];
                pivot * pivot <= RANK_TOLERANCE * gram[(j, j)].abs()
            }
            None => true,
        }
    })
}

fn rank_deficient(names: &[String], column: usize) -> ChurnError {
    ChurnError::degenerate(DegenerateReason::RankDeficient {
        column: names
            .get(column)
            .cloned()
            .unwrap_or_else(|| format!("#{column}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn collinear_column_names_first_dependent_column() {
        // Third column is the sum of the first two.
        let gram = array![[4.0, 2.0, 6.0], [2.0, 3.0, 5.0], [6.0, 5.0, 11.0]];
        assert_eq!(collinear_column(&gram), Some(2));
        assert_eq!(collinear_column(&array![[4.0, 2.0], [2.0, 3.0]]), None);
        assert_eq!(collinear_column(&array![[1.0, 0.0], [0.0, 0.0]]), Some(1));
    }

    #[test]
    fn deviance_of_perfect_fit_is_near_zero() {
        let y = array![1.0, 0.0];
        let mu = array![logistic(50.0), logistic(-50.0)];
        assert!(deviance(y.view(), mu.view()) < 1e-12);
    }
}
