use serde::{Deserialize, Serialize};

/// One row of the coefficient table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    /// `(Intercept)` or a design column name.
    pub name: String,
    /// Maximum-likelihood estimate on the log-odds scale.
    pub estimate: f64,
    /// Standard error from the inverse Fisher information.
    pub std_error: f64,
    /// Wald statistic `estimate / std_error`.
    pub statistic: f64,
    /// Two-sided normal p-value of the Wald statistic.
    pub p_value: f64,
}

impl Term {
    pub(crate) fn new(name: impl Into<String>, estimate: f64, std_error: f64) -> Self {
        let statistic = estimate / std_error;
        Self {
            name: name.into(),
            estimate,
            std_error,
            statistic,
            p_value: two_sided_p(statistic),
        }
    }

    /// Odds ratio `exp(estimate)`.
    #[must_use]
    pub fn odds_ratio(&self) -> f64 {
        self.estimate.exp()
    }
}

/// Report describing a logistic fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Model name.
    pub model: String,
    /// Training observations.
    pub observations: usize,
    /// Iteration cap handed to the solver.
    pub max_iterations: usize,
    /// Norm of the log-likelihood score at the estimate.
    pub score_norm: f64,
    /// Intercept-only deviance.
    pub null_deviance: f64,
    /// Residual deviance.
    pub deviance: f64,
    /// Akaike information criterion.
    pub aic: f64,
}

impl FitReport {
    /// Renders a concise summary string.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[GLM] model={} n={} score_norm={:.2e} null_deviance={:.2} deviance={:.2} aic={:.2}",
            self.model,
            self.observations,
            self.score_norm,
            self.null_deviance,
            self.deviance,
            self.aic
        )
    }
}

/// Renders the coefficient table as aligned text.
#[must_use]
pub fn render_terms(terms: &[Term]) -> String {
    let width = terms
        .iter()
        .map(|term| term.name.len())
        .max()
        .unwrap_or(4)
        .max(4);
    let mut out = format!(
        "{:<width$} {:>10} {:>10} {:>8} {:>10}\n",
        "term", "estimate", "std.error", "z", "p.value"
    );
    for term in terms {
        out.push_str(&format!(
            "{:<width$} {:>10.4} {:>10.4} {:>8.3} {:>10.3e}\n",
            term.name, term.estimate, term.std_error, term.statistic, term.p_value
        ));
    }
    out
}

fn two_sided_p(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    (1.0 - erf(z.abs() / std::f64::consts::SQRT_2)).max(0.0)
}

/// Error function approximation (Abramowitz and Stegun 7.1.26).
fn erf(x: f64) -> f64 {
    let a1 = 0.254_829_592;
    let a2 = -0.284_496_736;
    let a3 = 1.421_413_741;
    let a4 = -1.453_152_027;
    let a5 = 1.061_405_429;
    let p = 0.327_591_1;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}
