//! Magnetic form factor given as a user formula in `Q` (Å⁻¹).

use num_complex::Complex64;

use crate::expr::{Expr, ExprError};

/// Name the momentum-transfer magnitude is bound to inside the formula.
pub const Q_VARIABLE: &str = "Q";

/// Value used whenever the formula cannot be parsed or evaluated.
pub const FALLBACK: f64 = 0.0;

/// A compiled form-factor formula.
///
/// Construction never fails: a formula that does not parse is kept together
/// with its error and every evaluation yields [`FALLBACK`].
#[derive(Debug, Clone)]
pub struct FormFactor {
    formula: String,
    compiled: Result<Expr, ExprError>,
}

impl FormFactor {
    /// Returns `None` for an empty (disabled) formula.
    pub fn new(formula: &str) -> Option<Self> {
        let trimmed = formula.trim();
        if trimmed.is_empty() {
            return None;
        }
        let compiled = Expr::parse(trimmed);
        if let Err(err) = &compiled {
            log::warn!("form factor formula \"{trimmed}\" is invalid ({err}); using {FALLBACK}");
        }
        Some(Self {
            formula: trimmed.to_string(),
            compiled,
        })
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_ok()
    }

    pub fn try_evaluate(&self, q_abs: f64) -> Result<f64, ExprError> {
        let expr = self.compiled.as_ref().map_err(Clone::clone)?;
        let value = expr.eval(&[(Q_VARIABLE, Complex64::new(q_abs, 0.0))])?;
        Ok(value.re)
    }

    /// Real part of the formula at `q_abs`, or [`FALLBACK`].
    pub fn evaluate(&self, q_abs: f64) -> f64 {
        self.try_evaluate(q_abs).unwrap_or(FALLBACK)
    }
}
