use thiserror::Error;

/// An invalid control law parameter. Parameters are rejected, never clamped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AqmConfigError {
    #[error("{law}: {name} must be positive")]
    NotPositive { law: &'static str, name: &'static str },
    #[error("{law}: {name} = {value} is outside {range}")]
    OutOfRange { law: &'static str, name: &'static str, value: f64, range: &'static str },
    #[error("red: min_th ({min_th}) must be below max_th ({max_th})")]
    Thresholds { min_th: f64, max_th: f64 },
}

impl AqmConfigError {
    pub(crate) const fn not_positive(law: &'static str, name: &'static str) -> Self {
        Self::NotPositive { law, name }
    }

    /// Checks that `value` lies in `[lo, hi]`.
    pub(crate) fn check_range(
        law: &'static str,
        name: &'static str,
        value: f64,
        lo: f64,
        hi: f64,
        range: &'static str,
    ) -> Result<(), Self> {
        if value.is_nan() || value < lo || value > hi {
            return Err(Self::OutOfRange { law, name, value, range });
        }
        Ok(())
    }
}
