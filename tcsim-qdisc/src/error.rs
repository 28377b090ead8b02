use tcsim_aqm::AqmConfigError;
use thiserror::Error;

/// An invalid queue discipline configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{kind}: the queue limit must be positive")]
    ZeroLimit { kind: &'static str },
    #[error("{kind}: {limit} limits are not supported")]
    UnsupportedLimit { kind: &'static str, limit: &'static str },
    #[error("{kind}: the discipline has no limit of its own, set the limit of its children")]
    NoLimit { kind: &'static str },
    #[error("{kind}: {name} must be positive")]
    Zero { kind: &'static str, name: &'static str },
    #[error("{kind}: priority map entry {band} is out of range for {bands} bands")]
    PriomapOutOfRange { kind: &'static str, band: u8, bands: usize },
    #[error("{kind}: at least one band is required")]
    NoBands { kind: &'static str },
    #[error("tbf: burst of {burst} bytes is smaller than the mtu of {mtu} bytes")]
    BurstBelowMtu { burst: u64, mtu: u64 },
    #[error("tbf: peak rate {peak} must be above the rate {rate}")]
    PeakRateTooLow { rate: String, peak: String },
    #[error(transparent)]
    Aqm(#[from] AqmConfigError),
}

impl ConfigError {
    pub(crate) const fn zero(kind: &'static str, name: &'static str) -> Self {
        Self::Zero { kind, name }
    }
}
