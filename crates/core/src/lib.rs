//! Spin-spin correlation functions and neutron intensities for linear spin-wave models.

pub mod config;
pub mod correlation;
pub mod expr;
pub mod form_factor;
pub mod hamiltonian;
pub mod intensity;
pub mod io;
pub mod lattice;
pub mod metrics;
pub mod site;
pub mod spectrum;
pub mod units;

pub use config::{MagdynConfig, MagdynOptions};
pub use correlation::{Correlations, Diagnostic, EnergyAndWeight, compute_correlations};
pub use hamiltonian::{EigenMode, HamiltonianBundle};
pub use intensity::apply_weights;
pub use site::MagneticSite;

#[cfg(test)]
mod _tests_intensity;
#[cfg(test)]
mod _tests_spectrum;
