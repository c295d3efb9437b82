//! Physical constants and thermal occupation helpers.

/// Boltzmann constant in meV/K.
pub const K_B_MEV_PER_K: f64 = 0.086_173_332_62;

/// Bose occupation for a mode at energy `energy` (meV) and temperature
/// `temperature` (K).
///
/// Creation (E >= 0) gets `n + 1`, annihilation (E < 0) gets `n`, so that at
/// zero temperature only the positive branch survives.
pub fn bose(energy: f64, temperature: f64) -> f64 {
    if temperature <= 0.0 {
        return if energy >= 0.0 { 1.0 } else { 0.0 };
    }
    let n = 1.0 / ((energy.abs() / (K_B_MEV_PER_K * temperature)).exp() - 1.0);
    if energy >= 0.0 { n + 1.0 } else { n }
}

/// Bose factor regularized below `cutoff`: energies with `|E| < |cutoff|`
/// are evaluated at `±|cutoff|` (keeping the sign of `E`).
pub fn bose_cutoff(energy: f64, temperature: f64, cutoff: f64) -> f64 {
    let cutoff = cutoff.abs();
    if energy.abs() < cutoff {
        let clamped = if energy.is_sign_negative() { -cutoff } else { cutoff };
        bose(clamped, temperature)
    } else {
        bose(energy, temperature)
    }
}
