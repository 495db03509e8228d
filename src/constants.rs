//! Physical constants in cgs units.
//!
//! Only the handful of constants the fitting core actually needs: the
//! mass-to-radius derivation `r = sqrt(G·M/10^logg)` works in cgs and
//! converts to solar radii at the end.

/// Newtonian gravitational constant [cm^3 g^-1 s^-2].
pub const GG_CGS: f64 = 6.673_84e-8;

/// Solar mass [g].
pub const MSOL_CGS: f64 = 1.988_547e33;

/// Solar radius [cm].
pub const RSOL_CGS: f64 = 6.955_08e10;

/// Surface gravity of the Sun, `log10(G·Msol/Rsol²)` [dex, cgs].
///
/// A star of one solar mass at this logg has a radius of exactly one solar
/// radius, which pins down the unit conventions of the radius derivation.
pub fn solar_logg() -> f64 {
    (GG_CGS * MSOL_CGS / (RSOL_CGS * RSOL_CGS)).log10()
}

/// Radius in solar radii for a star of mass `mass` (solar masses) at surface
/// gravity `logg` (dex, cgs).
pub fn radius_from_mass(mass: f64, logg: f64) -> f64 {
    (GG_CGS * mass * MSOL_CGS / 10f64.powf(logg)).sqrt() / RSOL_CGS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solar_mass_at_solar_logg_gives_one_solar_radius() {
        let r = radius_from_mass(1.0, solar_logg());
        assert!((r - 1.0).abs() < 1e-12, "expected 1 Rsol, got {r}");
    }

    #[test]
    fn solar_logg_is_in_the_expected_ballpark() {
        // The canonical value is ~4.438 dex.
        let logg = solar_logg();
        assert!((logg - 4.438).abs() < 0.01, "solar logg {logg}");
    }
}
