//! Projection kinds and the latitude mappings shared by addressing and
//! the scanline mappers.

use crate::core::constants::{MERCATOR_MAX_GD_INV, MERCATOR_MAX_LAT};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// How the viewport maps the globe onto the destination image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    Equirectangular,
    Mercator,
    Spherical,
}

impl Default for Projection {
    fn default() -> Self {
        Self::Spherical
    }
}

/// How the source texture of a theme is laid out in global pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureProjection {
    Equirectangular,
    Mercator,
}

impl Default for TextureProjection {
    fn default() -> Self {
        Self::Equirectangular
    }
}

impl TextureProjection {
    /// Northernmost latitude covered by the texture
    pub fn max_lat(&self) -> f64 {
        match self {
            Self::Equirectangular => std::f64::consts::FRAC_PI_2,
            Self::Mercator => MERCATOR_MAX_LAT,
        }
    }
}

/// Latitude below which the polynomial is used; its truncation error stays under 1e-5 there.
const GD_INV_POLY_LIMIT: f64 = 1.1;

/// Maclaurin coefficients of the inverse Gudermannian, `E(2k) / (2k+1)!`.
const GD_INV_COEFFS: [f64; 13] = [
    1.0,
    1.0 / 6.0,
    1.0 / 24.0,
    61.0 / 5040.0,
    277.0 / 72576.0,
    50521.0 / 39916800.0,
    41581.0 / 95800320.0,
    199360981.0 / 1307674368000.0,
    228135437.0 / 4184557977600.0,
    2404879675441.0 / 121645100408832000.0,
    14814847529501.0 / 2043637686868377600.0,
    69348874393137901.0 / 25852016738884976640000.0,
    238685140977801337.0 / 238634000651101388800000.0,
];

/// Intervals of the table covering `GD_INV_POLY_LIMIT..=MERCATOR_MAX_LAT`.
/// Linear interpolation error stays under 1e-5 up to the clamp.
const GD_INV_TABLE_STEPS: usize = 1024;

/// Exact inverse Gudermannian sampled over the polar band the polynomial
/// does not cover.
static GD_INV_TABLE: Lazy<Vec<f64>> = Lazy::new(|| {
    let step = (MERCATOR_MAX_LAT - GD_INV_POLY_LIMIT) / GD_INV_TABLE_STEPS as f64;
    (0..=GD_INV_TABLE_STEPS)
        .map(|i| (GD_INV_POLY_LIMIT + step * i as f64).tan().asinh())
        .collect()
});

/// Inverse Gudermannian `asinh(tan(lat))` as used by Mercator.
///
/// Evaluated with a Horner polynomial near the equator, interpolated from a
/// table towards the poles and saturated at [`MERCATOR_MAX_GD_INV`] beyond
/// [`MERCATOR_MAX_LAT`]. No transcendental call is made per pixel; the
/// error is below 1e-5 over the whole unsaturated range.
pub fn gd_inv(lat: f64) -> f64 {
    let abs = lat.abs();
    if abs >= MERCATOR_MAX_LAT {
        return MERCATOR_MAX_GD_INV.copysign(lat);
    }
    if abs > GD_INV_POLY_LIMIT {
        return gd_inv_polar(abs).copysign(lat);
    }
    let t = lat * lat;
    lat * GD_INV_COEFFS
        .iter()
        .rev()
        .fold(0.0, |acc, coeff| acc * t + coeff)
}

fn gd_inv_polar(abs: f64) -> f64 {
    let table = &*GD_INV_TABLE;
    let pos = (abs - GD_INV_POLY_LIMIT) / (MERCATOR_MAX_LAT - GD_INV_POLY_LIMIT) * GD_INV_TABLE_STEPS as f64;
    let i = (pos as usize).min(GD_INV_TABLE_STEPS - 1);
    let frac = pos - i as f64;
    table[i] + (table[i + 1] - table[i]) * frac
}

/// Gudermannian, the inverse of [`gd_inv`]: `atan(sinh(y))`.
pub fn gd(y: f64) -> f64 {
    y.sinh().atan()
}

/// Clamps a latitude to the band Mercator can represent.
pub fn clamp_mercator_lat(lat: f64) -> f64 {
    lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT)
}
