//! Direction-frame conversions into ICRS that the pure-Rust ERFA port doesn't
//! provide. These follow the ERFA routines named in each doc comment.

use marlu::erfa::{
    constants::{ERFA_DJ00, ERFA_DJY, ERFA_DR2AS, ERFA_DTY},
    misc::norm_angle,
    transform::{cartesian_to_spherical, spherical_to_cartesian},
    vectors_and_matrices::inner_product,
};

/// ICRS to Galactic rotation matrix (Hipparcos, ESA SP-1200 vol 1 §1.5.3).
#[rustfmt::skip]
const ICRS_TO_GALACTIC: [[f64; 3]; 3] = [
    [-0.054875560416215368492398900454, -0.873437090234885048760383168409, -0.483835015548713226831774175116],
    [ 0.494109427875583673525222371358, -0.444829629960011178146614061616,  0.746982244497218890527388004556],
    [-0.867666149019004701181616534570, -0.198076373431201528180486091412,  0.455983776175066922272100478348],
];

/// Vector A of the FK4 E-terms and its rate of change per tropical century.
const FK4_E_TERMS: [f64; 3] = [-1.62557e-6, -0.31919e-6, -0.13843e-6];
const FK4_E_TERMS_RATE: [f64; 3] = [1.245e-3, -1.580e-3, -0.659e-3];

/// FK4 to FK5 (Fricke) position and velocity matrices.
#[rustfmt::skip]
const FK4_TO_FK5: [[[f64; 3]; 3]; 2] = [
    [
        [ 0.9999256782, -0.0111820611, -0.0048579477],
        [ 0.0111820610,  0.9999374784, -0.0000271765],
        [ 0.0048579479, -0.0000271474,  0.9999881997],
    ],
    [
        [-0.000551, -0.238565,  0.435739],
        [ 0.238514, -0.002667, -0.008541],
        [-0.435623,  0.012254,  0.002117],
    ],
];

/// Besselian epoch of a two-part Julian date. (`eraEpb`)
pub(super) fn besselian_epoch(dj1: f64, dj2: f64) -> f64 {
    // J2000.0 minus B1900.0 in days.
    const D1900: f64 = 36524.68648;
    1900.0 + ((dj1 - ERFA_DJ00) + (dj2 + D1900)) / ERFA_DTY
}

/// Julian epoch of a Besselian epoch.
fn besselian_to_julian_epoch(bepoch: f64) -> f64 {
    // eraEpb2jd followed by eraEpj.
    let mjd = 15019.81352 + (bepoch - 1900.0) * ERFA_DTY;
    2000.0 + (mjd - 51544.5) / ERFA_DJY
}

/// Galactic (l, b) to ICRS (RA, Dec), all in radians. (`eraG2icrs`)
pub(super) fn galactic_to_icrs(l: f64, b: f64) -> (f64, f64) {
    let v = spherical_to_cartesian(l, b);
    let mut icrs = [0.0; 3];
    for (i, c) in icrs.iter_mut().enumerate() {
        *c = (0..3).map(|j| ICRS_TO_GALACTIC[j][i] * v[j]).sum();
    }
    let (ra, dec) = cartesian_to_spherical(icrs);
    (norm_angle(ra), dec)
}

/// An FK4 B1950.0 position observed at Besselian epoch `bepoch`, assuming
/// zero proper motion in FK5, to FK5 J2000.0. (`eraFk45z`)
pub(super) fn fk4_to_fk5_no_pm(ra1950: f64, dec1950: f64, bepoch: f64) -> (f64, f64) {
    // Radians per year to arcsec per century.
    let pmf = 100.0 * ERFA_DR2AS;

    let r0 = spherical_to_cartesian(ra1950, dec1950);

    // Adjust A to give zero proper motion in FK5.
    let w = (bepoch - 1950.0) / pmf;
    let a: [f64; 3] = std::array::from_fn(|i| FK4_E_TERMS[i] + w * FK4_E_TERMS_RATE[i]);

    // Remove the E-terms.
    let ra = inner_product(r0, a);
    let p: [f64; 3] = std::array::from_fn(|i| r0[i] - (a[i] - ra * r0[i]));

    let mut pv = [[0.0; 3]; 2];
    for (m, row) in FK4_TO_FK5.iter().zip(pv.iter_mut()) {
        for (j, c) in row.iter_mut().enumerate() {
            *c = (0..3).map(|k| m[j][k] * p[k]).sum();
        }
    }

    // Allow for the fictitious proper motion.
    let w = (besselian_to_julian_epoch(bepoch) - 2000.0) / pmf;
    let position: [f64; 3] = std::array::from_fn(|i| pv[0][i] + w * pv[1][i]);

    let (ra, dec) = cartesian_to_spherical(position);
    (norm_angle(ra), dec)
}
