//! Useful constants.
//!
//! All constants *must* be double precision.

use std::collections::HashMap;

use lazy_static::lazy_static;
use marlu::{
    constants::{MWA_HEIGHT_M, MWA_LAT_RAD, MWA_LONG_RAD},
    LatLngHeight,
};

/// The difference between a Julian date and a modified Julian date \[days\].
pub const MJD_JD_OFFSET: f64 = 2400000.5;

/// The rotation rate of the Earth relative to the fixed stars \[rad/s\].
pub const EARTH_ROTATION_RATE: f64 = 7.292115e-5;

/// Solar motion relative to the kinematic local standard of rest \[m/s\].
pub const LSRK_SPEED: f64 = 20e3;
/// Apex of the solar motion relative to the kinematic LSR, J2000 RA
/// (18h03m50.29s) and Dec (+30°00'16.8") \[degrees\].
pub const LSRK_APEX_RA_DEG: f64 = 270.959_541_666_666_7;
pub const LSRK_APEX_DEC_DEG: f64 = 30.004_666_666_666_67;

/// Solar motion relative to the dynamical LSR \[m/s\] and its apex in
/// Galactic (l, b) \[degrees\].
pub const LSRD_SPEED: f64 = 16.552_94e3;
pub const LSRD_APEX_LB_DEG: (f64, f64) = (53.13, 25.02);

/// Galactic rotation at the Sun \[m/s\] and its direction in Galactic (l, b)
/// \[degrees\].
pub const GALACTO_SPEED: f64 = 220e3;
pub const GALACTO_APEX_LB_DEG: (f64, f64) = (90.0, 0.0);

/// Solar motion relative to the Local Group barycentre \[m/s\].
pub const LGROUP_SPEED: f64 = 308e3;
pub const LGROUP_APEX_LB_DEG: (f64, f64) = (105.0, -7.0);

/// Solar motion relative to the cosmic microwave background dipole \[m/s\].
pub const CMB_SPEED: f64 = 369.5e3;
pub const CMB_APEX_LB_DEG: (f64, f64) = (264.4, 48.4);

/// Positions within this range of the Earth's centre are plausibly on the
/// surface \[metres\].
pub const EARTH_SURFACE_RADIUS_RANGE: std::ops::RangeInclusive<f64> = 6.0e6..=7.0e6;

fn site(longitude_deg: f64, latitude_deg: f64, height_metres: f64) -> LatLngHeight {
    LatLngHeight {
        longitude_rad: longitude_deg.to_radians(),
        latitude_rad: latitude_deg.to_radians(),
        height_metres,
    }
}

lazy_static! {
    /// Known observatory positions (WGS84), keyed by upper-case name with
    /// non-alphanumeric characters removed.
    pub static ref SITES: HashMap<&'static str, LatLngHeight> = {
        let mut m = HashMap::new();
        m.insert(
            "MWA",
            LatLngHeight {
                longitude_rad: MWA_LONG_RAD,
                latitude_rad: MWA_LAT_RAD,
                height_metres: MWA_HEIGHT_M,
            },
        );
        m.insert("SKALOW", site(116.7644482, -26.82472208, 377.0));
        m.insert("SKAMID", site(21.4438, -30.7129, 1053.0));
        m.insert("ALMA", site(-67.7552, -23.0234, 5050.0));
        m.insert("VLA", site(-107.6184, 34.0784, 2124.0));
        m.insert("EVLA", site(-107.6184, 34.0784, 2124.0));
        m.insert("ATCA", site(149.5501, -30.3128, 237.0));
        m.insert("ASKAP", site(116.6314, -26.6969, 361.0));
        m.insert("MEERKAT", site(21.4430, -30.7130, 1038.0));
        m.insert("LOFAR", site(6.8689, 52.9153, 15.0));
        m.insert("GMRT", site(74.0497, 19.0919, 650.0));
        m.insert("GBT", site(-79.8398, 38.4331, 807.0));
        m.insert("PARKES", site(148.2635, -32.9984, 415.0));
        m
    };
}

/// Find an observatory by name. Case, spaces and punctuation are ignored.
pub fn lookup_site(name: &str) -> Option<LatLngHeight> {
    let key: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    SITES.get(key.as_str()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_lookup_ignores_case_and_punctuation() {
        let a = lookup_site("SKA-Low").unwrap();
        let b = lookup_site("ska low").unwrap();
        assert_eq!(a.longitude_rad, b.longitude_rad);
        assert!(lookup_site("mwa").is_some());
        assert!(lookup_site("Arecibo").is_none());
        assert!(lookup_site("").is_none());
    }
}
