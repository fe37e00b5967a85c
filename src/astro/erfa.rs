//! The ERFA-backed [`Astrometry`] implementation.

use hifitime::{Duration, Epoch};
use log::{trace, warn};
use marlu::{
    erfa::{
        constants::{ERFA_DAU, ERFA_DAYSEC, ERFA_DJM0},
        earth::position_velocity_00,
        prenut::pn_matrix_06a,
        time::gmst06,
        transform::{geocentric_to_geodetic, geodetic_to_geocentric, spherical_to_cartesian},
        Ellipsoid,
    },
    LatLngHeight, RADec, XyzGeocentric,
};

use super::{
    fk::{besselian_epoch, fk4_to_fk5_no_pm, galactic_to_icrs},
    AstroError, Astrometry, DirectionFrame, EarthLocation, ObserverPosition, SkyTarget,
    SpectralFrame,
};
use crate::constants::*;

/// Astrometry computed with ERFA (IAU 2006/2000A precession-nutation,
/// VSOP2000-derived Earth ephemeris).
#[derive(Debug, Clone, Copy, Default)]
pub struct ErfaAstrometry;

impl EarthLocation {
    /// Locate an observer from WGS84 geodetic coordinates.
    pub fn from_geodetic(
        lat_lng_height: LatLngHeight,
        obstime: Epoch,
        dut1: Duration,
    ) -> Result<EarthLocation, AstroError> {
        let geocentric_vector = geodetic_to_geocentric(
            Ellipsoid::WGS84,
            lat_lng_height.longitude_rad,
            lat_lng_height.latitude_rad,
            lat_lng_height.height_metres,
        )?;
        Ok(EarthLocation::from_geocentric(
            XyzGeocentric {
                x: geocentric_vector[0],
                y: geocentric_vector[1],
                z: geocentric_vector[2],
            },
            obstime,
            dut1,
        ))
    }

    /// The WGS84 geodetic coordinates of this observer.
    pub fn to_geodetic(&self) -> LatLngHeight {
        let [longitude_rad, latitude_rad, height_metres] = geocentric_to_geodetic(
            Ellipsoid::WGS84,
            [self.geocentric.x, self.geocentric.y, self.geocentric.z],
        );
        LatLngHeight {
            longitude_rad,
            latitude_rad,
            height_metres,
        }
    }
}

/// TT as a two-part Julian date for ERFA.
fn jd_tt(epoch: Epoch) -> (f64, f64) {
    (ERFA_DJM0, epoch.to_jde_tt_days() - ERFA_DJM0)
}

fn jd_tdb(epoch: Epoch) -> (f64, f64) {
    (ERFA_DJM0, epoch.to_jde_tdb_days() - ERFA_DJM0)
}

fn mjd_ut1(epoch: Epoch, dut1: Duration) -> f64 {
    epoch.to_mjd_utc_days() + dut1.to_seconds() / ERFA_DAYSEC
}

fn unit_vector(ra: f64, dec: f64) -> [f64; 3] {
    spherical_to_cartesian(ra, dec)
}

/// ICRS unit vector of a Galactic (l, b) direction given in degrees.
fn galactic_unit_vector((l_deg, b_deg): (f64, f64)) -> [f64; 3] {
    let (ra, dec) = galactic_to_icrs(l_deg.to_radians(), b_deg.to_radians());
    unit_vector(ra, dec)
}

fn scaled(v: [f64; 3], s: f64) -> [f64; 3] {
    v.map(|c| c * s)
}

fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

impl ErfaAstrometry {
    /// Velocity of the observer due to the rotation of the Earth, in GCRS
    /// axes \[m/s\].
    pub fn rotational_velocity(&self, observer: &EarthLocation) -> [f64; 3] {
        let XyzGeocentric { x, y, z: _ } = observer.geocentric;
        if x == 0.0 && y == 0.0 {
            return [0.0; 3];
        }

        let (tt1, tt2) = jd_tt(observer.obstime);
        let ut1 = mjd_ut1(observer.obstime, observer.dut1);
        let gmst = gmst06(ERFA_DJM0, ut1, tt1, tt2);

        // Rotate the terrestrial position into true-of-date axes, then take
        // ω × r.
        let (s, c) = gmst.sin_cos();
        let x_tod = x * c - y * s;
        let y_tod = x * s + y * c;
        let v_tod = [
            -EARTH_ROTATION_RATE * y_tod,
            EARTH_ROTATION_RATE * x_tod,
            0.0,
        ];

        // v(true) = rbpn * v(GCRS), so apply the transpose.
        let rbpn = pn_matrix_06a(tt1, tt2);
        let mut v_gcrs = [0.0; 3];
        for (i, v) in v_gcrs.iter_mut().enumerate() {
            *v = (0..3).map(|j| rbpn[j][i] * v_tod[j]).sum();
        }
        v_gcrs
    }

    /// Barycentric position \[m\] and velocity \[m/s\] of the geocentre (BCRS
    /// axes).
    pub fn earth_barycentric(&self, obstime: Epoch) -> ([f64; 3], [f64; 3]) {
        let (tdb1, tdb2) = jd_tdb(obstime);
        let (outside_range, _, pvb) = position_velocity_00(tdb1, tdb2);
        if outside_range {
            warn!("{obstime} is outside the range of the ERFA Earth ephemeris (1900-2100 AD); accuracy is reduced");
        }
        (
            scaled(pvb[0], ERFA_DAU),
            scaled(pvb[1], ERFA_DAU / ERFA_DAYSEC),
        )
    }
}

impl Astrometry for ErfaAstrometry {
    fn earth_location(
        &self,
        position: ObserverPosition,
        obstime: Epoch,
        dut1: Duration,
    ) -> Result<EarthLocation, AstroError> {
        match position {
            ObserverPosition::Site(name) => {
                let site =
                    lookup_site(name).ok_or_else(|| AstroError::UnknownSite(name.to_string()))?;
                EarthLocation::from_geodetic(site, obstime, dut1)
            }
            ObserverPosition::Geodetic(lat_lng_height) => {
                EarthLocation::from_geodetic(lat_lng_height, obstime, dut1)
            }
            ObserverPosition::Geocentric(xyz) => {
                Ok(EarthLocation::from_geocentric(xyz, obstime, dut1))
            }
        }
    }

    fn sky_coordinate(
        &self,
        direction: RADec,
        frame: DirectionFrame,
        velocity_ms: f64,
        distance_m: Option<f64>,
        obstime: Epoch,
    ) -> Result<SkyTarget, AstroError> {
        let icrs = match frame {
            DirectionFrame::Icrs | DirectionFrame::J2000 => direction,
            DirectionFrame::B1950 => {
                let (tt1, tt2) = jd_tt(obstime);
                let bepoch = besselian_epoch(tt1, tt2);
                let (ra, dec) = fk4_to_fk5_no_pm(direction.ra, direction.dec, bepoch);
                RADec::from_radians(ra, dec)
            }
            DirectionFrame::Galactic => {
                let (ra, dec) = galactic_to_icrs(direction.ra, direction.dec);
                RADec::from_radians(ra, dec)
            }
        };
        trace!(
            "{frame} ({:.6}°, {:.6}°) is ICRS ({:.6}°, {:.6}°)",
            direction.ra.to_degrees(),
            direction.dec.to_degrees(),
            icrs.ra.to_degrees(),
            icrs.dec.to_degrees()
        );
        Ok(SkyTarget {
            direction: icrs,
            original_frame: frame,
            velocity_ms,
            distance_m,
        })
    }

    fn observer_velocity(
        &self,
        frame: SpectralFrame,
        observer: &EarthLocation,
        target: &SkyTarget,
    ) -> Result<[f64; 3], AstroError> {
        let geo = || self.rotational_velocity(observer);
        let bary = || add(geo(), self.earth_barycentric(observer.obstime).1);
        let lsrk = || {
            add(
                bary(),
                scaled(
                    unit_vector(
                        LSRK_APEX_RA_DEG.to_radians(),
                        LSRK_APEX_DEC_DEG.to_radians(),
                    ),
                    LSRK_SPEED,
                ),
            )
        };
        let lsrd = || {
            add(
                bary(),
                scaled(galactic_unit_vector(LSRD_APEX_LB_DEG), LSRD_SPEED),
            )
        };

        let v = match frame {
            SpectralFrame::Topo => [0.0; 3],
            SpectralFrame::Geo => geo(),
            SpectralFrame::Bary => bary(),
            SpectralFrame::Lsrk => lsrk(),
            SpectralFrame::Lsrd => lsrd(),
            SpectralFrame::Galacto => add(
                lsrd(),
                scaled(galactic_unit_vector(GALACTO_APEX_LB_DEG), GALACTO_SPEED),
            ),
            SpectralFrame::Lgroup => add(
                bary(),
                scaled(galactic_unit_vector(LGROUP_APEX_LB_DEG), LGROUP_SPEED),
            ),
            SpectralFrame::Cmb => add(
                bary(),
                scaled(galactic_unit_vector(CMB_APEX_LB_DEG), CMB_SPEED),
            ),
            // The target's radial velocity is relative to the kinematic LSR.
            SpectralFrame::Rest => add(
                lsrk(),
                scaled(target.unit_vector(), -target.velocity_ms),
            ),
        };
        Ok(v)
    }

    fn line_of_sight(
        &self,
        observer: &EarthLocation,
        target: &SkyTarget,
    ) -> Result<[f64; 3], AstroError> {
        let n = target.unit_vector();
        let distance = match target.distance_m {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => return Ok(n),
        };

        // The direction is barycentric; look from the geocentre instead. The
        // observer's offset from the geocentre is below a milliarcsecond for
        // anything beyond the Moon, so it is not included.
        let (earth_position, _) = self.earth_barycentric(observer.obstime);
        let p = add(scaled(n, distance), scaled(earth_position, -1.0));
        let norm = p.iter().map(|c| c * c).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Ok(n);
        }
        Ok(scaled(p, 1.0 / norm))
    }
}
