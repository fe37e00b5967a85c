//! Positional astronomy: where the observer is, where the target is, and how
//! spectral values change between reference frames.
//!
//! The actual astrometry (Earth orientation, Earth ephemeris, coordinate
//! transforms) is delegated to ERFA through [`ErfaAstrometry`]; everything
//! here describes inputs and outputs of that library.

mod erfa;
mod error;
mod fk;

pub use self::erfa::ErfaAstrometry;
pub use error::AstroError;

use std::{fmt::Display, str::FromStr};

use hifitime::{Duration, Epoch};
use marlu::{constants::VEL_C, LatLngHeight, RADec, XyzGeocentric};

/// Spectral reference frames, as known to casacore (`MFrequency`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectralFrame {
    /// The rest frame of the target.
    Rest,
    /// Kinematic local standard of rest.
    Lsrk,
    /// Dynamical local standard of rest.
    Lsrd,
    /// Solar-system barycentre.
    Bary,
    /// Geocentre.
    Geo,
    /// Topocentre, i.e. the telescope.
    Topo,
    /// Galactic centre.
    Galacto,
    /// Local Group barycentre.
    Lgroup,
    /// Cosmic microwave background dipole.
    Cmb,
}

impl SpectralFrame {
    pub const ALL: [SpectralFrame; 9] = [
        SpectralFrame::Rest,
        SpectralFrame::Lsrk,
        SpectralFrame::Lsrd,
        SpectralFrame::Bary,
        SpectralFrame::Geo,
        SpectralFrame::Topo,
        SpectralFrame::Galacto,
        SpectralFrame::Lgroup,
        SpectralFrame::Cmb,
    ];

    /// casacore stores frames as the index of the `MFrequency::Types` enum
    /// (e.g. MEAS_FREQ_REF in a SPECTRAL_WINDOW table).
    pub fn from_casacore_code(code: i32) -> Option<SpectralFrame> {
        usize::try_from(code)
            .ok()
            .and_then(|i| SpectralFrame::ALL.get(i))
            .copied()
    }

    pub fn casacore_code(self) -> i32 {
        SpectralFrame::ALL
            .iter()
            .position(|&f| f == self)
            .expect("all frames are in ALL") as i32
    }
}

impl Display for SpectralFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SpectralFrame::Rest => "REST",
            SpectralFrame::Lsrk => "LSRK",
            SpectralFrame::Lsrd => "LSRD",
            SpectralFrame::Bary => "BARY",
            SpectralFrame::Geo => "GEO",
            SpectralFrame::Topo => "TOPO",
            SpectralFrame::Galacto => "GALACTO",
            SpectralFrame::Lgroup => "LGROUP",
            SpectralFrame::Cmb => "CMB",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SpectralFrame {
    type Err = AstroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "REST" | "SOURCE" => Ok(SpectralFrame::Rest),
            "LSRK" | "LSR" => Ok(SpectralFrame::Lsrk),
            "LSRD" => Ok(SpectralFrame::Lsrd),
            "BARY" | "BARYCENT" => Ok(SpectralFrame::Bary),
            "GEO" | "GEOCENTR" => Ok(SpectralFrame::Geo),
            "TOPO" | "TOPOCENT" => Ok(SpectralFrame::Topo),
            "GALACTO" | "GALACTOC" => Ok(SpectralFrame::Galacto),
            "LGROUP" | "LOCALGRP" => Ok(SpectralFrame::Lgroup),
            "CMB" | "CMBDIPOL" => Ok(SpectralFrame::Cmb),
            _ => Err(AstroError::UnknownSpectralFrame(s.to_string())),
        }
    }
}

/// The reference frame of a celestial direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionFrame {
    Icrs,
    /// FK5 J2000 (treated as ICRS; the frame bias is tens of milliarcseconds).
    J2000,
    /// FK4 B1950.
    B1950,
    /// Galactic (l, b).
    Galactic,
}

impl Display for DirectionFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DirectionFrame::Icrs => "ICRS",
            DirectionFrame::J2000 => "J2000",
            DirectionFrame::B1950 => "B1950",
            DirectionFrame::Galactic => "GALACTIC",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DirectionFrame {
    type Err = AstroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ICRS" => Ok(DirectionFrame::Icrs),
            "J2000" | "FK5" => Ok(DirectionFrame::J2000),
            "B1950" | "B1950_VLA" | "FK4" => Ok(DirectionFrame::B1950),
            "GALACTIC" | "GAL" => Ok(DirectionFrame::Galactic),
            _ => Err(AstroError::UnknownDirectionFrame(s.to_string())),
        }
    }
}

/// How an observer's position on the Earth is specified.
#[derive(Debug, Clone, Copy)]
pub enum ObserverPosition<'a> {
    /// A named observatory.
    Site(&'a str),
    Geodetic(LatLngHeight),
    Geocentric(XyzGeocentric),
}

/// An observer fixed to the Earth, at a particular time.
#[derive(Debug, Clone, Copy)]
pub struct EarthLocation {
    /// ITRF position \[metres\].
    pub geocentric: XyzGeocentric,

    /// The time at which the observer is considered.
    pub obstime: Epoch,

    /// UT1 - UTC.
    pub dut1: Duration,
}

impl EarthLocation {
    pub fn from_geocentric(geocentric: XyzGeocentric, obstime: Epoch, dut1: Duration) -> Self {
        EarthLocation {
            geocentric,
            obstime,
            dut1,
        }
    }

    /// An observer at the centre of the Earth.
    pub fn geocentre(obstime: Epoch) -> Self {
        EarthLocation::from_geocentric(
            XyzGeocentric {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
            obstime,
            Duration::from_seconds(0.0),
        )
    }

    /// Distance from the centre of the Earth \[metres\].
    pub fn radius(&self) -> f64 {
        let XyzGeocentric { x, y, z } = self.geocentric;
        (x * x + y * y + z * z).sqrt()
    }
}

/// A celestial target with its direction in ICRS.
#[derive(Debug, Clone, Copy)]
pub struct SkyTarget {
    /// ICRS direction.
    pub direction: RADec,

    /// The frame the direction was originally given in.
    pub original_frame: DirectionFrame,

    /// Radial velocity, relative to the kinematic LSR \[m/s\]. Positive is
    /// receding.
    pub velocity_ms: f64,

    /// Distance \[metres\]. `None` means effectively infinite.
    pub distance_m: Option<f64>,
}

impl SkyTarget {
    /// Unit vector pointing at the target (ICRS axes).
    pub fn unit_vector(&self) -> [f64; 3] {
        let (s_ra, c_ra) = self.direction.ra.sin_cos();
        let (s_dec, c_dec) = self.direction.dec.sin_cos();
        [c_dec * c_ra, c_dec * s_ra, s_dec]
    }
}

/// The astronomy library used to locate observers and targets and to compute
/// the motion between spectral frames.
pub trait Astrometry: Sync + Send {
    /// Turn a site name or position into an observer at `obstime`.
    fn earth_location(
        &self,
        position: ObserverPosition,
        obstime: Epoch,
        dut1: Duration,
    ) -> Result<EarthLocation, AstroError>;

    /// Express a direction given in `frame` as an ICRS target.
    fn sky_coordinate(
        &self,
        direction: RADec,
        frame: DirectionFrame,
        velocity_ms: f64,
        distance_m: Option<f64>,
        obstime: Epoch,
    ) -> Result<SkyTarget, AstroError>;

    /// The velocity of `observer` relative to `frame` (ICRS axes) \[m/s\].
    fn observer_velocity(
        &self,
        frame: SpectralFrame,
        observer: &EarthLocation,
        target: &SkyTarget,
    ) -> Result<[f64; 3], AstroError>;

    /// Unit vector from the observer to the target (ICRS axes).
    fn line_of_sight(
        &self,
        _observer: &EarthLocation,
        target: &SkyTarget,
    ) -> Result<[f64; 3], AstroError> {
        Ok(target.unit_vector())
    }

    /// The factor by which a frequency measured in `frame` is multiplied to
    /// get the frequency the observer measures: γ(1 + β·n̂).
    fn doppler_factor(
        &self,
        frame: SpectralFrame,
        observer: &EarthLocation,
        target: &SkyTarget,
    ) -> Result<f64, AstroError> {
        if frame == SpectralFrame::Topo {
            return Ok(1.0);
        }
        let v = self.observer_velocity(frame, observer, target)?;
        let beta = v.map(|c| c / VEL_C);
        let beta_sq: f64 = beta.iter().map(|b| b * b).sum();
        if beta_sq >= 1.0 {
            return Err(AstroError::Superluminal {
                frame: frame.to_string(),
                speed_ms: beta_sq.sqrt() * VEL_C,
            });
        }
        let n = self.line_of_sight(observer, target)?;
        let beta_los: f64 = beta.iter().zip(n).map(|(b, n)| b * n).sum();
        let gamma = 1.0 / (1.0 - beta_sq).sqrt();
        Ok(gamma * (1.0 + beta_los))
    }

    /// The ratio that takes a value in frame `from` to frame `to`.
    fn frequency_ratio(
        &self,
        observer: &EarthLocation,
        target: &SkyTarget,
        from: SpectralFrame,
        to: SpectralFrame,
    ) -> Result<f64, AstroError> {
        if from == to {
            return Ok(1.0);
        }
        let d_from = self.doppler_factor(from, observer, target)?;
        let d_to = self.doppler_factor(to, observer, target)?;
        Ok(d_from / d_to)
    }

    /// Re-express a single frequency from frame `from` in frame `to`.
    fn transform(
        &self,
        value: f64,
        observer: &EarthLocation,
        target: &SkyTarget,
        from: SpectralFrame,
        to: SpectralFrame,
    ) -> Result<f64, AstroError> {
        Ok(value * self.frequency_ratio(observer, target, from, to)?)
    }
}
