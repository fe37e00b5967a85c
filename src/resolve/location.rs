//! The observer's location.

use hifitime::{Duration, Epoch};
use log::debug;
use marlu::XyzGeocentric;
use ndarray::prelude::*;

use super::{Rejections, Resolved};
use crate::{
    astro::{Astrometry, EarthLocation, ObserverPosition},
    constants::EARTH_SURFACE_RADIUS_RANGE,
    read::{keys, Partition},
};

/// The mean of antenna positions given as an (n, 3) array of geocentric
/// coordinates \[metres\]. A flat array of length 3 is a single antenna.
fn antenna_centroid(positions: ArrayViewD<f64>) -> Result<XyzGeocentric, String> {
    let positions = match positions.ndim() {
        1 if positions.len() == 3 => positions.into_shape_with_order((1, 3)),
        2 if positions.len_of(Axis(1)) == 3 => positions.into_dimensionality::<Ix2>(),
        _ => {
            return Err(format!(
                "{} has shape {:?}, not (n, 3)",
                keys::ANT_POSITION,
                positions.shape()
            ))
        }
    }
    .map_err(|e| format!("{}: {e}", keys::ANT_POSITION))?;

    let num_antennas = positions.len_of(Axis(0));
    if num_antennas == 0 {
        return Err(format!("{} is empty", keys::ANT_POSITION));
    }
    if positions.iter().any(|p| !p.is_finite()) {
        return Err(format!("{} has non-finite values", keys::ANT_POSITION));
    }

    let mut sum = [0.0; 3];
    for position in positions.outer_iter() {
        for (s, p) in sum.iter_mut().zip(position.iter()) {
            *s += p;
        }
    }
    let [x, y, z] = sum.map(|s| s / num_antennas as f64);
    let radius = (x * x + y * y + z * z).sqrt();
    if !EARTH_SURFACE_RADIUS_RANGE.contains(&radius) {
        return Err(format!(
            "the centroid of {} is {:.0} m from the centre of the Earth",
            keys::ANT_POSITION,
            radius
        ));
    }
    Ok(XyzGeocentric { x, y, z })
}

/// Where the observation was made. In order of preference, this is the
/// known position of `OBS_TELESCOPE_NAME`, or the centroid of
/// `ANT_POSITION`. Without either, `default_site` is used if given (and
/// known), and otherwise the centre of the Earth.
pub fn reference_location(
    global: &Partition,
    time: Epoch,
    dut1: Duration,
    default_site: Option<&str>,
    astrometry: &dyn Astrometry,
) -> Resolved<EarthLocation> {
    let mut rejections = Rejections::default();

    if let Some(name) = global.get_str(keys::TELESCOPE_NAME) {
        match astrometry.earth_location(ObserverPosition::Site(name), time, dut1) {
            Ok(location) => {
                debug!("Observer is the {name} site: {:?}", location.geocentric);
                return Resolved::found(location, keys::TELESCOPE_NAME);
            }
            Err(e) => rejections.push(format!("{}: {e}", keys::TELESCOPE_NAME)),
        }
    }

    if let Some(positions) = global.get_floats(keys::ANT_POSITION) {
        match antenna_centroid(positions) {
            Ok(xyz) => {
                debug!("Observer is the antenna centroid: {xyz:?}");
                return Resolved::found(
                    EarthLocation::from_geocentric(xyz, time, dut1),
                    keys::ANT_POSITION,
                );
            }
            Err(e) => rejections.push(e),
        }
    }

    let reason = rejections.into_reason("no telescope name or antenna positions in the metadata");
    let geocentre = EarthLocation {
        dut1,
        ..EarthLocation::geocentre(time)
    };
    match default_site.map(|site| {
        (
            site,
            astrometry.earth_location(ObserverPosition::Site(site), time, dut1),
        )
    }) {
        Some((site, Ok(location))) => {
            Resolved::defaulted(location, &format!("observer ({site})"), reason)
        }
        Some((_, Err(e))) => Resolved::defaulted(
            geocentre,
            "observer (the geocentre)",
            format!("{reason}; default site: {e}"),
        ),
        None => Resolved::defaulted(geocentre, "observer (the geocentre)", reason),
    }
}
