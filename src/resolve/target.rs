//! The celestial target.

use log::debug;
use marlu::RADec;

use super::{Rejections, Resolved};
use crate::{
    astro::DirectionFrame,
    read::{keys, Partition},
};

/// The target as described by the metadata. Each field is resolved on its
/// own, so a target can mix values from the metadata with defaults; see
/// [`TargetLocation::is_consistent`].
#[derive(Debug, Clone, PartialEq)]
pub struct TargetLocation {
    /// The direction, in `frame` \[radians\].
    pub direction: Resolved<(f64, f64)>,

    pub frame: Resolved<DirectionFrame>,

    /// Radial velocity relative to the kinematic LSR \[m/s\].
    pub velocity_ms: Resolved<f64>,

    /// Distance \[metres\], `None` being infinitely far away.
    pub distance_m: Resolved<Option<f64>>,
}

impl TargetLocation {
    pub fn radec(&self) -> RADec {
        let (ra, dec) = *self.direction.value();
        RADec::from_radians(ra, dec)
    }

    /// Whether the direction, its frame and the velocity all came from the
    /// metadata. Distance doesn't count; measurement sets and uvfits files
    /// have nowhere to put it, and infinitely far away is the usual case.
    pub fn is_consistent(&self) -> bool {
        !(self.direction.is_defaulted()
            || self.frame.is_defaulted()
            || self.velocity_ms.is_defaulted())
    }

    /// The names of the fields that were defaulted.
    pub fn defaulted_fields(&self) -> Vec<&'static str> {
        [
            ("direction", self.direction.is_defaulted()),
            ("frame", self.frame.is_defaulted()),
            ("velocity", self.velocity_ms.is_defaulted()),
            ("distance", self.distance_m.is_defaulted()),
        ]
        .into_iter()
        .filter_map(|(name, defaulted)| defaulted.then_some(name))
        .collect()
    }
}

fn direction(global: &Partition) -> Resolved<(f64, f64)> {
    let mut rejections = Rejections::default();
    for key in [keys::PHASE_DIR, keys::SRC_DIRECTION] {
        let Some(values) = global.get_floats(key) else {
            continue;
        };
        // casacore direction columns are (1, 1, 2) or (2,); either way the
        // last axis is (RA, Dec).
        let mut iter = values.iter().copied();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(ra), Some(dec), None) if ra.is_finite() && dec.is_finite() => {
                debug!(
                    "Target direction from {key}: ({:.6}°, {:.6}°)",
                    ra.to_degrees(),
                    dec.to_degrees()
                );
                return Resolved::found((ra, dec), key);
            }
            (_, _, None) => rejections.push(format!("{key} isn't two finite numbers")),
            _ => rejections.push(format!(
                "{key} has {} values, not two (multiple fields aren't supported)",
                values.len()
            )),
        }
    }
    Resolved::defaulted(
        (0.0, 0.0),
        "target direction (RA 0, Dec 0)",
        rejections.into_reason("no phase centre or source direction in the metadata"),
    )
}

fn frame(global: &Partition) -> Resolved<DirectionFrame> {
    let reason = match global.get_str(keys::DIRECTION_REF) {
        Some(label) => match label.parse::<DirectionFrame>() {
            Ok(frame) => return Resolved::found(frame, keys::DIRECTION_REF),
            Err(e) => e.to_string(),
        },
        None => format!("no {}", keys::DIRECTION_REF),
    };
    Resolved::defaulted(DirectionFrame::Icrs, "direction frame (ICRS)", reason)
}

fn velocity(global: &Partition) -> Resolved<f64> {
    let first = match global.get_floats(keys::SRC_SYSVEL) {
        Some(a) => a.iter().next().copied(),
        None => global.get_f64(keys::SRC_SYSVEL),
    };
    let reason = match first {
        Some(v) if v.is_finite() => return Resolved::found(v, keys::SRC_SYSVEL),
        Some(v) => format!("{} is {v}", keys::SRC_SYSVEL),
        None => format!("no usable {}", keys::SRC_SYSVEL),
    };
    Resolved::defaulted(0.0, "target velocity (0 m/s)", reason)
}

fn distance(global: &Partition) -> Resolved<Option<f64>> {
    let reason = match global.get_f64(keys::SRC_DISTANCE) {
        Some(d) if d.is_finite() && d > 0.0 => {
            return Resolved::found(Some(d), keys::SRC_DISTANCE)
        }
        Some(d) => format!("{} is {d}", keys::SRC_DISTANCE),
        None => format!("no {}", keys::SRC_DISTANCE),
    };
    // Not knowing the distance is normal, so don't warn about it.
    debug!("Target is infinitely far away: {reason}");
    Resolved::Defaulted {
        value: None,
        reason,
    }
}

/// What the metadata says about the target. Each field falls back to its
/// own default: RA 0 and Dec 0, ICRS, not moving, infinitely far away.
pub fn target_location(global: &Partition) -> TargetLocation {
    TargetLocation {
        direction: direction(global),
        frame: frame(global),
        velocity_ms: velocity(global),
        distance_m: distance(global),
    }
}

#[cfg(test)]
mod tests {
    use ndarray::prelude::*;

    use super::*;
    use crate::read::PartitionKey;

    fn complete() -> Partition {
        Partition::new(PartitionKey::Global)
            .with_var(
                keys::PHASE_DIR,
                &["field", "poly", "dir"],
                array![[[0.0_f64.to_radians(), (-27.0_f64).to_radians()]]].into_dyn(),
            )
            .unwrap()
            .with_attr(keys::DIRECTION_REF, "J2000")
            .with_attr(keys::SRC_SYSVEL, vec![1500.0])
            .with_attr(keys::SRC_DISTANCE, 3.1e22)
    }

    #[test]
    fn complete_metadata_isnt_defaulted() {
        let target = target_location(&complete());
        assert!(target.is_consistent());
        assert!(target.defaulted_fields().is_empty());
        assert_eq!(target.direction.key(), Some(keys::PHASE_DIR));
        assert_eq!(*target.frame.value(), DirectionFrame::J2000);
        assert_eq!(*target.velocity_ms.value(), 1500.0);
        assert_eq!(*target.distance_m.value(), Some(3.1e22));
        assert_eq!(target.radec().dec, (-27.0_f64).to_radians());
    }

    #[test]
    fn source_direction_is_a_fallback() {
        let global = Partition::new(PartitionKey::Global)
            .with_attr(keys::PHASE_DIR, vec![1.0, 2.0, 3.0, 4.0])
            .with_attr(keys::SRC_DIRECTION, vec![0.5, -0.5]);
        let target = target_location(&global);
        assert_eq!(target.direction.key(), Some(keys::SRC_DIRECTION));
        assert_eq!(*target.direction.value(), (0.5, -0.5));
    }

    #[test]
    fn fields_default_independently() {
        let global = Partition::new(PartitionKey::Global)
            .with_attr(keys::PHASE_DIR, vec![0.1, f64::NAN])
            .with_attr(keys::DIRECTION_REF, "AZEL")
            .with_attr(keys::SRC_SYSVEL, 250.0);
        let target = target_location(&global);
        assert!(!target.is_consistent());
        assert_eq!(target.defaulted_fields(), vec!["direction", "frame", "distance"]);
        assert_eq!(*target.direction.value(), (0.0, 0.0));
        assert_eq!(*target.frame.value(), DirectionFrame::Icrs);
        assert_eq!(target.velocity_ms.key(), Some(keys::SRC_SYSVEL));
        assert_eq!(*target.distance_m.value(), None);
    }

    #[test]
    fn empty_metadata_uses_every_default() {
        let target = target_location(&Partition::new(PartitionKey::Global));
        assert_eq!(
            target.defaulted_fields(),
            vec!["direction", "frame", "velocity", "distance"]
        );
        assert_eq!(*target.velocity_ms.value(), 0.0);
    }

    #[test]
    fn missing_distance_is_still_consistent() {
        let mut global = complete();
        global.attrs.shift_remove(keys::SRC_DISTANCE);
        let target = target_location(&global);
        assert!(target.distance_m.is_defaulted());
        assert!(target.is_consistent());

        global.attrs.shift_remove(keys::SRC_SYSVEL);
        assert!(!target_location(&global).is_consistent());
    }
}
