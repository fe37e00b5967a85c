//! The reference time of an observation.

use hifitime::{Epoch, J1900_OFFSET, SECONDS_PER_DAY};
use log::{debug, warn};

use super::{Rejections, Resolved};
use crate::read::{keys, Partition};

/// casacore stores times as UTC MJD seconds.
pub fn epoch_from_mjd_seconds(mjd_seconds: f64) -> Epoch {
    Epoch::from_utc_seconds(mjd_seconds - J1900_OFFSET * SECONDS_PER_DAY)
}

/// The current time, according to the system clock. A clock that can't be
/// read (e.g. one set before 1970) gives the Unix epoch, with a warning.
pub fn wall_clock_now() -> Epoch {
    Epoch::now().unwrap_or_else(|e| {
        warn!("Couldn't read the system clock ({e}); using 1970-01-01");
        Epoch::from_unix_seconds(0.0)
    })
}

fn mjd_seconds(
    global: &Partition,
    key: &'static str,
    rejections: &mut Rejections,
) -> Option<Resolved<Epoch>> {
    let first = match global.get_floats(key) {
        Some(a) => a.iter().next().copied(),
        None => global.get_f64(key),
    };
    match first {
        Some(s) if s.is_finite() && s > 0.0 => {
            let epoch = epoch_from_mjd_seconds(s);
            debug!("Reference time from {key}: {epoch}");
            Some(Resolved::found(epoch, key))
        }
        Some(s) => {
            rejections.push(format!("{key} ({s}) is not a valid MJD in seconds"));
            None
        }
        None if global.attrs.contains_key(key) || global.data_vars.contains_key(key) => {
            rejections.push(format!("{key} is not numeric"));
            None
        }
        None => None,
    }
}

fn date_string(global: &Partition, rejections: &mut Rejections) -> Option<Resolved<Epoch>> {
    let date = global.get_str(keys::DATE)?.trim();
    // A bare date is midnight.
    let parsed = if date.contains('T') || date.contains(' ') {
        Epoch::from_gregorian_str(date)
    } else {
        Epoch::from_gregorian_str(&format!("{date}T00:00:00"))
    };
    match parsed {
        Ok(epoch) => {
            debug!("Reference time from {}: {epoch}", keys::DATE);
            Some(Resolved::found(epoch, keys::DATE))
        }
        Err(e) => {
            rejections.push(format!("couldn't parse {} '{date}': {e}", keys::DATE));
            None
        }
    }
}

/// The reference time of the observation. In order of preference, this is
/// the start of `OBS_TIME_RANGE`, the first `TIME`, or `OBS_DATE`. Without
/// any of those, `now` is used.
pub fn reference_time(global: &Partition, now: Epoch) -> Resolved<Epoch> {
    let mut rejections = Rejections::default();
    mjd_seconds(global, keys::TIME_RANGE, &mut rejections)
        .or_else(|| mjd_seconds(global, keys::TIME, &mut rejections))
        .or_else(|| date_string(global, &mut rejections))
        .unwrap_or_else(|| {
            Resolved::defaulted(
                now,
                "reference time (the current time)",
                rejections.into_reason("no observation time in the metadata"),
            )
        })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::prelude::*;

    use super::*;
    use crate::read::PartitionKey;

    fn assert_same_time(a: Epoch, b: Epoch) {
        assert!((a - b).to_seconds().abs() < 1e-6, "{a} != {b}");
    }

    fn now() -> Epoch {
        Epoch::from_gregorian_utc_at_midnight(2030, 1, 1)
    }

    #[test]
    fn mjd_seconds_conversion() {
        // MJD 60000 is 2023-02-25.
        let epoch = epoch_from_mjd_seconds(60000.0 * 86400.0);
        assert_same_time(epoch, Epoch::from_gregorian_utc_at_midnight(2023, 2, 25));
        assert_abs_diff_eq!(epoch.to_mjd_utc_days(), 60000.0, epsilon = 1e-9);
    }

    #[test]
    fn time_range_is_preferred() {
        let global = Partition::new(PartitionKey::Global)
            .with_attr(keys::TIME_RANGE, vec![60000.0 * 86400.0, 60000.5 * 86400.0])
            .with_attr(keys::TIME, 60001.0 * 86400.0)
            .with_attr(keys::DATE, "2023-03-01");
        let time = reference_time(&global, now());
        assert_eq!(time.key(), Some(keys::TIME_RANGE));
        assert_same_time(*time.value(), Epoch::from_gregorian_utc_at_midnight(2023, 2, 25));
    }

    #[test]
    fn falls_through_malformed_entries() {
        let global = Partition::new(PartitionKey::Global)
            .with_attr(keys::TIME_RANGE, vec![f64::NAN, 0.0])
            .with_var(keys::TIME, &["row"], array![60001.0 * 86400.0].into_dyn())
            .unwrap();
        let time = reference_time(&global, now());
        assert_eq!(time.key(), Some(keys::TIME));
        assert_same_time(*time.value(), Epoch::from_gregorian_utc_at_midnight(2023, 2, 26));
    }

    #[test]
    fn dates_are_parsed() {
        let global = Partition::new(PartitionKey::Global).with_attr(keys::DATE, "2013-08-23");
        let time = reference_time(&global, now());
        assert_eq!(time.key(), Some(keys::DATE));
        assert_same_time(*time.value(), Epoch::from_gregorian_utc_at_midnight(2013, 8, 23));

        let global =
            Partition::new(PartitionKey::Global).with_attr(keys::DATE, "2013-08-23T17:54:08");
        let time = reference_time(&global, now());
        assert_same_time(*time.value(), Epoch::from_gregorian_utc_hms(2013, 8, 23, 17, 54, 8));
    }

    #[test]
    fn missing_time_uses_now() {
        let global = Partition::new(PartitionKey::Global);
        let time = reference_time(&global, now());
        assert!(time.is_defaulted());
        assert_eq!(*time.value(), now());

        let global = Partition::new(PartitionKey::Global)
            .with_attr(keys::TIME, "yesterday")
            .with_attr(keys::DATE, "not a date");
        match reference_time(&global, now()) {
            Resolved::Defaulted { value, reason } => {
                assert_eq!(value, now());
                assert!(reason.contains(keys::TIME), "{reason}");
                assert!(reason.contains(keys::DATE), "{reason}");
            }
            r => panic!("expected a default, got {r:?}"),
        }
    }

    #[test]
    fn wall_clock_is_recent() {
        assert!(wall_clock_now() > Epoch::from_gregorian_utc_at_midnight(2020, 1, 1));
    }
}
