//! Convert the spectral values of a partition into another reference frame.

mod error;

pub use error::ConvertError;

use hifitime::{Duration, Epoch};
use log::{debug, info, warn};
use ndarray::prelude::*;

use crate::{
    astro::{Astrometry, EarthLocation, SpectralFrame},
    chunks::map_over_chunks,
    frame::{change_frame, FrameChange},
    read::{keys, DataVar, DatasetRead, Partition, PartitionKey},
    resolve::{
        reference_location, reference_time, target_location, wall_clock_now, Resolved,
        TargetLocation,
    },
};

/// The default number of channels handled by each parallel task.
pub const DEFAULT_CHUNK_LEN: usize = 1024;

/// What to do with a target whose fields don't all come from the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetPolicy {
    /// Fill in each missing field with its default, with a warning.
    #[default]
    IndependentDefaults,

    /// Refuse to convert.
    RequireConsistent,
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// The frame to convert into.
    pub to_frame: SpectralFrame,

    /// The frame the values are in. If this isn't given, the partition's
    /// `MEAS_FREQ_REF` is used, and failing that, TOPO.
    pub from_frame: Option<SpectralFrame>,

    /// The data variable to convert.
    pub variable: String,

    /// How many elements along the channel axis each parallel task gets.
    pub chunk_len: usize,

    /// The observatory to assume if the metadata doesn't say where the
    /// observation was made.
    pub default_site: Option<String>,

    /// UT1 - UTC.
    pub dut1: Duration,

    pub target_policy: TargetPolicy,

    /// Use this instead of the system clock if the metadata has no time.
    pub now: Option<Epoch>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            to_frame: SpectralFrame::Lsrk,
            from_frame: None,
            variable: keys::CHAN_FREQ.to_string(),
            chunk_len: DEFAULT_CHUNK_LEN,
            default_site: None,
            dut1: Duration::from_seconds(0.0),
            target_policy: TargetPolicy::default(),
            now: None,
        }
    }
}

impl ConvertOptions {
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.chunk_len == 0 {
            return Err(ConvertError::InvalidOption(
                "the chunk length must be at least 1".to_string(),
            ));
        }
        if self.variable.is_empty() {
            return Err(ConvertError::InvalidOption(
                "no data variable was named".to_string(),
            ));
        }
        let dut1 = self.dut1.to_seconds();
        if !dut1.is_finite() || dut1.abs() > 1.0 {
            return Err(ConvertError::InvalidOption(format!(
                "DUT1 must be within a second, not {dut1} s"
            )));
        }
        Ok(())
    }
}

/// How each input to a conversion was worked out.
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub time: Resolved<Epoch>,
    pub location: Resolved<EarthLocation>,
    pub target: TargetLocation,
    pub from_frame: Resolved<SpectralFrame>,
}

impl ResolvedContext {
    /// The names of the inputs that fell back to defaults.
    pub fn defaulted(&self) -> Vec<&'static str> {
        let mut defaulted = vec![];
        if self.time.is_defaulted() {
            defaulted.push("time");
        }
        if self.location.is_defaulted() {
            defaulted.push("location");
        }
        defaulted.extend(
            self.target
                .defaulted_fields()
                .into_iter()
                .filter(|&f| f != "distance")
                .map(|f| match f {
                    "direction" => "target direction",
                    "frame" => "target frame",
                    _ => "target velocity",
                }),
        );
        if self.from_frame.is_defaulted() {
            defaulted.push("source frame");
        }
        defaulted
    }
}

/// A converted partition.
#[derive(Debug, Clone)]
pub struct Converted {
    pub partition: Partition,
    pub context: ResolvedContext,

    /// The frame the values are now in.
    pub to_frame: SpectralFrame,

    /// The factor that was applied to every value.
    pub ratio: f64,
}

/// `MEAS_FREQ_REF` describes the channel frequencies (and their widths). Any
/// other variable carries its own frame label once it has been converted.
fn describes_frequency_axis(variable: &str) -> bool {
    variable == keys::CHAN_FREQ
}

fn variable_frame_attr(variable: &str) -> String {
    format!("{variable}{}", keys::VARIABLE_FRAME_SUFFIX)
}

fn source_frame(partition: &Partition, options: &ConvertOptions) -> Resolved<SpectralFrame> {
    if let Some(frame) = options.from_frame {
        return Resolved::given(frame);
    }

    let mut reasons = vec![];
    if !describes_frequency_axis(&options.variable) {
        let attr = variable_frame_attr(&options.variable);
        if let Some(label) = partition.get_str(&attr) {
            match label.parse() {
                Ok(frame) => return Resolved::found(frame, keys::VARIABLE_FRAME_SUFFIX),
                Err(e) => reasons.push(format!("{attr}: {e}")),
            }
        }
    }
    match partition.get_str(keys::MEAS_FREQ_REF) {
        Some(label) => match label.parse() {
            Ok(frame) => return Resolved::found(frame, keys::MEAS_FREQ_REF),
            Err(e) => reasons.push(format!("{e}")),
        },
        None => reasons.push(format!("{} has no {}", partition.key, keys::MEAS_FREQ_REF)),
    }
    Resolved::defaulted(SpectralFrame::Topo, "source frame (TOPO)", reasons.join("; "))
}

/// Change the frame of every value of `var`, in chunks along its channel
/// dimension (or its first axis).
fn convert_var(
    var: &DataVar,
    change: &FrameChange,
    chunk_len: usize,
) -> Result<ArrayD<f64>, ConvertError> {
    if var.values.ndim() == 0 {
        return Ok(change_frame(var.values.view(), change));
    }
    let axis = var.axis_of(keys::CHAN_DIM).unwrap_or(Axis(0));
    let converted = map_over_chunks(
        |chunk| change_frame(chunk, change),
        var.values.view(),
        axis,
        chunk_len,
    )?;
    Ok(converted)
}

/// Convert a partition that has already been read, using `global` for the
/// observation-wide metadata.
pub fn convert_with_global(
    partition: &Partition,
    global: &Partition,
    astrometry: &dyn Astrometry,
    options: &ConvertOptions,
) -> Result<Converted, ConvertError> {
    options.validate()?;
    if partition.key == PartitionKey::Global {
        return Err(ConvertError::GlobalPartition);
    }
    if !partition.data_vars.contains_key(&options.variable) {
        return Err(ConvertError::MissingVariable {
            key: partition.key,
            variable: options.variable.clone(),
        });
    }

    let now = options.now.unwrap_or_else(wall_clock_now);
    let time = reference_time(global, now);
    let location = reference_location(
        global,
        *time.value(),
        options.dut1,
        options.default_site.as_deref(),
        astrometry,
    );
    let target = target_location(global);
    if !target.is_consistent() {
        let defaulted = target.defaulted_fields().join(", ");
        match options.target_policy {
            TargetPolicy::RequireConsistent => {
                return Err(ConvertError::InconsistentTarget { defaulted })
            }
            TargetPolicy::IndependentDefaults => {
                warn!("The target mixes metadata with defaults ({defaulted})")
            }
        }
    }
    let sky_target = astrometry.sky_coordinate(
        target.radec(),
        *target.frame.value(),
        *target.velocity_ms.value(),
        *target.distance_m.value(),
        *time.value(),
    )?;
    let from_frame = source_frame(partition, options);

    let change = FrameChange::new(
        astrometry,
        location.value(),
        &sky_target,
        *from_frame.value(),
        options.to_frame,
    )?;
    let mut out = partition.clone();
    let mut converted_vars = vec![options.variable.as_str()];
    if describes_frequency_axis(&options.variable) {
        // Channel widths scale with the frequencies; keep them in the same
        // frame so MEAS_FREQ_REF describes both.
        if partition.data_vars.contains_key(keys::CHAN_WIDTH) {
            converted_vars.push(keys::CHAN_WIDTH);
        }
        out = out.with_attr(keys::MEAS_FREQ_REF, options.to_frame.to_string());
    } else {
        out = out.with_attr(
            &variable_frame_attr(&options.variable),
            options.to_frame.to_string(),
        );
    }
    for name in converted_vars {
        if let Some(out_var) = out.data_vars.get_mut(name) {
            out_var.values = convert_var(&partition.data_vars[name], &change, options.chunk_len)?;
        }
    }

    let xyz = location.value().geocentric;
    out = out
        .with_attr(keys::FRAME_CONVERSION_FROM, from_frame.value().to_string())
        .with_attr(keys::REFERENCE_TIME, time.value().to_string())
        .with_attr(keys::REFERENCE_LOCATION, vec![xyz.x, xyz.y, xyz.z])
        .with_attr(
            keys::TARGET_DIRECTION,
            vec![sky_target.direction.ra, sky_target.direction.dec],
        )
        .with_attr(keys::DOPPLER_RATIO, change.ratio());
    debug!(
        "Converted {} of {} from {} to {} (ratio {})",
        options.variable,
        partition.key,
        from_frame.value(),
        options.to_frame,
        change.ratio()
    );

    Ok(Converted {
        partition: out,
        context: ResolvedContext {
            time,
            location,
            target,
            from_frame,
        },
        to_frame: options.to_frame,
        ratio: change.ratio(),
    })
}

/// Read the partition `key` and the global partition from `dataset`, and
/// convert the partition's spectral values according to `options`.
pub fn convert_partition(
    dataset: &dyn DatasetRead,
    key: PartitionKey,
    astrometry: &dyn Astrometry,
    options: &ConvertOptions,
) -> Result<Converted, ConvertError> {
    let partition = dataset.read(key)?;
    let global = dataset.read(PartitionKey::Global)?;
    convert_with_global(&partition, &global, astrometry, options)
}

/// Convert the channel frequencies of a data description from TOPO to LSRK.
pub fn topo_to_lsrk(
    dataset: &dyn DatasetRead,
    ddi: usize,
    astrometry: &dyn Astrometry,
) -> Result<Converted, ConvertError> {
    let options = ConvertOptions {
        to_frame: SpectralFrame::Lsrk,
        from_frame: Some(SpectralFrame::Topo),
        ..Default::default()
    };
    convert_partition(dataset, PartitionKey::Ddi(ddi), astrometry, &options)
}

/// Convert every partition of `dataset` other than the global one.
pub fn convert_all(
    dataset: &dyn DatasetRead,
    astrometry: &dyn Astrometry,
    options: &ConvertOptions,
) -> Result<Vec<Converted>, ConvertError> {
    options.validate()?;
    let global = dataset.read(PartitionKey::Global)?;
    let keys: Vec<PartitionKey> = dataset
        .partition_keys()
        .into_iter()
        .filter(|k| *k != PartitionKey::Global)
        .collect();
    info!("Converting {} partitions to {}", keys.len(), options.to_frame);

    keys.into_iter()
        .map(|key| {
            let partition = dataset.read(key)?;
            convert_with_global(&partition, &global, astrometry, options)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use hifitime::TimeUnits;

    use super::*;
    use crate::{astro::ErfaAstrometry, read::InMemoryDataset};

    fn dataset() -> InMemoryDataset {
        let global = Partition::new(PartitionKey::Global)
            .with_attr(keys::TELESCOPE_NAME, "SKA-Low")
            .with_attr(keys::TIME_RANGE, vec![5.0e9, 5.0e9 + 3600.0])
            .with_attr(keys::PHASE_DIR, vec![0.0, (-30.0_f64).to_radians()])
            .with_attr(keys::DIRECTION_REF, "J2000")
            .with_attr(keys::SRC_SYSVEL, 0.0);
        let ddi = Partition::new(PartitionKey::Ddi(0))
            .with_attr(keys::MEAS_FREQ_REF, "TOPO")
            .with_var(
                keys::CHAN_FREQ,
                &[keys::CHAN_DIM],
                Array::linspace(106e6, 196e6, 901).into_dyn(),
            )
            .unwrap()
            .with_var(
                keys::CHAN_WIDTH,
                &[keys::CHAN_DIM],
                Array::from_elem(901, 100e3).into_dyn(),
            )
            .unwrap();
        InMemoryDataset::new().with_partition(global).with_partition(ddi)
    }

    fn options() -> ConvertOptions {
        ConvertOptions {
            now: Some(Epoch::from_gregorian_utc_at_midnight(2030, 1, 1)),
            chunk_len: 100,
            ..Default::default()
        }
    }

    #[test]
    fn converts_channel_frequencies() {
        let converted =
            convert_partition(&dataset(), PartitionKey::Ddi(0), &ErfaAstrometry, &options())
                .unwrap();
        assert!(converted.context.defaulted().is_empty());
        assert_eq!(converted.context.from_frame.key(), Some(keys::MEAS_FREQ_REF));

        let p = &converted.partition;
        assert_eq!(p.get_str(keys::MEAS_FREQ_REF), Some("LSRK"));
        assert_eq!(p.get_str(keys::FRAME_CONVERSION_FROM), Some("TOPO"));
        assert_eq!(p.get_f64(keys::DOPPLER_RATIO), Some(converted.ratio));
        assert!(p.get_str(keys::REFERENCE_TIME).is_some());
        assert_eq!(p.get_floats(keys::REFERENCE_LOCATION).unwrap().len(), 3);

        let before = dataset().read(PartitionKey::Ddi(0)).unwrap();
        let freqs_before = before.get_floats(keys::CHAN_FREQ).unwrap();
        let freqs_after = p.get_floats(keys::CHAN_FREQ).unwrap();
        assert_eq!(freqs_before.shape(), freqs_after.shape());
        for (a, b) in freqs_after.iter().zip(freqs_before.iter()) {
            assert_relative_eq!(*a, b * converted.ratio);
        }
        // The widths are in the same frame as the frequencies.
        let widths = p.get_floats(keys::CHAN_WIDTH).unwrap();
        for w in widths.iter() {
            assert_relative_eq!(*w, 100e3 * converted.ratio);
        }
    }

    #[test]
    fn labels_follow_the_converted_variable() {
        let mut data = dataset();
        let ddi = data
            .read(PartitionKey::Ddi(0))
            .unwrap()
            .with_var(
                "line_freq",
                &[keys::CHAN_DIM],
                array![1420.405_751e6, 1612.231e6].into_dyn(),
            )
            .unwrap();
        data.insert(ddi);

        let line = ConvertOptions {
            variable: "line_freq".to_string(),
            ..options()
        };
        let first = convert_partition(&data, PartitionKey::Ddi(0), &ErfaAstrometry, &line).unwrap();
        let p = &first.partition;
        // Only line_freq changed, so only line_freq is labelled LSRK.
        assert_eq!(p.get_str(keys::MEAS_FREQ_REF), Some("TOPO"));
        assert_eq!(p.get_str("line_freq_frame"), Some("LSRK"));
        assert_eq!(
            p.data_vars[keys::CHAN_FREQ],
            data.read(PartitionKey::Ddi(0)).unwrap().data_vars[keys::CHAN_FREQ]
        );

        // The channel frequencies are still TOPO and get the full shift.
        let mut converted = InMemoryDataset::new()
            .with_partition(data.read(PartitionKey::Global).unwrap())
            .with_partition(p.clone());
        let chans =
            convert_partition(&converted, PartitionKey::Ddi(0), &ErfaAstrometry, &options())
                .unwrap();
        assert_eq!(chans.context.from_frame.value(), &SpectralFrame::Topo);
        assert_eq!(chans.ratio, first.ratio);
        assert_eq!(chans.partition.get_str(keys::MEAS_FREQ_REF), Some("LSRK"));
        assert_eq!(chans.partition.get_str("line_freq_frame"), Some("LSRK"));

        // Whereas line_freq is already LSRK.
        converted.insert(chans.partition);
        let again =
            convert_partition(&converted, PartitionKey::Ddi(0), &ErfaAstrometry, &line).unwrap();
        assert_eq!(
            again.context.from_frame.key(),
            Some(keys::VARIABLE_FRAME_SUFFIX)
        );
        assert_eq!(again.ratio, 1.0);
    }

    #[test]
    fn topo_to_lsrk_matches_explicit_options() {
        let a = topo_to_lsrk(&dataset(), 0, &ErfaAstrometry).unwrap();
        let b = convert_partition(
            &dataset(),
            PartitionKey::Ddi(0),
            &ErfaAstrometry,
            &ConvertOptions {
                from_frame: Some(SpectralFrame::Topo),
                ..options()
            },
        )
        .unwrap();
        assert_eq!(a.ratio, b.ratio);
        assert!(a.context.from_frame.is_given());
        assert_eq!(a.context.from_frame.key(), None);
    }

    #[test]
    fn bad_requests() {
        let data = dataset();
        assert!(matches!(
            convert_partition(&data, PartitionKey::Ddi(5), &ErfaAstrometry, &options()),
            Err(ConvertError::Read(_))
        ));
        assert!(matches!(
            convert_partition(&data, PartitionKey::Global, &ErfaAstrometry, &options()),
            Err(ConvertError::GlobalPartition)
        ));
        let missing = ConvertOptions {
            variable: "DATA".to_string(),
            ..options()
        };
        assert!(matches!(
            convert_partition(&data, PartitionKey::Ddi(0), &ErfaAstrometry, &missing),
            Err(ConvertError::MissingVariable { .. })
        ));
        let zero = ConvertOptions {
            chunk_len: 0,
            ..options()
        };
        assert!(matches!(
            convert_partition(&data, PartitionKey::Ddi(0), &ErfaAstrometry, &zero),
            Err(ConvertError::InvalidOption(_))
        ));
        let dut1 = ConvertOptions {
            dut1: 2.seconds(),
            ..options()
        };
        assert!(dut1.validate().is_err());
    }

    #[test]
    fn inconsistent_targets_follow_the_policy() {
        let mut data = dataset();
        let mut global = data.read(PartitionKey::Global).unwrap();
        global.attrs.shift_remove(keys::SRC_SYSVEL);
        data.insert(global);

        let converted =
            convert_partition(&data, PartitionKey::Ddi(0), &ErfaAstrometry, &options()).unwrap();
        assert_eq!(converted.context.defaulted(), vec!["target velocity"]);

        let strict = ConvertOptions {
            target_policy: TargetPolicy::RequireConsistent,
            ..options()
        };
        assert!(matches!(
            convert_partition(&data, PartitionKey::Ddi(0), &ErfaAstrometry, &strict),
            Err(ConvertError::InconsistentTarget { .. })
        ));
    }

    #[test]
    fn convert_all_skips_global() {
        let mut data = dataset();
        let mut ddi1 = data.read(PartitionKey::Ddi(0)).unwrap();
        ddi1.key = PartitionKey::Ddi(1);
        data.insert(ddi1);
        let converted = convert_all(&data, &ErfaAstrometry, &options()).unwrap();
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].partition.key, PartitionKey::Ddi(0));
        assert_eq!(converted[1].partition.key, PartitionKey::Ddi(1));
        assert_eq!(converted[0].ratio, converted[1].ratio);
    }
}
