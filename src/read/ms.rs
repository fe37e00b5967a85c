//! Read measurement-set metadata into partitions.
//!
//! The OBSERVATION, ANTENNA, FIELD and (optional) SOURCE tables feed the
//! global partition. Each row of DATA_DESCRIPTION is a partition of its own,
//! described by the SPECTRAL_WINDOW row it points at.

use std::path::{Path, PathBuf};

use log::{debug, trace, warn};
use marlu::rubbl_casatables;
use ndarray::prelude::*;
use rubbl_casatables::{Table, TableOpenMode, TableRecord};

use super::{keys, DatasetRead, Partition, PartitionKey, ReadError};
use crate::astro::SpectralFrame;

/// Open a measurement set table read only. If `table` is `None`, then open the
/// base table.
fn read_table(ms: &Path, table: Option<&str>) -> Result<Table, ReadError> {
    Table::open(
        format!("{}/{}", ms.display(), table.unwrap_or("")),
        TableOpenMode::Read,
    )
    .map_err(|e| casacore_error(table, e))
}

fn casacore_error<E: std::fmt::Display>(table: Option<&str>, e: E) -> ReadError {
    ReadError::Casacore {
        table: table.unwrap_or("MAIN").to_string(),
        message: e.to_string(),
    }
}

/// The `Ref` of a column's MEASINFO keyword, e.g. "J2000" for a direction
/// column.
fn column_measure_ref(table: &mut Table, column: &str) -> Option<String> {
    let mut keywords = match table.get_column_keyword_record(column) {
        Ok(k) => k,
        Err(e) => {
            debug!("Couldn't read the {column} keywords: {e}");
            return None;
        }
    };
    let mut meas_info: TableRecord = match keywords.get_field("MEASINFO") {
        Ok(m) => m,
        Err(e) => {
            debug!("{column} has no MEASINFO: {e}");
            return None;
        }
    };
    meas_info
        .get_field::<String>("Ref")
        .map_err(|e| debug!("{column} MEASINFO has no Ref: {e}"))
        .ok()
}

pub struct MsDataset {
    /// The path to the measurement set on disk.
    pub ms: PathBuf,

    /// The number of rows in the DATA_DESCRIPTION table.
    num_ddis: usize,
}

impl MsDataset {
    pub fn new<P: AsRef<Path>>(ms: P) -> Result<MsDataset, ReadError> {
        let ms = ms.as_ref();
        debug!("Using measurement set: {}", ms.display());
        if !ms.exists() {
            return Err(ReadError::MissingFile(ms.to_path_buf()));
        }

        let data_description_table = read_table(ms, Some("DATA_DESCRIPTION"))?;
        let num_ddis = data_description_table.n_rows() as usize;
        if num_ddis == 0 {
            return Err(ReadError::EmptyTable {
                file: ms.to_path_buf(),
                table: "DATA_DESCRIPTION".to_string(),
            });
        }
        trace!("MS has {num_ddis} data descriptions");

        Ok(MsDataset {
            ms: ms.to_path_buf(),
            num_ddis,
        })
    }

    fn read_global(&self) -> Result<Partition, ReadError> {
        let ms = self.ms.as_path();
        let mut partition = Partition::new(PartitionKey::Global);

        let mut main_table = read_table(ms, None)?;
        if main_table.n_rows() > 0 {
            // casacore stores times as centroids, in UTC MJD seconds.
            let time: f64 = main_table
                .get_cell("TIME", 0)
                .map_err(|e| casacore_error(None, e))?;
            partition = partition.with_attr(keys::TIME, time);
        }

        let table = Some("OBSERVATION");
        let mut observation_table = read_table(ms, table)?;
        if observation_table.n_rows() > 0 {
            let telescope: String = observation_table
                .get_cell("TELESCOPE_NAME", 0)
                .map_err(|e| casacore_error(table, e))?;
            let time_range: Vec<f64> = observation_table
                .get_cell_as_vec("TIME_RANGE", 0)
                .map_err(|e| casacore_error(table, e))?;
            debug!("MS telescope: {telescope}, time range: {time_range:?}");
            partition = partition
                .with_attr(keys::TELESCOPE_NAME, telescope)
                .with_attr(keys::TIME_RANGE, time_range);
        }

        // Get the tile names and XYZ positions.
        let table = Some("ANTENNA");
        let mut antenna_table = read_table(ms, table)?;
        let ant_names: Vec<String> = antenna_table
            .get_col_as_vec("NAME")
            .map_err(|e| casacore_error(table, e))?;
        trace!("There are {} antenna names", ant_names.len());
        let mut positions: Vec<f64> = Vec::with_capacity(antenna_table.n_rows() as usize * 3);
        antenna_table
            .for_each_row(|row| {
                let pos: Vec<f64> = row.get_cell("POSITION")?;
                positions.extend(pos.into_iter().take(3));
                Ok(())
            })
            .map_err(|e| casacore_error(table, e))?;
        if positions.len() != ant_names.len() * 3 {
            return Err(ReadError::AntennaMismatch {
                names: ant_names.len(),
                positions: positions.len() / 3,
            });
        }
        let positions = Array2::from_shape_vec((ant_names.len(), 3), positions)
            .map_err(|e| ReadError::BadLayout {
                file: self.ms.clone(),
                what: "antenna positions",
                reason: e.to_string(),
            })?;
        partition = partition
            .with_attr(keys::ANT_NAME, ant_names.join(","))
            .with_var(keys::ANT_POSITION, &["antenna", "xyz"], positions.into_dyn())?;

        // Get the observation phase centre.
        let table = Some("FIELD");
        let mut field_table = read_table(ms, table)?;
        if field_table.n_rows() > 0 {
            let phase_vec: Vec<f64> = field_table
                .get_cell_as_vec("PHASE_DIR", 0)
                .map_err(|e| casacore_error(table, e))?;
            let name: String = field_table
                .get_cell("NAME", 0)
                .map_err(|e| casacore_error(table, e))?;
            let direction_ref = column_measure_ref(&mut field_table, "PHASE_DIR")
                .unwrap_or_else(|| {
                    warn!("FIELD PHASE_DIR has no MEASINFO reference; assuming J2000");
                    "J2000".to_string()
                });
            debug!("MS phase centre: {phase_vec:?} ({direction_ref})");
            partition = partition
                .with_attr(keys::FIELD_NAME, name)
                .with_attr(keys::PHASE_DIR, phase_vec)
                .with_attr(keys::DIRECTION_REF, direction_ref);
        }

        // The SOURCE table is optional, and so is its SYSVEL column.
        let table = Some("SOURCE");
        match read_table(ms, table) {
            Ok(mut source_table) if source_table.n_rows() > 0 => {
                match source_table.get_cell_as_vec::<f64>("SYSVEL", 0) {
                    Ok(sysvel) if !sysvel.is_empty() => {
                        partition = partition.with_attr(keys::SRC_SYSVEL, sysvel[0]);
                    }
                    Ok(_) => (),
                    Err(e) => debug!("No usable SOURCE SYSVEL: {e}"),
                }
            }
            Ok(_) => debug!("SOURCE table is empty"),
            Err(e) => debug!("No SOURCE table: {e}"),
        }

        Ok(partition)
    }

    fn read_ddi(&self, ddi: usize) -> Result<Partition, ReadError> {
        let ms = self.ms.as_path();

        let table = Some("DATA_DESCRIPTION");
        let mut data_description_table = read_table(ms, table)?;
        let spw: i32 = data_description_table
            .get_cell("SPECTRAL_WINDOW_ID", ddi as u64)
            .map_err(|e| casacore_error(table, e))?;
        trace!("DDI {ddi} is spectral window {spw}");

        let table = Some("SPECTRAL_WINDOW");
        let mut spectral_window_table = read_table(ms, table)?;
        let spw_row = spw as u64;
        let chan_freqs: Vec<f64> = spectral_window_table
            .get_cell_as_vec("CHAN_FREQ", spw_row)
            .map_err(|e| casacore_error(table, e))?;
        let chan_widths: Vec<f64> = spectral_window_table
            .get_cell_as_vec("CHAN_WIDTH", spw_row)
            .map_err(|e| casacore_error(table, e))?;
        let meas_freq_ref: i32 = spectral_window_table
            .get_cell("MEAS_FREQ_REF", spw_row)
            .map_err(|e| casacore_error(table, e))?;
        let ref_frequency: f64 = spectral_window_table
            .get_cell("REF_FREQUENCY", spw_row)
            .map_err(|e| casacore_error(table, e))?;
        let frame = SpectralFrame::from_casacore_code(meas_freq_ref);
        debug!(
            "Spectral window {spw}: {} channels, MEAS_FREQ_REF {meas_freq_ref} ({})",
            chan_freqs.len(),
            frame.map(|f| f.to_string()).unwrap_or_else(|| "unknown".to_string())
        );

        let mut partition = Partition::new(PartitionKey::Ddi(ddi))
            .with_attr(keys::SPECTRAL_WINDOW_ID, i64::from(spw))
            .with_attr(keys::REF_FREQUENCY, ref_frequency)
            .with_var(keys::CHAN_FREQ, &[keys::CHAN_DIM], Array1::from(chan_freqs).into_dyn())?
            .with_var(keys::CHAN_WIDTH, &[keys::CHAN_DIM], Array1::from(chan_widths).into_dyn())?;
        if let Some(frame) = frame {
            partition = partition.with_attr(keys::MEAS_FREQ_REF, frame.to_string());
        }
        Ok(partition)
    }
}

impl DatasetRead for MsDataset {
    fn read(&self, key: PartitionKey) -> Result<Partition, ReadError> {
        match key {
            PartitionKey::Global => self.read_global(),
            PartitionKey::Ddi(ddi) if ddi < self.num_ddis => self.read_ddi(ddi),
            PartitionKey::Ddi(_) => Err(ReadError::MissingPartition(key)),
        }
    }

    fn partition_keys(&self) -> Vec<PartitionKey> {
        std::iter::once(PartitionKey::Global)
            .chain((0..self.num_ddis).map(PartitionKey::Ddi))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use hifitime::Duration;
    use marlu::{LatLngHeight, MeasurementSetWriter, RADec};
    use tempfile::tempdir;

    use super::*;
    use crate::open_dataset;

    const NUM_CHANS: usize = 4;
    const ANT_POSITIONS: [[f64; 3]; 2] = [
        [-2559524.23682043, 5095846.67363471, -2848988.72758185],
        [-2559573.78082283, 5095807.94525687, -2849012.69353153],
    ];

    /// Write the metadata tables of a two-window measurement set. The second
    /// window is labelled LSRK and the phase centre is B1950.
    fn write_test_ms(ms_path: &Path, time_range: (f64, f64)) {
        let phase_centre = RADec::from_degrees(60.0, -27.0);
        let ms_writer = MeasurementSetWriter::new(
            ms_path,
            phase_centre,
            LatLngHeight::mwa(),
            vec![],
            Duration::default(),
            false,
        );
        ms_writer.decompress_default_tables().unwrap();
        ms_writer.decompress_source_table().unwrap();
        ms_writer.add_cotter_mods(NUM_CHANS).unwrap();

        let mut main_table = Table::open(ms_path, TableOpenMode::ReadWrite).unwrap();
        main_table.add_rows(1).unwrap();
        main_table.put_cell("TIME", 0, &(time_range.0 + 1.0)).unwrap();

        let mut spw_table =
            Table::open(ms_path.join("SPECTRAL_WINDOW"), TableOpenMode::ReadWrite).unwrap();
        spw_table.add_rows(2).unwrap();
        for (idx, first_freq) in [167e6, 198e6].into_iter().enumerate() {
            let chan_info = Array2::from_shape_fn((NUM_CHANS, 4), |(c, i)| {
                if i == 0 {
                    first_freq + c as f64 * 40e3
                } else {
                    40e3
                }
            });
            ms_writer
                .write_spectral_window_row(
                    &mut spw_table,
                    idx as u64,
                    "test",
                    first_freq,
                    &chan_info,
                    40e3 * NUM_CHANS as f64,
                    false,
                )
                .unwrap();
        }
        // 1 is LSRK.
        spw_table.put_cell("MEAS_FREQ_REF", 1, &1_i32).unwrap();

        // The data descriptions point at the windows in reverse order.
        let mut ddesc_table =
            Table::open(ms_path.join("DATA_DESCRIPTION"), TableOpenMode::ReadWrite).unwrap();
        ddesc_table.add_rows(2).unwrap();
        ms_writer
            .write_data_description_row(&mut ddesc_table, 0, 1, 0, false)
            .unwrap();
        ms_writer
            .write_data_description_row(&mut ddesc_table, 1, 0, 0, false)
            .unwrap();

        let mut ant_table = Table::open(ms_path.join("ANTENNA"), TableOpenMode::ReadWrite).unwrap();
        ant_table.add_rows(ANT_POSITIONS.len()).unwrap();
        for (idx, (position, name)) in ANT_POSITIONS.iter().zip(["Tile011", "Tile012"]).enumerate() {
            ms_writer
                .write_antenna_row(
                    &mut ant_table,
                    idx as u64,
                    name,
                    "MWA",
                    "GROUND-BASED",
                    "ALT-AZ",
                    &position.to_vec(),
                    4.0,
                    false,
                )
                .unwrap();
        }

        let mut field_table = Table::open(ms_path.join("FIELD"), TableOpenMode::ReadWrite).unwrap();
        field_table.add_rows(1).unwrap();
        let dir_info = array![
            [[phase_centre.ra, phase_centre.dec]],
            [[phase_centre.ra, phase_centre.dec]],
            [[phase_centre.ra, phase_centre.dec]],
        ];
        ms_writer
            .write_field_row(&mut field_table, 0, "test", "", time_range.0, &dir_info, -1, false)
            .unwrap();
        let mut meas_info = TableRecord::new().unwrap();
        meas_info.put_field("type", &"direction".to_string()).unwrap();
        meas_info.put_field("Ref", &"B1950".to_string()).unwrap();
        field_table
            .put_column_keyword("PHASE_DIR", "MEASINFO", &meas_info)
            .unwrap();

        let mut obs_table =
            Table::open(ms_path.join("OBSERVATION"), TableOpenMode::ReadWrite).unwrap();
        obs_table.add_rows(1).unwrap();
        ms_writer
            .write_observation_row(&mut obs_table, 0, "MWA", time_range, "", "MWA", "", 0.0, false)
            .unwrap();
    }

    #[test]
    fn read_written_measurement_set() {
        let temp_dir = tempdir().expect("Couldn't make temp dir");
        let ms_path = temp_dir.path().join("test.ms");
        let time_range = (5.1e9, 5.1e9 + 600.0);
        write_test_ms(&ms_path, time_range);

        let dataset = open_dataset(&ms_path).unwrap();
        assert_eq!(
            dataset.partition_keys(),
            vec![
                PartitionKey::Global,
                PartitionKey::Ddi(0),
                PartitionKey::Ddi(1)
            ]
        );

        let global = dataset.read(PartitionKey::Global).unwrap();
        assert_eq!(global.get_str(keys::TELESCOPE_NAME), Some("MWA"));
        assert_abs_diff_eq!(global.get_f64(keys::TIME).unwrap(), time_range.0 + 1.0);
        let range = global.get_floats(keys::TIME_RANGE).unwrap();
        assert_eq!(range.iter().copied().collect::<Vec<_>>(), vec![time_range.0, time_range.1]);
        assert_eq!(global.get_str(keys::FIELD_NAME), Some("test"));
        assert_eq!(global.get_str(keys::DIRECTION_REF), Some("B1950"));
        let phase_dir = global.get_floats(keys::PHASE_DIR).unwrap();
        assert_eq!(phase_dir.len(), 2);
        assert_abs_diff_eq!(
            phase_dir.iter().next().copied().unwrap(),
            60.0_f64.to_radians(),
            epsilon = 1e-12
        );
        assert_eq!(global.get_str(keys::ANT_NAME), Some("Tile011,Tile012"));
        let positions = global.get_floats(keys::ANT_POSITION).unwrap();
        assert_eq!(positions.shape(), &[2, 3]);
        for (read, written) in positions.iter().zip(ANT_POSITIONS.iter().flatten()) {
            assert_abs_diff_eq!(*read, *written);
        }

        // DDI 0 is the second spectral window.
        let ddi0 = dataset.read(PartitionKey::Ddi(0)).unwrap();
        assert_eq!(ddi0.get_str(keys::MEAS_FREQ_REF), Some("LSRK"));
        assert_eq!(ddi0.get_f64(keys::SPECTRAL_WINDOW_ID), Some(1.0));
        assert_abs_diff_eq!(ddi0.get_f64(keys::REF_FREQUENCY).unwrap(), 198e6);
        let freqs = ddi0.get_floats(keys::CHAN_FREQ).unwrap();
        assert_eq!(freqs.len(), NUM_CHANS);
        assert_abs_diff_eq!(freqs.iter().next().copied().unwrap(), 198e6);

        let ddi1 = dataset.read(PartitionKey::Ddi(1)).unwrap();
        assert_eq!(ddi1.get_str(keys::MEAS_FREQ_REF), Some("TOPO"));
        let widths = ddi1.get_floats(keys::CHAN_WIDTH).unwrap();
        assert!(widths.iter().all(|&w| w == 40e3));

        assert!(matches!(
            dataset.read(PartitionKey::Ddi(2)),
            Err(ReadError::MissingPartition(PartitionKey::Ddi(2)))
        ));
    }
}
