//! Read uvfits metadata into partitions.
//!
//! Only the metadata needed to describe the observation and its frequency axis
//! is read; the visibilities themselves are left alone.

use std::path::{Path, PathBuf};

use fitsio::{errors::check_status as fits_check_status, hdu::FitsHdu, FitsFile};
use log::{debug, trace, warn};
use ndarray::prelude::*;

use super::{
    fits::{
        fits_get_cell_array, fits_get_col, fits_get_optional_key, fits_get_required_key,
        fits_open, fits_open_hdu,
    },
    keys, DatasetRead, Partition, PartitionKey, ReadError,
};
use crate::constants::MJD_JD_OFFSET;

pub struct UvfitsDataset {
    /// The path to the uvfits on disk.
    pub uvfits: PathBuf,

    /// The 1-indexed axis and parameter indices of the file.
    indices: Indices,
}

impl UvfitsDataset {
    /// Verify the supplied uvfits file and find where its axes live.
    pub fn new<P: AsRef<Path>>(uvfits: P) -> Result<UvfitsDataset, ReadError> {
        let uvfits = uvfits.as_ref();
        debug!("Using uvfits file: {}", uvfits.display());
        if !uvfits.exists() {
            return Err(ReadError::MissingFile(uvfits.to_path_buf()));
        }

        let mut uvfits_fptr = fits_open(uvfits)?;
        let primary_hdu = fits_open_hdu(uvfits, &mut uvfits_fptr, 0)?;
        let indices = Indices::new(uvfits, &mut uvfits_fptr, &primary_hdu)?;
        debug!("uvfits indices: {indices:?}");

        Ok(UvfitsDataset {
            uvfits: uvfits.to_path_buf(),
            indices,
        })
    }

    fn read_global(&self) -> Result<Partition, ReadError> {
        let file = self.uvfits.as_path();
        let mut fptr = fits_open(file)?;
        let primary_hdu = fits_open_hdu(file, &mut fptr, 0)?;
        let mut partition = Partition::new(PartitionKey::Global);

        if let Some(telescope) =
            fits_get_optional_key::<String>(file, &mut fptr, &primary_hdu, "TELESCOP")?
        {
            partition = partition.with_attr(keys::TELESCOPE_NAME, telescope);
        }
        if let Some(date) =
            fits_get_optional_key::<String>(file, &mut fptr, &primary_hdu, "DATE-OBS")?
        {
            partition = partition.with_attr(keys::DATE, date);
        }
        if let Some(object) =
            fits_get_optional_key::<String>(file, &mut fptr, &primary_hdu, "OBJECT")?
        {
            partition = partition.with_attr(keys::FIELD_NAME, object);
        }

        // The first group's DATE parameters give a precise start time.
        if let Some(jd) = self.first_group_jd(&mut fptr, &primary_hdu)? {
            partition =
                partition.with_attr(keys::TIME, (jd - MJD_JD_OFFSET) * hifitime::SECONDS_PER_DAY);
        }

        // The phase centre is described by RA and DEC if there is no SOURCE
        // table (as per the standard). OBSRA/OBSDEC take precedence when
        // present.
        let ra: Option<f64> = match fits_get_optional_key(file, &mut fptr, &primary_hdu, "OBSRA")? {
            Some(ra) => Some(ra),
            None => fits_get_optional_key(
                file,
                &mut fptr,
                &primary_hdu,
                &format!("CRVAL{}", self.indices.ra),
            )?,
        };
        let dec: Option<f64> =
            match fits_get_optional_key(file, &mut fptr, &primary_hdu, "OBSDEC")? {
                Some(dec) => Some(dec),
                None => fits_get_optional_key(
                    file,
                    &mut fptr,
                    &primary_hdu,
                    &format!("CRVAL{}", self.indices.dec),
                )?,
            };
        if let (Some(ra), Some(dec)) = (ra, dec) {
            partition = partition.with_attr(
                keys::PHASE_DIR,
                vec![ra.to_radians(), dec.to_radians()],
            );
        }

        let equinox: Option<f64> =
            match fits_get_optional_key(file, &mut fptr, &primary_hdu, "EQUINOX")? {
                Some(e) => Some(e),
                None => fits_get_optional_key(file, &mut fptr, &primary_hdu, "EPOCH")?,
            };
        partition = partition.with_attr(keys::DIRECTION_REF, direction_ref_from_equinox(equinox));

        // Antenna names and positions.
        let antenna_table_hdu = fits_open_hdu(file, &mut fptr, "AIPS AN")?;
        let ant_names: Vec<String> = fits_get_col(file, &mut fptr, &antenna_table_hdu, "ANNAME")?;
        let array_xyz = {
            let mut xyz = [0.0; 3];
            for (value, key) in xyz.iter_mut().zip(["ARRAYX", "ARRAYY", "ARRAYZ"]) {
                *value = fits_get_optional_key(file, &mut fptr, &antenna_table_hdu, key)?
                    .unwrap_or(0.0);
            }
            xyz
        };
        trace!("uvfits array position: {array_xyz:?}");
        let num_ants = ant_names.len();
        let mut positions = Array2::zeros((num_ants, 3));
        for (i_ant, mut row) in positions.outer_iter_mut().enumerate() {
            let stabxyz = fits_get_cell_array(
                file,
                &mut fptr,
                "STABXYZ",
                i_ant.try_into().expect("not larger than i64::MAX"),
                3,
            )?;
            // STABXYZ is relative to ARRAYX/Y/Z.
            for ((out, rel), arr) in row.iter_mut().zip(stabxyz).zip(array_xyz) {
                *out = rel + arr;
            }
        }
        debug!("Read {num_ants} antenna positions");
        partition = partition
            .with_attr(keys::ANT_NAME, ant_names.join(","))
            .with_var(keys::ANT_POSITION, &["antenna", "xyz"], positions.into_dyn())?;

        Ok(partition)
    }

    fn read_spectral(&self) -> Result<Partition, ReadError> {
        let file = self.uvfits.as_path();
        let mut fptr = fits_open(file)?;
        let hdu = fits_open_hdu(file, &mut fptr, 0)?;
        let freq = self.indices.freq;

        let num_chans: usize = fits_get_required_key(file, &mut fptr, &hdu, &format!("NAXIS{freq}"))?;
        let crval: f64 = fits_get_required_key(file, &mut fptr, &hdu, &format!("CRVAL{freq}"))?;
        // CRPIX might be a float.
        let crpix: f64 = fits_get_required_key(file, &mut fptr, &hdu, &format!("CRPIX{freq}"))?;
        let cdelt: f64 = fits_get_required_key(file, &mut fptr, &hdu, &format!("CDELT{freq}"))?;
        let chan_freqs = freq_axis(crval, crpix, cdelt, num_chans);
        debug!(
            "uvfits has {num_chans} channels starting at {} Hz",
            chan_freqs.first().copied().unwrap_or(f64::NAN)
        );

        let specsys: Option<String> = fits_get_optional_key(file, &mut fptr, &hdu, "SPECSYS")?;
        let frame = specsys
            .as_deref()
            .map(specsys_to_frame_label)
            .unwrap_or("TOPO");

        Ok(Partition::new(PartitionKey::Ddi(0))
            .with_attr(keys::MEAS_FREQ_REF, frame)
            .with_attr(keys::REF_FREQUENCY, crval)
            .with_attr(keys::SPECTRAL_WINDOW_ID, 0_i64)
            .with_var(keys::CHAN_WIDTH, &[keys::CHAN_DIM], Array1::from_elem(num_chans, cdelt.abs()).into_dyn())?
            .with_var(keys::CHAN_FREQ, &[keys::CHAN_DIM], chan_freqs.into_dyn())?)
    }

    /// Read the DATE parameters of the first group, returning a Julian date.
    /// cfitsio doesn't scale group parameters, so PSCALn and PZEROn (the JD
    /// at midnight, for most writers) are applied here.
    fn first_group_jd(
        &self,
        fptr: &mut FitsFile,
        hdu: &FitsHdu,
    ) -> Result<Option<f64>, ReadError> {
        let file = self.uvfits.as_path();
        let date1 = match self.indices.date1 {
            Some(d) => d,
            None => return Ok(None),
        };
        let mut params = vec![0.0; usize::from(self.indices.pcount)];
        let mut status = 0;
        unsafe {
            // ffggpd = fits_read_grppar_dbl
            fitsio_sys::ffggpd(
                fptr.as_raw(), /* I - FITS file pointer                       */
                1,             /* I - group to read (1 = 1st group)           */
                1,             /* I - first vector element to read (1 = 1st)  */
                params.len().try_into().expect("not larger than i64::MAX"), /* I - number of values to read */
                params.as_mut_ptr(), /* O - array of values that are returned       */
                &mut status,         /* IO - error status                           */
            );
        }
        if let Err(e) = fits_check_status(status) {
            warn!("Couldn't read the first uvfits group's parameters: {e}");
            return Ok(None);
        }

        let mut scaled = |index: u8, raw: f64| -> Result<f64, ReadError> {
            let pscal: f64 =
                fits_get_optional_key(file, fptr, hdu, &format!("PSCAL{index}"))?.unwrap_or(1.0);
            let pzero: f64 =
                fits_get_optional_key(file, fptr, hdu, &format!("PZERO{index}"))?.unwrap_or(0.0);
            Ok(raw * pscal + pzero)
        };
        let mut jd = scaled(date1, params[usize::from(date1) - 1])?;
        // Use the second date, if it's there.
        if let Some(d2) = self.indices.date2 {
            jd += scaled(d2, params[usize::from(d2) - 1])?;
        }
        Ok(Some(jd))
    }
}

impl DatasetRead for UvfitsDataset {
    fn read(&self, key: PartitionKey) -> Result<Partition, ReadError> {
        match key {
            PartitionKey::Global => self.read_global(),
            PartitionKey::Ddi(0) => self.read_spectral(),
            _ => Err(ReadError::MissingPartition(key)),
        }
    }

    fn partition_keys(&self) -> Vec<PartitionKey> {
        vec![PartitionKey::Global, PartitionKey::Ddi(0)]
    }
}

/// Channel-centre frequencies of a FITS frequency axis. `crpix` is 1-indexed.
pub(crate) fn freq_axis(crval: f64, crpix: f64, cdelt: f64, num_chans: usize) -> Array1<f64> {
    Array1::from_shape_fn(num_chans, |i| crval + (i as f64 + 1.0 - crpix) * cdelt)
}

/// uvfits EQUINOX/EPOCH keys are years; anything near 1950 is FK4.
pub(crate) fn direction_ref_from_equinox(equinox: Option<f64>) -> &'static str {
    match equinox {
        Some(e) if (e - 1950.0).abs() < 0.5 => "B1950",
        _ => "J2000",
    }
}

/// Map a FITS SPECSYS value to a spectral frame label.
pub(crate) fn specsys_to_frame_label(specsys: &str) -> &'static str {
    match specsys.trim().to_uppercase().as_str() {
        "LSRK" => "LSRK",
        "LSRD" => "LSRD",
        "BARYCENT" | "BARY" => "BARY",
        "GEOCENTR" | "GEO" => "GEO",
        "GALACTOC" | "GALACTO" => "GALACTO",
        "LOCALGRP" | "LGROUP" => "LGROUP",
        "CMBDIPOL" | "CMB" => "CMB",
        "SOURCE" | "REST" => "REST",
        _ => "TOPO",
    }
}

#[derive(Debug, PartialEq)]
struct Indices {
    /// PCOUNT
    pcount: u8,
    /// PTYPE
    date1: Option<u8>,
    /// PTYPE
    date2: Option<u8>,
    /// CTYPE
    freq: u8,
    /// CTYPE
    ra: u8,
    /// CTYPE
    dec: u8,
}

impl Indices {
    /// Find the 1-indexed indices of the "PTYPE" and "CTYPE" keys we require.
    fn new(file: &Path, uvfits: &mut FitsFile, hdu: &FitsHdu) -> Result<Self, ReadError> {
        // Accumulate the "PTYPE" keys.
        let mut ptypes = Vec::with_capacity(12);
        for i in 1.. {
            let ptype: Option<String> =
                fits_get_optional_key(file, uvfits, hdu, &format!("PTYPE{i}"))?;
            match ptype {
                Some(ptype) => ptypes.push(ptype),

                // We've found the last PTYPE.
                None => break,
            }
        }

        // Now find CTYPEs. CTYPE1 is always empty for random groups.
        let mut ctypes = Vec::with_capacity(12);
        for i in 2.. {
            let ctype: Option<String> =
                fits_get_optional_key(file, uvfits, hdu, &format!("CTYPE{i}"))?;
            match ctype {
                Some(ctype) => ctypes.push(ctype),

                // We've found the last CTYPE.
                None => break,
            }
        }

        Indices::from_types(&ptypes[..], &ctypes[..]).map_err(|reason| ReadError::BadLayout {
            file: file.to_path_buf(),
            what: "axes",
            reason,
        })
    }

    fn from_types<S: AsRef<str>>(ptypes: &[S], ctypes: &[S]) -> Result<Self, String> {
        // Axis and parameter numbers must fit in a u8.
        let to_index = |kind: &str, i: usize| {
            u8::try_from(i).map_err(|_| format!("{kind} index {i} is larger than {}", u8::MAX))
        };

        let mut date1_index = None;
        let mut date2_index = None;
        for (i, key) in ptypes.iter().enumerate() {
            let ii = to_index("PTYPE", i + 1)?;
            if let "DATE" | "_DATE" = key.as_ref().trim() {
                match (date1_index, date2_index) {
                    (None, None) => date1_index = Some(ii),
                    (Some(_), None) => date2_index = Some(ii),
                    _ => warn!("Found more than 2 DATE/_DATE keys -- only using the first two"),
                }
            }
        }

        let mut freq_index = None;
        let mut ra_index = None;
        let mut dec_index = None;
        for (i, key) in ctypes.iter().enumerate() {
            let ii = to_index("CTYPE", i + 2)?;
            // CTYPEs may carry a projection suffix, e.g. "RA---SIN".
            let key = key.as_ref().trim();
            if key == "FREQ" {
                freq_index = Some(ii);
            } else if key == "RA" || key.starts_with("RA-") {
                ra_index = Some(ii);
            } else if key == "DEC" || key.starts_with("DEC-") {
                dec_index = Some(ii);
            }
        }

        let pcount = to_index("PCOUNT", ptypes.len())?;
        match (freq_index, ra_index, dec_index) {
            (Some(freq), Some(ra), Some(dec)) => Ok(Indices {
                pcount,
                date1: date1_index,
                date2: date2_index,
                freq,
                ra,
                dec,
            }),
            (None, _, _) => Err("no FREQ CTYPE".to_string()),
            _ => Err("no RA/DEC CTYPEs".to_string()),
        }
    }
}
