//! Convert the spectral axis of radio visibility datasets between reference
//! frames (e.g. TOPO to LSRK).
//!
//! The observation time, observer location and target are worked out from a
//! dataset's global partition (see [`resolve`]), the Doppler ratio between
//! frames comes from ERFA (see [`astro`]), and the ratio is applied to a data
//! variable in parallel chunks (see [`chunks`] and [`frame`]).

pub mod astro;
pub mod chunks;
pub mod constants;
pub mod convert;
pub mod frame;
pub mod read;
pub mod resolve;

use std::path::Path;

pub use astro::{Astrometry, ErfaAstrometry, SpectralFrame};
pub use convert::{
    convert_all, convert_partition, topo_to_lsrk, ConvertError, ConvertOptions, Converted,
    TargetPolicy,
};
pub use read::{DatasetRead, InMemoryDataset, Partition, PartitionKey};

use read::{ms::MsDataset, uvfits::UvfitsDataset, ReadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisInputType {
    MeasurementSet,
    Uvfits,
}

impl VisInputType {
    /// Work out the kind of data from its file extension.
    pub fn from_path(path: &Path) -> Result<VisInputType, ReadError> {
        match path.extension().and_then(|os_str| os_str.to_str()) {
            Some("uvfits" | "uvf") => Ok(VisInputType::Uvfits),
            Some("ms") => Ok(VisInputType::MeasurementSet),
            _ => Err(ReadError::UnknownInputType(path.to_path_buf())),
        }
    }
}

/// Open a measurement set or uvfits file.
pub fn open_dataset(path: &Path) -> Result<Box<dyn DatasetRead>, ReadError> {
    let dataset: Box<dyn DatasetRead> = match VisInputType::from_path(path)? {
        VisInputType::MeasurementSet => Box::new(MsDataset::new(path)?),
        VisInputType::Uvfits => Box::new(UvfitsDataset::new(path)?),
    };
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn input_type_from_extension() {
        assert_eq!(
            VisInputType::from_path(Path::new("/data/1090008640.ms")).unwrap(),
            VisInputType::MeasurementSet
        );
        assert_eq!(
            VisInputType::from_path(Path::new("ZW3.uvf")).unwrap(),
            VisInputType::Uvfits
        );
        assert!(matches!(
            VisInputType::from_path(Path::new("model.fits")),
            Err(ReadError::UnknownInputType(p)) if p == PathBuf::from("model.fits")
        ));
    }

    #[test]
    fn missing_files_are_errors() {
        assert!(matches!(
            open_dataset(Path::new("/does/not/exist.ms")),
            Err(ReadError::MissingFile(_))
        ));
    }
}
