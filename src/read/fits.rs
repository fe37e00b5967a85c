//! Helpers for reading FITS keys and columns.
//!
//! All of these attach the file and keyword to any error from cfitsio.

use std::{
    ffi::CString,
    os::raw::c_char,
    path::{Path, PathBuf},
};

use fitsio::{errors::check_status as fits_check_status, hdu::*, FitsFile};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitsError {
    #[error("Couldn't open {}: {err}", file.display())]
    Open {
        file: PathBuf,
        err: fitsio::errors::Error,
    },

    #[error("Couldn't open HDU {hdu} of {}: {err}", file.display())]
    Hdu {
        file: PathBuf,
        hdu: String,
        err: fitsio::errors::Error,
    },

    #[error("Couldn't read key {key} of {}: {err}", file.display())]
    Key {
        file: PathBuf,
        key: String,
        err: fitsio::errors::Error,
    },

    #[error("Required key {key} is missing from {}", file.display())]
    MissingKey { file: PathBuf, key: String },

    #[error("Couldn't parse key {key} of {} (value '{value}')", file.display())]
    Parse {
        file: PathBuf,
        key: String,
        value: String,
    },

    #[error("Couldn't read column {col} of {}: {err}", file.display())]
    Column {
        file: PathBuf,
        col: String,
        err: fitsio::errors::Error,
    },
}

/// Open a fits file.
pub(crate) fn fits_open<P: AsRef<Path>>(file: P) -> Result<FitsFile, FitsError> {
    FitsFile::open(file.as_ref()).map_err(|err| FitsError::Open {
        file: file.as_ref().to_path_buf(),
        err,
    })
}

/// Open a fits file's HDU.
pub(crate) fn fits_open_hdu<T: DescribesHdu + std::fmt::Display + Copy>(
    file: &Path,
    fits_fptr: &mut FitsFile,
    hdu_description: T,
) -> Result<FitsHdu, FitsError> {
    fits_fptr.hdu(hdu_description).map_err(|err| FitsError::Hdu {
        file: file.to_path_buf(),
        hdu: hdu_description.to_string(),
        err,
    })
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword that may
/// or may not exist, pull out the value of the keyword, parsing it into the
/// desired type.
pub(crate) fn fits_get_optional_key<T: std::str::FromStr>(
    file: &Path,
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Option<T>, FitsError> {
    let unparsed_value: String = match hdu.read_key(fits_fptr, keyword) {
        Ok(key_value) => key_value,
        Err(e) => match &e {
            // 202 = KEY_NO_EXIST, 204 = VALUE_UNDEFINED
            fitsio::errors::Error::Fits(fe) if matches!(fe.status, 202 | 204) => return Ok(None),
            _ => {
                return Err(FitsError::Key {
                    file: file.to_path_buf(),
                    key: keyword.to_string(),
                    err: e,
                })
            }
        },
    };

    // cfitsio hands back string values with their quotes intact.
    let trimmed = unparsed_value.trim().trim_matches('\'').trim();
    match trimmed.parse() {
        Ok(parsed_value) => Ok(Some(parsed_value)),
        Err(_) => Err(FitsError::Parse {
            file: file.to_path_buf(),
            key: keyword.to_string(),
            value: unparsed_value,
        }),
    }
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword, pull out
/// the value of the keyword, parsing it into the desired type.
pub(crate) fn fits_get_required_key<T: std::str::FromStr>(
    file: &Path,
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<T, FitsError> {
    match fits_get_optional_key(file, fits_fptr, hdu, keyword)? {
        Some(value) => Ok(value),
        None => Err(FitsError::MissingKey {
            file: file.to_path_buf(),
            key: keyword.to_string(),
        }),
    }
}

/// Get a column from a fits file's HDU.
pub(crate) fn fits_get_col<T: fitsio::tables::ReadsCol>(
    file: &Path,
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Vec<T>, FitsError> {
    hdu.read_col(fits_fptr, keyword)
        .map_err(|err| FitsError::Column {
            file: file.to_path_buf(),
            col: keyword.to_string(),
            err,
        })
}

/// Pull out fits array-in-a-cell values; useful for e.g. STABXYZ. This function
/// assumes that the output datatype is f64, and that the fits datatype is
/// TDOUBLE, so it is not to be used generally!
///
/// The HDU containing the column must be the current HDU.
pub(crate) fn fits_get_cell_array(
    file: &Path,
    fits_fptr: &mut FitsFile,
    col_name: &str,
    row: i64,
    n_elem: i64,
) -> Result<Vec<f64>, FitsError> {
    let column_error = |err| FitsError::Column {
        file: file.to_path_buf(),
        col: col_name.to_string(),
        err,
    };
    let keyword = CString::new(col_name).map_err(|_| FitsError::MissingKey {
        file: file.to_path_buf(),
        key: col_name.to_string(),
    })?;

    // With the column name, get the column number.
    let mut status = 0;
    let mut col_num = -1;
    unsafe {
        // ffgcno = fits_get_colnum
        fitsio_sys::ffgcno(
            fits_fptr.as_raw(),
            0,
            keyword.as_ptr() as *mut c_char,
            &mut col_num,
            &mut status,
        );
    }
    fits_check_status(status).map_err(column_error)?;

    // Now get the specified row from that column.
    let mut array: Vec<f64> = vec![0.0; n_elem as usize];
    unsafe {
        // ffgcv = fits_read_col
        fitsio_sys::ffgcv(
            fits_fptr.as_raw(),
            82, // TDOUBLE (fitsio.h)
            col_num,
            row + 1,
            1,
            n_elem,
            std::ptr::null_mut(),
            array.as_mut_ptr().cast(),
            &mut 0,
            &mut status,
        );
    }
    fits_check_status(status).map_err(column_error)?;

    Ok(array)
}
