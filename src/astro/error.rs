//! Errors which can occur within the `astro` (positional astronomy) module.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AstroError {
    #[error(transparent)]
    Erfa(#[from] marlu::erfa::ErfaError),

    #[error("Unknown observatory '{0}'")]
    UnknownSite(String),

    #[error("Unknown spectral reference frame '{0}'")]
    UnknownSpectralFrame(String),

    #[error("Unknown direction reference frame '{0}'")]
    UnknownDirectionFrame(String),

    #[error("Observer speed {speed_ms} m/s relative to {frame} is not less than the speed of light")]
    Superluminal { frame: String, speed_ms: f64 },
}
