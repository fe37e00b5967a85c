//! Re-express spectral values in another reference frame.

use log::debug;
use marlu::constants::VEL_C;
use ndarray::prelude::*;

use crate::astro::{AstroError, Astrometry, EarthLocation, SkyTarget, SpectralFrame};

/// Everything needed to change the frame of a spectral value. The ratio
/// between frames depends only on the observer, target and frames, so it is
/// worked out once here and shared by every chunk.
#[derive(Debug, Clone, Copy)]
pub struct FrameChange {
    pub observer: EarthLocation,
    pub target: SkyTarget,
    pub from: SpectralFrame,
    pub to: SpectralFrame,
    ratio: f64,
}

impl FrameChange {
    pub fn new(
        astrometry: &dyn Astrometry,
        observer: &EarthLocation,
        target: &SkyTarget,
        from: SpectralFrame,
        to: SpectralFrame,
    ) -> Result<FrameChange, AstroError> {
        let ratio = astrometry.frequency_ratio(observer, target, from, to)?;
        debug!(
            "{from} -> {to}: ratio {ratio:.12} ({:+.3} m/s)",
            (1.0 / ratio - 1.0) * VEL_C
        );
        Ok(FrameChange {
            observer: *observer,
            target: *target,
            from,
            to,
            ratio,
        })
    }

    /// The factor that takes a frequency in `from` to `to`.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Change the frame of a single frequency.
    pub fn apply(&self, value: f64) -> f64 {
        if self.from == self.to {
            value
        } else {
            value * self.ratio
        }
    }
}

/// Change the frame of every value in `values`. The output has the same
/// shape as the input.
pub fn change_frame(values: ArrayViewD<f64>, ctx: &FrameChange) -> ArrayD<f64> {
    values.mapv(|v| ctx.apply(v))
}
