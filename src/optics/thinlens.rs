//! Thin-lens relations between image-plane displacement and defocus.

use crate::optics::SetupParameters;

/// Granularity of a physically realistic focus stage, in microns.
pub const FOCUS_STEP_MICRONS: f64 = 5.0;

/// Converts an image-plane displacement (µm) into defocus in waves.
///
/// The thin-lens relation gives Hopkins W020 = z / (8 F#²) in microns of
/// optical path. With `zernike` the value is the Z4 coefficient (half of W020),
/// further divided by √3 when `rms_norm` is set.
pub fn image_displacement_to_defocus(
    z: f64,
    fno: f64,
    wavelength: f64,
    zernike: bool,
    rms_norm: bool,
) -> f64 {
    let w020 = z / (8.0 * fno * fno) / wavelength;
    if zernike {
        hopkins_to_zernike(w020, rms_norm)
    } else {
        w020
    }
}

/// Inverse of [`image_displacement_to_defocus`].
pub fn defocus_to_image_displacement(
    defocus: f64,
    fno: f64,
    wavelength: f64,
    zernike: bool,
    rms_norm: bool,
) -> f64 {
    let w020 = if zernike {
        let fringe = if rms_norm {
            defocus * 3.0_f64.sqrt()
        } else {
            defocus
        };
        fringe * 2.0
    } else {
        defocus
    };
    w020 * wavelength * 8.0 * fno * fno
}

/// Z4 coefficient carrying the same wavefront as a Hopkins W020 term (piston dropped).
pub fn hopkins_to_zernike(w020: f64, rms_norm: bool) -> f64 {
    let fringe = w020 / 2.0;
    if rms_norm {
        fringe / 3.0_f64.sqrt()
    } else {
        fringe
    }
}

/// `count` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![(start + stop) / 2.0],
        _ => {
            let step = (stop - start) / (count - 1) as f64;
            (0..count).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Per-plane defocus, symmetric about best focus, in the Z4 units of the codex.
///
/// Hopkins ranges (`focus_zernike == false`) are converted to Z4 so the value
/// can be added directly to the Z4 slot of the wavefront.
pub fn focus_diversity(setup: &SetupParameters) -> Vec<f64> {
    let range = setup.focus_range_waves;
    linspace(-range, range, setup.focus_planes)
        .into_iter()
        .map(|value| {
            if setup.focus_zernike {
                value
            } else {
                hopkins_to_zernike(value, setup.focus_normed)
            }
        })
        .collect()
}

/// Rounds `value` to the nearest multiple of `step`.
pub fn round_to_multiple(value: f64, step: f64) -> f64 {
    (value / step).round() * step
}

/// Returns a copy of `setup` whose focus range corresponds to a whole number
/// of [`FOCUS_STEP_MICRONS`] of image displacement.
pub fn with_realistic_focus_range(setup: &SetupParameters) -> SetupParameters {
    let microns = defocus_to_image_displacement(
        setup.focus_range_waves,
        setup.fno,
        setup.wavelength,
        setup.focus_zernike,
        setup.focus_normed,
    );
    let rounded = round_to_multiple(microns, FOCUS_STEP_MICRONS);
    let mut realistic = setup.clone();
    realistic.focus_range_waves = image_displacement_to_defocus(
        rounded,
        setup.fno,
        setup.wavelength,
        setup.focus_zernike,
        setup.focus_normed,
    );
    realistic
}
