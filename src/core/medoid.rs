use crate::core::pixelwise::{map_pixels, median};
use crate::types::{BandStack, ImageCollection, LtError, LtResult, RasterImage, ValidityMask, COMPOSITE_BANDS};
use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array2;
use std::borrow::Cow;

/// Number of reflectance bands in a composite
pub const COMPOSITE_BAND_COUNT: usize = COMPOSITE_BANDS.len();

/// Day-of-year anchor of every composite (September 1 in non-leap years)
pub const COMPOSITE_DAY_OF_YEAR: u32 = 244;

/// Name of the clear-observation count band
pub const CLEAR_COUNT_BAND: &str = "count";

/// Synthetic timestamp stamped on the composite of `year`
pub fn composite_timestamp(year: i32) -> LtResult<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, 9, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| LtError::Processing(format!("Cannot build composite timestamp for year {}", year)))
}

/// Best-available-pixel compositing by per-pixel medoid
///
/// Per pixel, the per-band median of the valid observations is taken, each
/// observation is scored by its summed squared deviation from that median,
/// and the lowest-scoring observation is copied through unchanged. On equal
/// scores the observation that comes first in collection order wins.
#[derive(Debug, Clone, Default)]
pub struct MedoidCompositor;

impl MedoidCompositor {
    pub fn new() -> Self {
        Self
    }

    /// Fully masked all-zero observation used for years without data
    pub fn fallback_observation(shape: (usize, usize)) -> LtResult<RasterImage> {
        RasterImage::constant(&COMPOSITE_BANDS, &[0.0; COMPOSITE_BAND_COUNT], shape)?
            .with_mask(ValidityMask::from_elem(shape, false))
    }

    /// Observations to composite: the input, or the fallback when it is empty
    pub fn with_fallback(
        observations: &ImageCollection,
        shape: (usize, usize),
    ) -> LtResult<Cow<'_, ImageCollection>> {
        if observations.is_empty() {
            log::warn!("No observations available, substituting masked placeholder");
            Ok(Cow::Owned(ImageCollection::from_images(vec![Self::fallback_observation(shape)?])))
        } else {
            Ok(Cow::Borrowed(observations))
        }
    }

    /// Reduce a set of harmonized observations to one medoid image.
    ///
    /// `shape` is only used when `observations` is empty. Pixels with no
    /// valid observation come out zero and masked.
    pub fn composite(&self, observations: &ImageCollection, shape: (usize, usize)) -> LtResult<RasterImage> {
        let observations = Self::with_fallback(observations, shape)?;
        let shape = check_observations(&observations)?;
        log::debug!("Medoid compositing {} observation(s) over {:?}", observations.len(), shape);

        let images = observations.images();
        let selections = map_pixels(shape, |row, col| {
            let candidates: Vec<[f32; COMPOSITE_BAND_COUNT]> = images
                .iter()
                .filter(|img| img.is_valid(row, col))
                .map(|img| {
                    let px = img.pixel(row, col);
                    std::array::from_fn(|b| px[b])
                })
                .collect();
            select_medoid(&candidates).map(|idx| candidates[idx])
        });

        let (rows, cols) = shape;
        let mut data = BandStack::zeros((COMPOSITE_BAND_COUNT, rows, cols));
        let mut mask = ValidityMask::from_elem(shape, false);
        for (idx, selection) in selections.into_iter().enumerate() {
            if let Some(vector) = selection {
                let (row, col) = (idx / cols, idx % cols);
                for (b, value) in vector.iter().enumerate() {
                    data[[b, row, col]] = *value;
                }
                mask[[row, col]] = true;
            }
        }

        RasterImage::new(COMPOSITE_BANDS.iter().map(|b| b.to_string()).collect(), data, mask)
    }

    /// Composite for `year`, stamped with the synthetic composite timestamp
    pub fn composite_year(
        &self,
        year: i32,
        observations: &ImageCollection,
        shape: (usize, usize),
    ) -> LtResult<RasterImage> {
        log::info!("Building medoid composite for {} from {} observation(s)", year, observations.len());
        Ok(self
            .composite(observations, shape)?
            .with_time_start(composite_timestamp(year)?))
    }

    /// Per-pixel count of unmasked observations
    pub fn clear_pixel_count(observations: &ImageCollection, shape: (usize, usize)) -> LtResult<RasterImage> {
        let observations = Self::with_fallback(observations, shape)?;
        let shape = check_observations(&observations)?;

        let mut count = Array2::<f32>::zeros(shape);
        for img in observations.iter() {
            ndarray::Zip::from(&mut count)
                .and(img.mask())
                .for_each(|c, &valid| {
                    if valid {
                        *c += 1.0;
                    }
                });
        }
        RasterImage::from_single_band(CLEAR_COUNT_BAND, count, ValidityMask::from_elem(shape, true))
    }
}

/// Index of the medoid among `candidates`, or `None` when there are none.
///
/// Strict comparison keeps the first of equally distant candidates.
pub fn select_medoid(candidates: &[[f32; COMPOSITE_BAND_COUNT]]) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    let mut centre = [0.0f32; COMPOSITE_BAND_COUNT];
    let mut column = Vec::with_capacity(candidates.len());
    for (b, c) in centre.iter_mut().enumerate() {
        column.clear();
        column.extend(candidates.iter().map(|v| v[b]));
        *c = median(&mut column)?;
    }

    let mut best: Option<(usize, f32)> = None;
    for (idx, vector) in candidates.iter().enumerate() {
        let distance = squared_distance(vector, &centre);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((idx, distance)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Sum over bands of squared deviation from `centre`
pub fn squared_distance(vector: &[f32; COMPOSITE_BAND_COUNT], centre: &[f32; COMPOSITE_BAND_COUNT]) -> f32 {
    vector
        .iter()
        .zip(centre.iter())
        .map(|(v, c)| (v - c) * (v - c))
        .sum()
}

fn check_observations(observations: &ImageCollection) -> LtResult<(usize, usize)> {
    let first = observations
        .first()
        .ok_or_else(|| LtError::Processing("No observations to composite".to_string()))?;
    let shape = first.shape();

    for img in observations.iter() {
        if img.shape() != shape {
            return Err(LtError::Processing(format!(
                "Observation grid {:?} does not match {:?}",
                img.shape(),
                shape
            )));
        }
        if img.band_names().iter().map(String::as_str).ne(COMPOSITE_BANDS.iter().copied()) {
            return Err(LtError::InvalidFormat(format!(
                "Observation bands {:?} are not the composite bands {:?}",
                img.band_names(),
                COMPOSITE_BANDS
            )));
        }
    }
    Ok(shape)
}
