use crate::types::{
    BandData, BandStack, LtError, LtResult, RasterImage, Sensor, ValidityMask, COMPOSITE_BANDS, QA_BAND,
};
use ndarray::{Array2, ArrayView2, Axis};

/// OLI -> ETM+ reduced major axis slopes (Roy et al. 2016, Table 2)
pub const OLI_TO_ETM_SLOPES: [f32; 6] = [0.885, 0.9317, 0.9372, 0.8339, 0.8639, 0.9165];

/// OLI -> ETM+ reduced major axis intercepts, in reflectance units
pub const OLI_TO_ETM_INTERCEPTS: [f32; 6] = [0.0183, 0.0123, 0.0123, 0.0448, 0.0306, 0.0116];

/// Scale of the surface reflectance integers
pub const REFLECTANCE_SCALE: f32 = 10000.0;

/// Quality categories that can exclude a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskCategory {
    Water,
    Shadow,
    Snow,
    Cloud,
    /// High-confidence cirrus (OLI only)
    Cirrus,
}

impl MaskCategory {
    /// Categories masked when none are requested explicitly
    pub const DEFAULT: [MaskCategory; 3] = [MaskCategory::Cloud, MaskCategory::Shadow, MaskCategory::Snow];

    /// Whether the packed QA value flags this category
    pub fn flagged(&self, qa: u16) -> bool {
        match self {
            MaskCategory::Water => qa & (1 << 2) != 0,
            MaskCategory::Shadow => qa & (1 << 3) != 0,
            MaskCategory::Snow => qa & (1 << 4) != 0,
            MaskCategory::Cloud => qa & (1 << 5) != 0,
            MaskCategory::Cirrus => (qa >> 8) & 0b11 == 0b11,
        }
    }
}

impl std::str::FromStr for MaskCategory {
    type Err = LtError;

    fn from_str(s: &str) -> LtResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "water" => Ok(MaskCategory::Water),
            "shadow" => Ok(MaskCategory::Shadow),
            "snow" => Ok(MaskCategory::Snow),
            "cloud" => Ok(MaskCategory::Cloud),
            "cirrus" => Ok(MaskCategory::Cirrus),
            _ => Err(LtError::config("mask category", s)),
        }
    }
}

/// Builds per-pixel validity from a packed quality band
#[derive(Debug, Clone)]
pub struct QaMaskBuilder {
    categories: Vec<MaskCategory>,
}

impl QaMaskBuilder {
    pub fn new(categories: &[MaskCategory]) -> Self {
        Self {
            categories: categories.to_vec(),
        }
    }

    pub fn categories(&self) -> &[MaskCategory] {
        &self.categories
    }

    /// A pixel is valid when it lies inside the scene footprint and none of
    /// the selected categories is flagged.
    pub fn build(&self, qa: ArrayView2<'_, f32>, footprint: &ValidityMask) -> ValidityMask {
        let mut mask = ValidityMask::from_elem(qa.dim(), false);
        ndarray::Zip::from(&mut mask)
            .and(&qa)
            .and(footprint)
            .for_each(|m, &q, &inside| {
                let bits = q as u16;
                *m = inside && !self.categories.iter().any(|c| c.flagged(bits));
            });
        mask
    }
}

impl Default for QaMaskBuilder {
    fn default() -> Self {
        Self::new(&MaskCategory::DEFAULT)
    }
}

/// Harmonization parameters
#[derive(Debug, Clone)]
pub struct HarmonizationParams {
    /// Output grid (rows, cols); `None` keeps each scene's own grid
    pub target_shape: Option<(usize, usize)>,
    /// Quality categories excluded from compositing
    pub mask_categories: Vec<MaskCategory>,
}

impl Default for HarmonizationParams {
    fn default() -> Self {
        Self {
            target_shape: None,
            mask_categories: MaskCategory::DEFAULT.to_vec(),
        }
    }
}

/// Brings every sensor onto the ETM+ band naming and radiometric scale
#[derive(Debug, Clone)]
pub struct SensorHarmonizer {
    params: HarmonizationParams,
    mask_builder: QaMaskBuilder,
}

impl SensorHarmonizer {
    pub fn new(params: HarmonizationParams) -> Self {
        let mask_builder = QaMaskBuilder::new(&params.mask_categories);
        Self { params, mask_builder }
    }

    /// Harmonizer with default parameters
    pub fn standard() -> Self {
        Self::new(HarmonizationParams::default())
    }

    pub fn params(&self) -> &HarmonizationParams {
        &self.params
    }

    /// Harmonize the six reflectance bands of a raw scene.
    ///
    /// OLI bands are unmasked, renamed, resampled and pushed through the
    /// inverse regression `(x - 10000 * intercept) / slope`. TM and ETM+ bands
    /// are only subset, unmasked and resampled. Every output is cast to the
    /// 16-bit integer domain and keeps the input timestamp.
    pub fn harmonize(&self, image: &RasterImage, sensor: Sensor) -> LtResult<RasterImage> {
        log::debug!("Harmonizing {} scene {:?}", sensor, image.time_start);

        let native = sensor.reflectance_bands();
        let subset = if sensor.needs_harmonization() {
            image.clone().unmask(0.0).select_as(&native, &COMPOSITE_BANDS)?
        } else {
            image.select_as(&native, &COMPOSITE_BANDS)?.unmask(0.0)
        };

        let (names, mut data, mask) = self.resample(subset)?.into_parts();

        if sensor.needs_harmonization() {
            for (b, mut band) in data.outer_iter_mut().enumerate() {
                let offset = OLI_TO_ETM_INTERCEPTS[b] * REFLECTANCE_SCALE;
                let slope = OLI_TO_ETM_SLOPES[b];
                band.mapv_inplace(|v| (v - offset) / slope);
            }
        }
        data.mapv_inplace(to_short);

        let out = RasterImage::new(names, data, mask)?
            .with_properties_of(image)
            .with_sensor(sensor);
        Ok(out)
    }

    /// Harmonize a raw scene and mask it with its own quality band
    pub fn prepare(&self, image: &RasterImage) -> LtResult<RasterImage> {
        let sensor = image
            .sensor
            .ok_or_else(|| LtError::InvalidFormat("Scene carries no sensor identifier".to_string()))?;

        let harmonized = self.harmonize(image, sensor)?;
        let qa = image.band(QA_BAND)?;
        let mask = self.mask_builder.build(qa, image.mask());
        let mask = match self.params.target_shape {
            Some(shape) if shape != mask.dim() => resample_nearest_mask(&mask, shape),
            _ => mask,
        };
        harmonized.with_mask(mask)
    }

    fn resample(&self, image: RasterImage) -> LtResult<RasterImage> {
        let shape = match self.params.target_shape {
            Some(shape) if shape != image.shape() => shape,
            _ => return Ok(image),
        };
        log::debug!("Resampling {:?} -> {:?} with cubic convolution", image.shape(), shape);

        let bands: Vec<BandData> = image
            .data()
            .outer_iter()
            .map(|band| resample_bicubic(band, shape))
            .collect();
        let views: Vec<_> = bands.iter().map(|b| b.view()).collect();
        let data: BandStack = ndarray::stack(Axis(0), &views)
            .map_err(|e| LtError::Processing(format!("Shape error: {}", e)))?;
        let mask = resample_nearest_mask(image.mask(), shape);

        Ok(RasterImage::new(image.band_names().to_vec(), data, mask)?.with_properties_of(&image))
    }
}

/// Truncate toward zero and saturate to the signed 16-bit range
pub fn to_short(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.trunc().clamp(i16::MIN as f32, i16::MAX as f32)
}

/// Cubic-convolution kernel (a = -0.5)
fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        1.5 * t * t * t - 2.5 * t * t + 1.0
    } else if t <= 2.0 {
        -0.5 * t * t * t + 2.5 * t * t - 4.0 * t + 2.0
    } else {
        0.0
    }
}

/// Resample one band onto a `(rows, cols)` grid covering the same extent
pub fn resample_bicubic(band: ArrayView2<'_, f32>, shape: (usize, usize)) -> Array2<f32> {
    let (in_rows, in_cols) = band.dim();
    if (in_rows, in_cols) == shape {
        return band.to_owned();
    }
    let (out_rows, out_cols) = shape;
    let row_scale = in_rows as f64 / out_rows.max(1) as f64;
    let col_scale = in_cols as f64 / out_cols.max(1) as f64;

    Array2::from_shape_fn(shape, |(i, j)| {
        // Pixel-centre alignment
        let y = (i as f64 + 0.5) * row_scale - 0.5;
        let x = (j as f64 + 0.5) * col_scale - 0.5;
        let y0 = y.floor() as i64;
        let x0 = x.floor() as i64;
        let dy = y - y0 as f64;
        let dx = x - x0 as f64;

        let mut sum = 0.0;
        let mut weight_sum = 0.0;
        for m in -1..3i64 {
            for n in -1..3i64 {
                let yi = y0 + m;
                let xi = x0 + n;
                if yi < 0 || xi < 0 || yi >= in_rows as i64 || xi >= in_cols as i64 {
                    continue;
                }
                let weight = cubic_weight(dy - m as f64) * cubic_weight(dx - n as f64);
                sum += band[[yi as usize, xi as usize]] as f64 * weight;
                weight_sum += weight;
            }
        }

        if weight_sum.abs() > f64::EPSILON {
            (sum / weight_sum) as f32
        } else {
            0.0
        }
    })
}

/// Nearest-neighbour resampling of a validity mask
pub fn resample_nearest_mask(mask: &ValidityMask, shape: (usize, usize)) -> ValidityMask {
    let (in_rows, in_cols) = mask.dim();
    if in_rows == 0 || in_cols == 0 {
        return ValidityMask::from_elem(shape, false);
    }
    let (out_rows, out_cols) = shape;
    ValidityMask::from_shape_fn(shape, |(i, j)| {
        let si = ((i * in_rows) / out_rows.max(1)).min(in_rows - 1);
        let sj = ((j * in_cols) / out_cols.max(1)).min(in_cols - 1);
        mask[[si, sj]]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};

    fn scene(sensor: Sensor, values: [f32; 6], qa: f32) -> RasterImage {
        let mut names: Vec<String> = sensor.reflectance_bands().iter().map(|s| s.to_string()).collect();
        names.push(QA_BAND.to_string());
        let mut all = values.to_vec();
        all.push(qa);
        let data = BandStack::from_shape_fn((7, 2, 2), |(b, _, _)| all[b]);
        RasterImage::from_bands(names, data)
            .unwrap()
            .with_sensor(sensor)
            .with_time_start(Utc.with_ymd_and_hms(2014, 7, 15, 18, 30, 0).unwrap())
    }

    #[test]
    fn test_etm_passthrough() {
        let img = scene(Sensor::Etm, [100.0, 200.0, 300.0, 400.0, 500.0, 600.0], 66.0);
        let out = SensorHarmonizer::standard().harmonize(&img, Sensor::Etm).unwrap();
        assert_eq!(out.band_names(), &COMPOSITE_BANDS.map(String::from));
        assert_eq!(out.pixel(0, 0).to_vec(), vec![100.0, 200.0, 300.0, 400.0, 500.0, 600.0]);
        assert_eq!(out.time_start, img.time_start);
    }

    #[test]
    fn test_oli_regression() {
        let img = scene(Sensor::Oli, [1000.0; 6], 322.0);
        let out = SensorHarmonizer::standard().harmonize(&img, Sensor::Oli).unwrap();
        for b in 0..6 {
            let expected = to_short((1000.0 - OLI_TO_ETM_INTERCEPTS[b] * 10000.0) / OLI_TO_ETM_SLOPES[b]);
            assert_abs_diff_eq!(out.pixel(1, 1)[b], expected);
        }
        // B1 <- OLI B2: (1000 - 183) / 0.885 = 923.16...
        assert_eq!(out.band("B1").unwrap()[[0, 0]], 923.0);
    }

    #[test]
    fn test_masked_pixels_become_zero() {
        let img = scene(Sensor::Tm, [50.0; 6], 66.0);
        let mut mask = ValidityMask::from_elem((2, 2), true);
        mask[[0, 1]] = false;
        let img = img.with_mask(mask).unwrap();

        let out = SensorHarmonizer::standard().harmonize(&img, Sensor::Tm).unwrap();
        assert!(out.mask().iter().all(|&v| v));
        assert_eq!(out.band("B4").unwrap()[[0, 1]], 0.0);
    }

    #[test]
    fn test_qa_mask_categories() {
        let qa = Array2::from_shape_vec((1, 5), vec![66.0, 8.0 + 64.0, 16.0, 32.0, 4.0 + 768.0]).unwrap();
        let inside = ValidityMask::from_elem((1, 5), true);

        let mask = QaMaskBuilder::default().build(qa.view(), &inside);
        assert_eq!(mask.row(0).to_vec(), vec![true, false, false, false, true]);

        let strict = QaMaskBuilder::new(&[MaskCategory::Water, MaskCategory::Cirrus]).build(qa.view(), &inside);
        assert_eq!(strict.row(0).to_vec(), vec![true, true, true, true, false]);
    }

    #[test]
    fn test_prepare_applies_qa() {
        let img = scene(Sensor::Tm, [10.0; 6], 32.0);
        let out = SensorHarmonizer::standard().prepare(&img).unwrap();
        assert!(out.mask().iter().all(|&v| !v));
        assert_eq!(out.sensor, Some(Sensor::Tm));
    }

    #[test]
    fn test_to_short_saturates() {
        assert_eq!(to_short(40000.7), 32767.0);
        assert_eq!(to_short(-12.9), -12.0);
        assert_eq!(to_short(-40000.0), -32768.0);
    }

    #[test]
    fn test_bicubic_preserves_constant() {
        let band = Array2::from_elem((4, 4), 250.0f32);
        let out = resample_bicubic(band.view(), (8, 8));
        assert_eq!(out.dim(), (8, 8));
        for v in out.iter() {
            assert_abs_diff_eq!(*v, 250.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_mask_category_parse() {
        assert_eq!("Cloud".parse::<MaskCategory>().unwrap(), MaskCategory::Cloud);
        assert!("haze".parse::<MaskCategory>().is_err());
    }
}
