use crate::types::{BandData, LtError, LtResult, RasterImage, ValidityMask, COMPOSITE_BANDS};
use ndarray::{ArrayView2, Axis, Zip};

/// Tasseled-cap brightness coefficients for B1, B2, B3, B4, B5, B7
pub const TC_BRIGHTNESS: [f32; 6] = [0.2043, 0.4158, 0.5524, 0.5741, 0.3124, 0.2303];
/// Tasseled-cap greenness coefficients
pub const TC_GREENNESS: [f32; 6] = [-0.1603, -0.2819, -0.4934, 0.7940, -0.0002, -0.1446];
/// Tasseled-cap wetness coefficients
pub const TC_WETNESS: [f32; 6] = [0.0315, 0.2021, 0.3102, 0.1594, -0.6806, -0.6109];

/// Tasseled-cap band names
pub const TC_BANDS: [&str; 4] = ["TCB", "TCG", "TCW", "TCA"];

/// Scale applied to normalized differences and z-scores
pub const INDEX_SCALE: f32 = 1000.0;

/// Spectral indices derivable from a composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectralIndex {
    B1,
    B2,
    B3,
    B4,
    B5,
    B7,
    /// Normalized burn ratio (B4, B7)
    Nbr,
    /// Normalized difference vegetation index (B4, B3)
    Ndvi,
    /// Normalized difference snow index (B2, B5)
    Ndsi,
    /// Normalized difference moisture index (B4, B5)
    Ndmi,
    Tcb,
    Tcg,
    Tcw,
    Tca,
}

impl SpectralIndex {
    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::B1 => "B1",
            SpectralIndex::B2 => "B2",
            SpectralIndex::B3 => "B3",
            SpectralIndex::B4 => "B4",
            SpectralIndex::B5 => "B5",
            SpectralIndex::B7 => "B7",
            SpectralIndex::Nbr => "NBR",
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Ndsi => "NDSI",
            SpectralIndex::Ndmi => "NDMI",
            SpectralIndex::Tcb => "TCB",
            SpectralIndex::Tcg => "TCG",
            SpectralIndex::Tcw => "TCW",
            SpectralIndex::Tca => "TCA",
        }
    }

    /// Whether the index decreases with disturbance and is negated when flipped
    pub fn flips(&self) -> bool {
        matches!(
            self,
            SpectralIndex::B4
                | SpectralIndex::Nbr
                | SpectralIndex::Ndvi
                | SpectralIndex::Ndsi
                | SpectralIndex::Ndmi
                | SpectralIndex::Tcg
                | SpectralIndex::Tcw
                | SpectralIndex::Tca
        )
    }

    /// Band pair of a normalized-difference index
    fn normalized_pair(&self) -> Option<(&'static str, &'static str)> {
        match self {
            SpectralIndex::Nbr => Some(("B4", "B7")),
            SpectralIndex::Ndvi => Some(("B4", "B3")),
            SpectralIndex::Ndsi => Some(("B2", "B5")),
            SpectralIndex::Ndmi => Some(("B4", "B5")),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpectralIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for SpectralIndex {
    type Err = LtError;

    fn from_str(s: &str) -> LtResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "B1" => Ok(SpectralIndex::B1),
            "B2" => Ok(SpectralIndex::B2),
            "B3" => Ok(SpectralIndex::B3),
            "B4" => Ok(SpectralIndex::B4),
            "B5" => Ok(SpectralIndex::B5),
            "B7" => Ok(SpectralIndex::B7),
            "NBR" => Ok(SpectralIndex::Nbr),
            "NDVI" => Ok(SpectralIndex::Ndvi),
            "NDSI" => Ok(SpectralIndex::Ndsi),
            "NDMI" => Ok(SpectralIndex::Ndmi),
            "TCB" => Ok(SpectralIndex::Tcb),
            "TCG" => Ok(SpectralIndex::Tcg),
            "TCW" => Ok(SpectralIndex::Tcw),
            "TCA" => Ok(SpectralIndex::Tca),
            _ => Err(LtError::config("index", s)),
        }
    }
}

/// Compute one index as a single-band float image named after the index.
///
/// With `flip` set, disturbance-negative indices are negated so that larger
/// values mean more disturbance for every index.
pub fn compute_index(image: &RasterImage, index: SpectralIndex, flip: bool) -> LtResult<RasterImage> {
    let (band, mask) = match index {
        SpectralIndex::B1
        | SpectralIndex::B2
        | SpectralIndex::B3
        | SpectralIndex::B4
        | SpectralIndex::B5
        | SpectralIndex::B7 => (image.band(index.name())?.to_owned(), image.mask().clone()),
        SpectralIndex::Nbr | SpectralIndex::Ndvi | SpectralIndex::Ndsi | SpectralIndex::Ndmi => {
            let (a, b) = index
                .normalized_pair()
                .ok_or_else(|| LtError::Processing(format!("{} is not a normalized difference", index)))?;
            normalized_difference(image.band(a)?, image.band(b)?, image.mask())
        }
        SpectralIndex::Tcb | SpectralIndex::Tcg | SpectralIndex::Tcw | SpectralIndex::Tca => {
            let tc = TasseledCap::from_image(image)?;
            match index {
                SpectralIndex::Tcb => (tc.brightness, image.mask().clone()),
                SpectralIndex::Tcg => (tc.greenness, image.mask().clone()),
                SpectralIndex::Tcw => (tc.wetness, image.mask().clone()),
                _ => (tc.angle, tc.angle_mask),
            }
        }
    };

    let sign = if flip && index.flips() { -1.0 } else { 1.0 };
    let band = band.mapv(|v| v * sign);
    Ok(RasterImage::from_single_band(index.name(), band, mask)?.with_properties_of(image))
}

/// `(a - b) / (a + b) * 1000`.
///
/// Pixels where either input is negative or the denominator is zero are
/// masked, so valid outputs stay within [-1000, 1000].
pub fn normalized_difference(
    a: ArrayView2<'_, f32>,
    b: ArrayView2<'_, f32>,
    mask: &ValidityMask,
) -> (BandData, ValidityMask) {
    let mut out = BandData::zeros(a.dim());
    let mut out_mask = mask.clone();
    Zip::from(&mut out)
        .and(&mut out_mask)
        .and(&a)
        .and(&b)
        .for_each(|o, m, &x, &y| {
            let sum = x + y;
            if x < 0.0 || y < 0.0 || sum == 0.0 {
                *m = false;
            } else if *m {
                *o = (x - y) / sum * INDEX_SCALE;
            }
        });
    (out, out_mask)
}

/// Tasseled-cap components of one image
struct TasseledCap {
    brightness: BandData,
    greenness: BandData,
    wetness: BandData,
    angle: BandData,
    /// Image mask minus pixels where brightness is zero
    angle_mask: ValidityMask,
}

impl TasseledCap {
    fn from_image(image: &RasterImage) -> LtResult<Self> {
        let bands = image.select(&COMPOSITE_BANDS)?;
        let weighted = |coeffs: &[f32; 6]| -> BandData {
            let mut acc = BandData::zeros(bands.shape());
            for (b, band) in bands.data().outer_iter().enumerate() {
                acc.scaled_add(coeffs[b], &band);
            }
            acc
        };
        let brightness = weighted(&TC_BRIGHTNESS);
        let greenness = weighted(&TC_GREENNESS);
        let wetness = weighted(&TC_WETNESS);

        let mut angle = BandData::zeros(bands.shape());
        let mut angle_mask = image.mask().clone();
        Zip::from(&mut angle)
            .and(&mut angle_mask)
            .and(&brightness)
            .and(&greenness)
            .for_each(|a, m, &tcb, &tcg| {
                if tcb == 0.0 {
                    *m = false;
                } else {
                    *a = (tcg / tcb).atan().to_degrees() * 100.0;
                }
            });

        Ok(Self {
            brightness,
            greenness,
            wetness,
            angle,
            angle_mask,
        })
    }
}

/// Tasseled-cap brightness, greenness, wetness and angle as one image.
///
/// Angle is `atan(TCG / TCB)` in degrees x 100. The shared mask also drops
/// pixels where brightness is zero, since the angle is undefined there.
pub fn tasseled_cap(image: &RasterImage) -> LtResult<RasterImage> {
    let tc = TasseledCap::from_image(image)?;
    let stacked = ndarray::stack(
        Axis(0),
        &[tc.brightness.view(), tc.greenness.view(), tc.wetness.view(), tc.angle.view()],
    )
    .map_err(|e| LtError::Processing(format!("Shape error: {}", e)))?;

    Ok(RasterImage::new(TC_BANDS.iter().map(|b| b.to_string()).collect(), stacked, tc.angle_mask)?
        .with_properties_of(image))
}
