//! Temporal z-scores, ensemble composites and the series handed to segmentation

use crate::core::indices::{compute_index, SpectralIndex, INDEX_SCALE};
use crate::core::pixelwise::{map_pixels, mean_std};
use crate::types::{BandStack, ImageCollection, LtError, LtResult, RasterImage, ValidityMask};

/// Band name of a reduced ensemble value
pub const ENSEMBLE_BAND: &str = "Z";

/// Relative spread below which a pixel's series counts as constant
const DEGENERATE_STD: f64 = 1e-9;

/// Per-pixel reduction across ensemble members
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Max,
    Sum,
}

impl Reducer {
    /// Reduce the samples; `None` when there are none
    pub fn reduce(&self, values: &[f32]) -> Option<f32> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            Reducer::Mean => values.iter().sum::<f32>() / values.len() as f32,
            Reducer::Max => values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            Reducer::Sum => values.iter().sum(),
        })
    }

    /// Suffix letter used in ensemble codes (`TCC`, `ENM`, ...)
    fn code_letter(&self) -> char {
        match self {
            Reducer::Mean => 'C',
            Reducer::Max => 'M',
            Reducer::Sum => 'S',
        }
    }
}

impl std::str::FromStr for Reducer {
    type Err = LtError;

    fn from_str(s: &str) -> LtResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(Reducer::Mean),
            "max" => Ok(Reducer::Max),
            "sum" => Ok(Reducer::Sum),
            _ => Err(LtError::config("reducer", s)),
        }
    }
}

/// Fixed index sets combined into one ensemble value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsemblePreset {
    /// TCB, TCG, TCW
    TasseledCap,
    /// B5, B7, TCW, TCA, NDMI, NBR
    Ensemble6,
    /// B5, TCB, TCG, NBR
    Ensemble4,
}

impl EnsemblePreset {
    pub fn indices(&self) -> &'static [SpectralIndex] {
        match self {
            EnsemblePreset::TasseledCap => &[SpectralIndex::Tcb, SpectralIndex::Tcg, SpectralIndex::Tcw],
            EnsemblePreset::Ensemble6 => &[
                SpectralIndex::B5,
                SpectralIndex::B7,
                SpectralIndex::Tcw,
                SpectralIndex::Tca,
                SpectralIndex::Ndmi,
                SpectralIndex::Nbr,
            ],
            EnsemblePreset::Ensemble4 => &[
                SpectralIndex::B5,
                SpectralIndex::Tcb,
                SpectralIndex::Tcg,
                SpectralIndex::Nbr,
            ],
        }
    }

    /// Preset name; ensemble codes are the name plus a reducer letter
    pub fn name(&self) -> &'static str {
        match self {
            EnsemblePreset::TasseledCap => "TC",
            EnsemblePreset::Ensemble6 => "EN",
            EnsemblePreset::Ensemble4 => "EN1",
        }
    }
}

impl std::str::FromStr for EnsemblePreset {
    type Err = LtError;

    fn from_str(s: &str) -> LtResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "TC" => Ok(EnsemblePreset::TasseledCap),
            "EN" => Ok(EnsemblePreset::Ensemble6),
            "EN1" => Ok(EnsemblePreset::Ensemble4),
            _ => Err(LtError::config("ensemble preset", s)),
        }
    }
}

/// What the segmentation series is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LtIndexSpec {
    /// One flipped index
    Index(SpectralIndex),
    /// One flipped index, z-scored over time and scaled by 1000
    Standardized(SpectralIndex),
    /// Standardized preset members reduced per pixel, scaled by 1000
    Ensemble { preset: EnsemblePreset, reducer: Reducer },
}

impl LtIndexSpec {
    /// Resolve an index code, or a preset name plus reducer name
    pub fn from_config(index: &str, reducer: Option<&str>) -> LtResult<Self> {
        match reducer {
            Some(reducer) => Ok(LtIndexSpec::Ensemble {
                preset: index.parse()?,
                reducer: reducer.parse()?,
            }),
            None => index.parse(),
        }
    }

    /// Code naming the series band (`NBR`, `NBRz`, `ENC`, `TCM`, `ENS1`, ...)
    pub fn code(&self) -> String {
        match self {
            LtIndexSpec::Index(index) => index.name().to_string(),
            LtIndexSpec::Standardized(index) => format!("{}z", index.name()),
            LtIndexSpec::Ensemble { preset, reducer } => match preset {
                EnsemblePreset::Ensemble4 => format!("EN{}1", reducer.code_letter()),
                _ => format!("{}{}", preset.name(), reducer.code_letter()),
            },
        }
    }
}

impl std::str::FromStr for LtIndexSpec {
    type Err = LtError;

    fn from_str(s: &str) -> LtResult<Self> {
        let trimmed = s.trim();
        let ensemble = |preset, reducer| Ok(LtIndexSpec::Ensemble { preset, reducer });
        match trimmed.to_uppercase().as_str() {
            "TCC" => return ensemble(EnsemblePreset::TasseledCap, Reducer::Mean),
            "TCM" => return ensemble(EnsemblePreset::TasseledCap, Reducer::Max),
            "TCS" => return ensemble(EnsemblePreset::TasseledCap, Reducer::Sum),
            "ENC" => return ensemble(EnsemblePreset::Ensemble6, Reducer::Mean),
            "ENM" => return ensemble(EnsemblePreset::Ensemble6, Reducer::Max),
            "ENS" => return ensemble(EnsemblePreset::Ensemble6, Reducer::Sum),
            "ENC1" => return ensemble(EnsemblePreset::Ensemble4, Reducer::Mean),
            "ENM1" => return ensemble(EnsemblePreset::Ensemble4, Reducer::Max),
            "ENS1" => return ensemble(EnsemblePreset::Ensemble4, Reducer::Sum),
            _ => {}
        }

        if let Some(base) = trimmed.strip_suffix('z') {
            if let Ok(index) = base.parse::<SpectralIndex>() {
                return Ok(LtIndexSpec::Standardized(index));
            }
        }
        trimmed
            .parse::<SpectralIndex>()
            .map(LtIndexSpec::Index)
            .map_err(|_| LtError::config("index", s))
    }
}

/// Per-pixel temporal z-score of every band of a series.
///
/// Mean and population standard deviation are taken over the valid samples
/// of each pixel. Pixels whose series is constant map to 0; masked samples
/// stay masked.
pub fn standardize(series: &ImageCollection) -> LtResult<ImageCollection> {
    let first = match series.first() {
        Some(first) => first,
        None => return Ok(ImageCollection::new()),
    };
    let shape = first.shape();
    let (rows, cols) = shape;
    let band_count = first.band_count();
    for img in series.iter() {
        if img.shape() != shape || img.band_names() != first.band_names() {
            return Err(LtError::Processing(format!(
                "Series image {:?} {:?} does not match {:?} {:?}",
                img.band_names(),
                img.shape(),
                first.band_names(),
                shape
            )));
        }
    }
    log::info!("Standardizing {} image(s) of {:?}", series.len(), first.band_names());

    let images = series.images();
    let stats: Vec<Vec<Option<(f64, f64)>>> = (0..band_count)
        .map(|b| {
            map_pixels(shape, |r, c| {
                let samples: Vec<f64> = images
                    .iter()
                    .filter(|img| img.is_valid(r, c))
                    .map(|img| img.data()[[b, r, c]] as f64)
                    .collect();
                mean_std(&samples)
            })
        })
        .collect();

    images
        .iter()
        .map(|img| {
            let data = BandStack::from_shape_fn((band_count, rows, cols), |(b, r, c)| {
                if !img.is_valid(r, c) {
                    return 0.0;
                }
                match stats[b][r * cols + c] {
                    Some((mean, std)) if std > DEGENERATE_STD * (1.0 + mean.abs()) => {
                        ((img.data()[[b, r, c]] as f64 - mean) / std) as f32
                    }
                    _ => 0.0,
                }
            });
            Ok(RasterImage::new(img.band_names().to_vec(), data, img.mask().clone())?.with_properties_of(img))
        })
        .collect()
}

/// Flipped index of every image in the stack
fn index_series(stack: &ImageCollection, index: SpectralIndex, flip: bool) -> LtResult<ImageCollection> {
    stack.iter().map(|img| compute_index(img, index, flip)).collect()
}

/// Flipped index, z-scored over the stack and scaled by 1000
pub fn standardize_index(stack: &ImageCollection, index: SpectralIndex) -> LtResult<ImageCollection> {
    let z = standardize(&index_series(stack, index, true)?)?;
    Ok(z.into_iter().map(|img| img.map_values(|v| v * INDEX_SCALE)).collect())
}

/// Ensemble composite: every preset member is flipped and standardized on
/// its own, then the members are reduced per pixel and year and scaled by
/// 1000. Output images carry one band named `Z`.
pub fn ensemble_composite(
    stack: &ImageCollection,
    preset: EnsemblePreset,
    reducer: Reducer,
) -> LtResult<ImageCollection> {
    log::info!("Building {:?} ensemble with {:?} reducer over {} year(s)", preset, reducer, stack.len());

    let members = preset
        .indices()
        .iter()
        .map(|&index| standardize(&index_series(stack, index, true)?))
        .collect::<LtResult<Vec<ImageCollection>>>()?;

    stack
        .iter()
        .enumerate()
        .map(|(t, source)| {
            let shape = source.shape();
            let year_members: Vec<&RasterImage> = members.iter().map(|m| &m.images()[t]).collect();
            let reduced = map_pixels(shape, |r, c| {
                let values: Vec<f32> = year_members
                    .iter()
                    .filter(|img| img.is_valid(r, c))
                    .map(|img| img.data()[[0, r, c]])
                    .collect();
                reducer.reduce(&values)
            });

            let (rows, cols) = shape;
            let mut data = BandStack::zeros((1, rows, cols));
            let mut mask = ValidityMask::from_elem(shape, false);
            for (idx, value) in reduced.into_iter().enumerate() {
                if let Some(v) = value {
                    data[[0, idx / cols, idx % cols]] = v * INDEX_SCALE;
                    mask[[idx / cols, idx % cols]] = true;
                }
            }
            Ok(RasterImage::new(vec![ENSEMBLE_BAND.to_string()], data, mask)?.with_properties_of(source))
        })
        .collect()
}

/// The series handed to the segmentation oracle.
///
/// A plain index yields the flipped index plus one unflipped `ftv_<index>`
/// band per fit-to-vertex index. Standardized and ensemble series yield a
/// single band named after the code.
pub fn build_lt_collection(
    stack: &ImageCollection,
    kind: LtIndexSpec,
    ftv: &[SpectralIndex],
) -> LtResult<ImageCollection> {
    let code = kind.code();
    log::info!("Building segmentation series '{}' with {} fit-to-vertex band(s)", code, ftv.len());

    match kind {
        LtIndexSpec::Index(index) => stack
            .iter()
            .map(|img| {
                let mut out = compute_index(img, index, true)?;
                for &f in ftv {
                    let name = format!("ftv_{}", f.name().to_lowercase());
                    let band = compute_index(img, f, false)?.rename(&[name.as_str()])?;
                    out = out.add_bands(&band)?;
                }
                Ok(out)
            })
            .collect(),
        LtIndexSpec::Standardized(index) => standardize_index(stack, index)?
            .into_iter()
            .map(|img| img.rename(&[code.as_str()]))
            .collect(),
        LtIndexSpec::Ensemble { preset, reducer } => ensemble_composite(stack, preset, reducer)?
            .into_iter()
            .map(|img| img.rename(&[code.as_str()]))
            .collect(),
    }
}
