use crate::core::collector::{ObservationCollector, ObservationSource};
use crate::core::harmonize::{HarmonizationParams, MaskCategory, SensorHarmonizer};
use crate::core::indices::SpectralIndex;
use crate::core::medoid::{composite_timestamp, MedoidCompositor};
use crate::core::standardize::{build_lt_collection, LtIndexSpec};
use crate::core::vertices::{SegmentationOutput, VertexStackUnpacker};
use crate::core::window::AnnualWindow;
use crate::types::{BoundingBox, ImageCollection, LtError, LtResult, RasterImage, Sensor};
use chrono::Datelike;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Run configuration as supplied by the caller; validated by [`PipelinePlan::from_config`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub aoi: BoundingBox,
    pub start_year: i32,
    pub end_year: i32,
    /// Window start as `MM-DD`
    pub start_day: String,
    /// Window end as `MM-DD`, exclusive
    pub end_day: String,
    #[serde(rename = "sensor")]
    pub sensors: Vec<String>,
    #[serde(rename = "maskCategory")]
    pub mask_categories: Vec<String>,
    /// Index code (`NBR`, `NBRz`, `TCC`, ...) or ensemble preset name when `reducer` is set
    pub index: String,
    pub reducer: Option<String>,
    #[serde(rename = "ftvIndex")]
    pub ftv_indices: Vec<String>,
    /// Overrides the segmentation parameters' `maxSegments` when set
    pub max_segments: Option<usize>,
    pub grid_rows: usize,
    pub grid_cols: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            aoi: BoundingBox::default(),
            start_year: 1984,
            end_year: 2017,
            start_day: "06-10".to_string(),
            end_day: "09-20".to_string(),
            sensors: Sensor::ALL.iter().map(|s| s.code().to_string()).collect(),
            mask_categories: vec!["cloud".to_string(), "shadow".to_string(), "snow".to_string()],
            index: "NBR".to_string(),
            reducer: None,
            ftv_indices: Vec::new(),
            max_segments: None,
            grid_rows: 256,
            grid_cols: 256,
        }
    }
}

/// Segmentation run parameters handed to the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtParams {
    pub max_segments: usize,
    pub spike_threshold: f64,
    pub vertex_count_overshoot: usize,
    pub prevent_one_year_recovery: bool,
    pub recovery_threshold: f64,
    pub pval_threshold: f64,
    pub best_model_proportion: f64,
    pub min_observations_needed: usize,
}

impl Default for LtParams {
    fn default() -> Self {
        Self {
            max_segments: 6,
            spike_threshold: 0.9,
            vertex_count_overshoot: 3,
            prevent_one_year_recovery: true,
            recovery_threshold: 0.25,
            pval_threshold: 0.05,
            best_model_proportion: 0.75,
            min_observations_needed: 6,
        }
    }
}

/// Temporal segmentation of an index series
///
/// Implementations receive the time-ordered series built by
/// [`build_lt_collection`] and return a per-pixel table of
/// (year, raw, fitted, is-vertex) rows with one column per series image.
pub trait SegmentationOracle {
    fn segment(&self, series: &ImageCollection, params: &LtParams) -> LtResult<SegmentationOutput>;
}

/// A fully validated run
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub aoi: BoundingBox,
    pub years: Vec<i32>,
    pub window: AnnualWindow,
    pub sensors: Vec<Sensor>,
    pub mask_categories: Vec<MaskCategory>,
    pub index: LtIndexSpec,
    pub ftv_indices: Vec<SpectralIndex>,
    pub grid: (usize, usize),
    pub lt_params: LtParams,
    pub unpacker: VertexStackUnpacker,
}

impl PipelinePlan {
    /// Validate every name and range in the configuration before any pixel work.
    ///
    /// The oracle and the vertex stack share one vertex count: `config.max_segments`
    /// when given (with a warning if it disagrees with `params`), else `params.max_segments`.
    pub fn from_config(config: &PipelineConfig, params: &LtParams) -> LtResult<Self> {
        if config.end_year < config.start_year {
            return Err(LtError::config(
                "year range",
                format!("{}..{}", config.start_year, config.end_year),
            ));
        }
        if config.grid_rows == 0 || config.grid_cols == 0 {
            return Err(LtError::config(
                "grid shape",
                format!("{}x{}", config.grid_rows, config.grid_cols),
            ));
        }
        if config.sensors.is_empty() {
            return Err(LtError::config("sensor", ""));
        }

        let window = AnnualWindow::new(config.start_year, &config.start_day, &config.end_day)?;
        let sensors = config
            .sensors
            .iter()
            .map(|s| s.parse())
            .collect::<LtResult<Vec<Sensor>>>()?;
        let mask_categories = config
            .mask_categories
            .iter()
            .map(|c| c.parse())
            .collect::<LtResult<Vec<MaskCategory>>>()?;
        let index = LtIndexSpec::from_config(&config.index, config.reducer.as_deref())?;
        let ftv_indices = config
            .ftv_indices
            .iter()
            .map(|f| f.parse())
            .collect::<LtResult<Vec<SpectralIndex>>>()?;
        if !ftv_indices.is_empty() && !matches!(index, LtIndexSpec::Index(_)) {
            log::warn!("Fit-to-vertex indices are ignored for series '{}'", index.code());
        }

        let max_segments = match config.max_segments {
            Some(n) if n != params.max_segments => {
                log::warn!(
                    "Pipeline maxSegments {} overrides segmentation maxSegments {}",
                    n,
                    params.max_segments
                );
                n
            }
            Some(n) => n,
            None => params.max_segments,
        };
        let unpacker = VertexStackUnpacker::new(max_segments)?;
        let lt_params = LtParams {
            max_segments,
            ..params.clone()
        };

        log::info!(
            "Planned {}..={} over {:?}: series '{}', {} sensor(s), window {}..{}",
            config.start_year,
            config.end_year,
            config.aoi,
            index.code(),
            sensors.len(),
            window.start,
            window.end
        );

        Ok(Self {
            aoi: config.aoi,
            years: (config.start_year..=config.end_year).collect(),
            window,
            sensors,
            mask_categories,
            index,
            ftv_indices,
            grid: (config.grid_rows, config.grid_cols),
            lt_params,
            unpacker,
        })
    }

    /// Harmonizer resampling onto the plan grid with the plan's mask categories
    pub fn harmonizer(&self) -> SensorHarmonizer {
        SensorHarmonizer::new(HarmonizationParams {
            target_shape: Some(self.grid),
            mask_categories: self.mask_categories.clone(),
        })
    }
}

/// Builds the annual composite stack and its derived collections
pub struct AnnualStackBuilder<'a, S: ObservationSource> {
    plan: &'a PipelinePlan,
    collector: ObservationCollector<'a, S>,
    compositor: MedoidCompositor,
}

impl<'a, S: ObservationSource> AnnualStackBuilder<'a, S> {
    pub fn new(plan: &'a PipelinePlan, source: &'a S) -> Self {
        Self {
            plan,
            collector: ObservationCollector::new(source, plan.harmonizer(), &plan.sensors),
            compositor: MedoidCompositor::new(),
        }
    }

    /// Harmonized, masked observations of one year's window
    pub fn observations(&self, year: i32) -> LtResult<ImageCollection> {
        self.collector.collect(&self.plan.window.for_year(year), &self.plan.aoi)
    }

    /// Medoid composite of one year
    pub fn build_year(&self, year: i32) -> LtResult<RasterImage> {
        let observations = self.observations(year)?;
        self.compositor.composite_year(year, &observations, self.plan.grid)
    }

    /// One composite per planned year, in year order
    pub fn build_sr_collection(&self) -> LtResult<ImageCollection> {
        let composites = self.map_years(|year| self.build_year(year))?;
        Ok(ImageCollection::from_images(composites))
    }

    /// Per-year count of clear observations, stamped like the composites
    pub fn build_clear_pixel_count_collection(&self) -> LtResult<ImageCollection> {
        let counts = self.map_years(|year| self.clear_pixel_count(year, &self.observations(year)?))?;
        Ok(ImageCollection::from_images(counts))
    }

    /// Composites and clear counts together, querying each year's observations once
    pub fn build_annual_collections(&self) -> LtResult<(ImageCollection, ImageCollection)> {
        let pairs = self.map_years(|year| {
            let observations = self.observations(year)?;
            let composite = self.compositor.composite_year(year, &observations, self.plan.grid)?;
            Ok((composite, self.clear_pixel_count(year, &observations)?))
        })?;
        let (composites, counts): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Ok((ImageCollection::from_images(composites), ImageCollection::from_images(counts)))
    }

    fn clear_pixel_count(&self, year: i32, observations: &ImageCollection) -> LtResult<RasterImage> {
        Ok(MedoidCompositor::clear_pixel_count(observations, self.plan.grid)?.with_time_start(composite_timestamp(year)?))
    }

    /// Segmentation series built from an annual stack
    pub fn build_lt_collection(&self, annual_stack: &ImageCollection) -> LtResult<ImageCollection> {
        build_lt_collection(annual_stack, self.plan.index, &self.plan.ftv_indices)
    }

    #[cfg(feature = "parallel")]
    fn map_years<T, F>(&self, f: F) -> LtResult<Vec<T>>
    where
        T: Send,
        F: Fn(i32) -> LtResult<T> + Sync + Send,
    {
        self.plan.years.par_iter().map(|&year| f(year)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn map_years<T, F>(&self, f: F) -> LtResult<Vec<T>>
    where
        T: Send,
        F: Fn(i32) -> LtResult<T> + Sync + Send,
    {
        self.plan.years.iter().map(|&year| f(year)).collect()
    }
}

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Medoid composite per year
    pub annual_stack: ImageCollection,
    /// Clear observation count per year
    pub clear_counts: ImageCollection,
    /// Series handed to the oracle
    pub index_series: ImageCollection,
    /// Oracle output
    pub segmentation: SegmentationOutput,
    /// `3 * (maxSegments + 1)` vertex bands
    pub vertex_stack: RasterImage,
}

/// Composite, index, segment and unpack the planned years
pub fn run_pipeline<S, O>(plan: &PipelinePlan, source: &S, oracle: &O) -> LtResult<PipelineOutput>
where
    S: ObservationSource,
    O: SegmentationOracle,
{
    let builder = AnnualStackBuilder::new(plan, source);
    let (annual_stack, clear_counts) = builder.build_annual_collections()?;
    let index_series = builder.build_lt_collection(&annual_stack)?;

    log::info!("Segmenting {} year(s) of '{}'", index_series.len(), plan.index.code());
    let segmentation = oracle.segment(&index_series, &plan.lt_params)?;
    if segmentation.shape() != plan.grid {
        return Err(LtError::Processing(format!(
            "Segmentation grid {:?} does not match plan grid {:?}",
            segmentation.shape(),
            plan.grid
        )));
    }
    let vertex_stack = plan.unpacker.unpack(&segmentation)?;

    Ok(PipelineOutput {
        annual_stack,
        clear_counts,
        index_series,
        segmentation,
        vertex_stack,
    })
}

/// Flatten a time-ordered collection into one image with bands `<band>_<year>`
pub fn collection_to_stack(collection: &ImageCollection) -> LtResult<RasterImage> {
    let mut stacked: Option<RasterImage> = None;
    for img in collection.iter() {
        let year = img
            .date()
            .ok_or_else(|| LtError::InvalidFormat("Cannot stack an image without a timestamp".to_string()))?
            .year();
        let names: Vec<String> = img.band_names().iter().map(|b| format!("{}_{}", b, year)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let renamed = img.clone().rename(&names)?;
        stacked = Some(match stacked {
            Some(acc) => acc.add_bands(&renamed)?,
            None => renamed,
        });
    }
    stacked.ok_or_else(|| LtError::Processing("Cannot stack an empty collection".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BandData;
    use crate::types::ValidityMask;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_default_plan() {
        let plan = PipelinePlan::from_config(&PipelineConfig::default(), &LtParams::default()).unwrap();
        assert_eq!(plan.years.len(), 34);
        assert_eq!(plan.sensors, Sensor::ALL.to_vec());
        assert_eq!(plan.index, LtIndexSpec::Index(SpectralIndex::Nbr));
        assert_eq!(plan.unpacker.band_names().len(), 21);
        assert!(!plan.window.wraps_year());
    }

    #[test]
    fn test_plan_rejects_bad_names() {
        let params = LtParams::default();
        let cases: Vec<(PipelineConfig, &str)> = vec![
            (PipelineConfig { index: "EVI".into(), ..Default::default() }, "index"),
            (PipelineConfig { sensors: vec!["LM01".into()], ..Default::default() }, "sensor"),
            (PipelineConfig { mask_categories: vec!["haze".into()], ..Default::default() }, "mask category"),
            (
                PipelineConfig { index: "EN".into(), reducer: Some("median".into()), ..Default::default() },
                "reducer",
            ),
            (PipelineConfig { max_segments: Some(0), ..Default::default() }, "maxSegments"),
            (PipelineConfig { start_year: 2010, end_year: 2000, ..Default::default() }, "year range"),
        ];
        for (config, expected) in cases {
            match PipelinePlan::from_config(&config, &params) {
                Err(LtError::Configuration { parameter, .. }) => assert_eq!(parameter, expected),
                other => panic!("expected {} error, got {:?}", expected, other),
            }
        }
    }

    #[test]
    fn test_max_segments_from_params_unless_overridden() {
        let params = LtParams { max_segments: 8, ..Default::default() };
        let plan = PipelinePlan::from_config(&PipelineConfig::default(), &params).unwrap();
        assert_eq!(plan.lt_params.max_segments, 8);
        assert_eq!(plan.unpacker.vertex_slots(), 9);

        let zero = LtParams { max_segments: 0, ..Default::default() };
        assert!(PipelinePlan::from_config(&PipelineConfig::default(), &zero).is_err());

        let config = PipelineConfig { max_segments: Some(4), ..Default::default() };
        let params = LtParams { max_segments: 9, ..Default::default() };
        let plan = PipelinePlan::from_config(&config, &params).unwrap();
        assert_eq!(plan.lt_params.max_segments, 4);
        assert_eq!(plan.unpacker.vertex_slots(), 5);
        assert_eq!(plan.lt_params.spike_threshold, 0.9);
    }

    #[test]
    fn test_collection_to_stack() {
        let images: ImageCollection = [1999, 2000]
            .iter()
            .map(|&year| {
                RasterImage::from_single_band("NBR", BandData::from_elem((1, 1), year as f32), ValidityMask::from_elem((1, 1), true))
                    .unwrap()
                    .with_time_start(Utc.with_ymd_and_hms(year, 9, 1, 0, 0, 0).unwrap())
            })
            .collect();
        let stack = collection_to_stack(&images).unwrap();
        assert_eq!(stack.band_names(), &["NBR_1999".to_string(), "NBR_2000".to_string()]);
        assert_eq!(stack.band("NBR_2000").unwrap()[[0, 0]], 2000.0);

        assert!(collection_to_stack(&ImageCollection::new()).is_err());
    }
}
