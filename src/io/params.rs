use crate::core::pipeline::{LtParams, PipelineConfig, PipelinePlan};
use crate::types::{LtError, LtResult};
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root `<runConfig>` document: pipeline settings plus segmentation parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    pub pipeline: PipelineConfig,
    pub segmentation: LtParams,
}

impl RunConfig {
    /// Validated plan for this configuration
    pub fn plan(&self) -> LtResult<PipelinePlan> {
        PipelinePlan::from_config(&self.pipeline, &self.segmentation)
    }
}

/// Reader for XML run configuration documents
pub struct RunConfigReader;

impl RunConfigReader {
    /// Parse a run configuration document; missing elements keep their defaults
    pub fn parse(xml_content: &str) -> LtResult<RunConfig> {
        from_str::<RunConfig>(xml_content)
            .map_err(|e| LtError::XmlParsing(format!("Failed to parse run configuration: {}", e)))
    }

    pub fn read_file<P: AsRef<Path>>(path: P) -> LtResult<RunConfig> {
        let path = path.as_ref();
        log::info!("Reading run configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const RUN_CONFIG: &str = r#"
        <runConfig>
          <pipeline>
            <aoi>
              <minLon>-123.5</minLon>
              <maxLon>-122.5</maxLon>
              <minLat>43.5</minLat>
              <maxLat>44.5</maxLat>
            </aoi>
            <startYear>1990</startYear>
            <endYear>2000</endYear>
            <startDay>11-01</startDay>
            <endDay>02-28</endDay>
            <sensor>LT05</sensor>
            <sensor>LE07</sensor>
            <maskCategory>cloud</maskCategory>
            <maskCategory>water</maskCategory>
            <index>TCW</index>
            <ftvIndex>NBR</ftvIndex>
            <ftvIndex>B5</ftvIndex>
            <maxSegments>5</maxSegments>
            <gridRows>64</gridRows>
            <gridCols>32</gridCols>
          </pipeline>
          <segmentation>
            <spikeThreshold>0.75</spikeThreshold>
            <preventOneYearRecovery>false</preventOneYearRecovery>
          </segmentation>
        </runConfig>
    "#;

    #[test]
    fn test_parse_full_document() {
        let config = RunConfigReader::parse(RUN_CONFIG).unwrap();
        let pipeline = &config.pipeline;
        assert_eq!(pipeline.aoi.min_lon, -123.5);
        assert_eq!((pipeline.start_year, pipeline.end_year), (1990, 2000));
        assert_eq!(pipeline.sensors, vec!["LT05", "LE07"]);
        assert_eq!(pipeline.mask_categories, vec!["cloud", "water"]);
        assert_eq!(pipeline.ftv_indices, vec!["NBR", "B5"]);
        assert_eq!((pipeline.grid_rows, pipeline.grid_cols), (64, 32));
        assert_eq!(pipeline.max_segments, Some(5));

        assert_eq!(config.segmentation.spike_threshold, 0.75);
        assert!(!config.segmentation.prevent_one_year_recovery);
        assert_eq!(config.segmentation.recovery_threshold, 0.25);

        let plan = config.plan().unwrap();
        assert!(plan.window.wraps_year());
        assert_eq!(plan.years.len(), 11);
        assert_eq!(plan.lt_params.max_segments, 5);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RunConfigReader::parse("<runConfig></runConfig>").unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_read_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(RUN_CONFIG.as_bytes()).unwrap();
        let config = RunConfigReader::read_file(file.path()).unwrap();
        assert_eq!(config.pipeline.index, "TCW");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            RunConfigReader::read_file("/nonexistent/run.xml"),
            Err(LtError::Io(_))
        ));
    }

    #[test]
    fn test_malformed_document() {
        let result = RunConfigReader::parse("<runConfig><pipeline><startYear>soon</startYear></pipeline></runConfig>");
        assert!(matches!(result, Err(LtError::XmlParsing(_))));
    }
}
