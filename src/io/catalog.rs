use crate::core::collector::ObservationSource;
use crate::types::{BoundingBox, ImageCollection, LtError, LtResult, RasterImage, Sensor};
use chrono::NaiveDate;

/// In-memory scene archive answering sensor / footprint / date queries
#[derive(Debug, Clone, Default)]
pub struct SceneCatalog {
    scenes: Vec<RasterImage>,
}

impl SceneCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog over a set of scenes; see [`SceneCatalog::add`]
    pub fn from_scenes<I: IntoIterator<Item = RasterImage>>(scenes: I) -> LtResult<Self> {
        let mut catalog = Self::new();
        for scene in scenes {
            catalog.add(scene)?;
        }
        Ok(catalog)
    }

    /// Register a scene; it must carry a sensor and an acquisition time
    pub fn add(&mut self, scene: RasterImage) -> LtResult<()> {
        if scene.sensor.is_none() {
            return Err(LtError::InvalidFormat("Catalog scene carries no sensor identifier".to_string()));
        }
        if scene.time_start.is_none() {
            return Err(LtError::InvalidFormat("Catalog scene carries no acquisition time".to_string()));
        }
        self.scenes.push(scene);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl ObservationSource for SceneCatalog {
    fn query(
        &self,
        sensor: Sensor,
        aoi: &BoundingBox,
        start: NaiveDate,
        end: NaiveDate,
    ) -> LtResult<ImageCollection> {
        let matches = self
            .scenes
            .iter()
            .filter(|scene| scene.sensor == Some(sensor))
            .cloned()
            .collect::<ImageCollection>()
            .filter_bounds(aoi)
            .filter_date(start, end)
            .sort_by_time();
        log::debug!("Catalog query {} {}..{} matched {} scene(s)", sensor, start, end, matches.len());
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn scene(sensor: Sensor, y: i32, m: u32, d: u32, footprint: BoundingBox) -> RasterImage {
        RasterImage::constant(&["B1"], &[1.0], (1, 1))
            .unwrap()
            .with_sensor(sensor)
            .with_footprint(footprint)
            .with_time_start(Utc.with_ymd_and_hms(y, m, d, 18, 30, 0).unwrap())
    }

    #[test]
    fn test_query_filters_sensor_bounds_and_dates() {
        let here = BoundingBox::new(-123.0, 43.0, -122.0, 44.0);
        let elsewhere = BoundingBox::new(20.0, 50.0, 21.0, 51.0);
        let catalog = SceneCatalog::from_scenes(vec![
            scene(Sensor::Tm, 2000, 8, 1, here),
            scene(Sensor::Tm, 2000, 7, 1, here),
            scene(Sensor::Tm, 2000, 9, 20, here),
            scene(Sensor::Tm, 2000, 7, 15, elsewhere),
            scene(Sensor::Oli, 2000, 7, 15, here),
        ])
        .unwrap();

        let start = NaiveDate::from_ymd_opt(2000, 6, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2000, 9, 20).unwrap();
        let found = catalog.query(Sensor::Tm, &here, start, end).unwrap();
        let months: Vec<_> = found.iter().map(|s| s.date().unwrap().format("%m-%d").to_string()).collect();
        assert_eq!(months, vec!["07-01", "08-01"]);
    }

    #[test]
    fn test_untagged_scene_rejected() {
        let untagged = RasterImage::constant(&["B1"], &[1.0], (1, 1)).unwrap();
        assert!(SceneCatalog::new().add(untagged).is_err());
    }
}
