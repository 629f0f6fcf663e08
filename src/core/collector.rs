use crate::core::harmonize::SensorHarmonizer;
use crate::core::window::AnnualWindow;
use crate::types::{BoundingBox, ImageCollection, LtResult, Sensor};
use chrono::NaiveDate;

/// Provider of raw surface reflectance scenes
///
/// Implementations return every scene of `sensor` whose footprint intersects
/// `aoi` and whose acquisition date falls in `[start, end)`.
pub trait ObservationSource: Sync {
    fn query(
        &self,
        sensor: Sensor,
        aoi: &BoundingBox,
        start: NaiveDate,
        end: NaiveDate,
    ) -> LtResult<ImageCollection>;
}

/// Gathers the harmonized, quality-masked observations of one annual window
pub struct ObservationCollector<'a, S: ObservationSource> {
    source: &'a S,
    harmonizer: SensorHarmonizer,
    sensors: Vec<Sensor>,
}

impl<'a, S: ObservationSource> ObservationCollector<'a, S> {
    pub fn new(source: &'a S, harmonizer: SensorHarmonizer, sensors: &[Sensor]) -> Self {
        Self {
            source,
            harmonizer,
            sensors: sensors.to_vec(),
        }
    }

    /// Collector over all three sensors with the standard harmonizer
    pub fn standard(source: &'a S) -> Self {
        Self::new(source, SensorHarmonizer::standard(), &Sensor::ALL)
    }

    /// Raw scenes of one sensor for a (possibly wrapping) window
    pub fn raw_sensor_collection(
        &self,
        window: &AnnualWindow,
        sensor: Sensor,
        aoi: &BoundingBox,
    ) -> LtResult<ImageCollection> {
        let mut merged = ImageCollection::new();
        for query in window.resolve() {
            let (start, end) = query.date_range()?;
            let scenes = self.source.query(sensor, aoi, start, end)?;
            log::debug!("{} {}..{}: {} scene(s)", sensor, start, end, scenes.len());
            merged = merged.merge(scenes);
        }
        Ok(merged)
    }

    /// Harmonized and masked scenes of one sensor
    pub fn sensor_collection(
        &self,
        window: &AnnualWindow,
        sensor: Sensor,
        aoi: &BoundingBox,
    ) -> LtResult<ImageCollection> {
        self.raw_sensor_collection(window, sensor, aoi)?
            .iter()
            .map(|scene| self.harmonizer.prepare(&scene.clone().with_sensor(sensor)))
            .collect()
    }

    /// Union of all sensors' observations, in sensor order
    pub fn collect(&self, window: &AnnualWindow, aoi: &BoundingBox) -> LtResult<ImageCollection> {
        let mut combined = ImageCollection::new();
        for &sensor in &self.sensors {
            combined = combined.merge(self.sensor_collection(window, sensor, aoi)?);
        }
        log::info!(
            "Collected {} observation(s) for {} window {}..{}",
            combined.len(),
            window.year,
            window.start,
            window.end
        );
        Ok(combined)
    }
}
