use chrono::{DateTime, NaiveDate, Utc};
use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Real-valued band data (row x col)
pub type BandData = Array2<f32>;

/// Multi-band raster data (band x row x col)
pub type BandStack = Array3<f32>;

/// Per-pixel validity (true = usable, false = masked)
pub type ValidityMask = Array2<bool>;

/// Reflectance bands shared by every sensor after harmonization
pub const COMPOSITE_BANDS: [&str; 6] = ["B1", "B2", "B3", "B4", "B5", "B7"];

/// Packed quality-bits band delivered with every surface reflectance scene
pub const QA_BAND: &str = "pixel_qa";

/// Landsat sensor generations contributing to the annual stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sensor {
    /// Landsat 5 Thematic Mapper
    Tm,
    /// Landsat 7 Enhanced Thematic Mapper Plus
    Etm,
    /// Landsat 8 Operational Land Imager
    Oli,
}

impl Sensor {
    /// All supported sensors, in collection merge order
    pub const ALL: [Sensor; 3] = [Sensor::Tm, Sensor::Etm, Sensor::Oli];

    /// Collection code of the sensor
    pub fn code(&self) -> &'static str {
        match self {
            Sensor::Tm => "LT05",
            Sensor::Etm => "LE07",
            Sensor::Oli => "LC08",
        }
    }

    /// Native names of the six reflectance bands, in `COMPOSITE_BANDS` order
    pub fn reflectance_bands(&self) -> [&'static str; 6] {
        match self {
            Sensor::Tm | Sensor::Etm => COMPOSITE_BANDS,
            Sensor::Oli => ["B2", "B3", "B4", "B5", "B6", "B7"],
        }
    }

    /// Whether the sensor needs the cross-sensor radiometric transform
    pub fn needs_harmonization(&self) -> bool {
        matches!(self, Sensor::Oli)
    }
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Sensor {
    type Err = LtError;

    fn from_str(s: &str) -> LtResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "LT05" => Ok(Sensor::Tm),
            "LE07" => Ok(Sensor::Etm),
            "LC08" => Ok(Sensor::Oli),
            _ => Err(LtError::config("sensor", s)),
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    /// Whether two boxes share any area (touching edges count)
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        // Whole globe
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }
}

/// A named bag of bands over one grid, sharing a single validity mask
#[derive(Debug, Clone)]
pub struct RasterImage {
    band_names: Vec<String>,
    data: BandStack,
    mask: ValidityMask,
    pub time_start: Option<DateTime<Utc>>,
    pub sensor: Option<Sensor>,
    pub footprint: Option<BoundingBox>,
}

impl RasterImage {
    /// Create an image from named bands and a validity mask
    pub fn new(band_names: Vec<String>, data: BandStack, mask: ValidityMask) -> LtResult<Self> {
        let (bands, rows, cols) = data.dim();
        if band_names.len() != bands {
            return Err(LtError::InvalidFormat(format!(
                "{} band names supplied for {} bands",
                band_names.len(),
                bands
            )));
        }
        if mask.dim() != (rows, cols) {
            return Err(LtError::InvalidFormat(format!(
                "Mask shape {:?} does not match band shape {:?}",
                mask.dim(),
                (rows, cols)
            )));
        }

        Ok(Self {
            band_names,
            data,
            mask,
            time_start: None,
            sensor: None,
            footprint: None,
        })
    }

    /// Create a fully valid image from named bands
    pub fn from_bands(band_names: Vec<String>, data: BandStack) -> LtResult<Self> {
        let (_, rows, cols) = data.dim();
        Self::new(band_names, data, ValidityMask::from_elem((rows, cols), true))
    }

    /// Create a single-band image
    pub fn from_single_band(name: &str, band: BandData, mask: ValidityMask) -> LtResult<Self> {
        let data = band.insert_axis(Axis(0));
        Self::new(vec![name.to_string()], data, mask)
    }

    /// Create an image holding one constant per band
    pub fn constant(band_names: &[&str], values: &[f32], shape: (usize, usize)) -> LtResult<Self> {
        if band_names.len() != values.len() {
            return Err(LtError::InvalidFormat(format!(
                "{} band names supplied for {} constants",
                band_names.len(),
                values.len()
            )));
        }
        let data = BandStack::from_shape_fn((values.len(), shape.0, shape.1), |(b, _, _)| values[b]);
        Self::from_bands(band_names.iter().map(|n| n.to_string()).collect(), data)
    }

    pub fn with_time_start(mut self, time_start: DateTime<Utc>) -> Self {
        self.time_start = Some(time_start);
        self
    }

    pub fn with_sensor(mut self, sensor: Sensor) -> Self {
        self.sensor = Some(sensor);
        self
    }

    pub fn with_footprint(mut self, footprint: BoundingBox) -> Self {
        self.footprint = Some(footprint);
        self
    }

    /// Copy time, sensor and footprint tags from another image
    pub fn with_properties_of(mut self, other: &RasterImage) -> Self {
        self.time_start = other.time_start;
        self.sensor = other.sensor;
        self.footprint = other.footprint;
        self
    }

    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    pub fn band_count(&self) -> usize {
        self.band_names.len()
    }

    /// Grid shape as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn data(&self) -> &BandStack {
        &self.data
    }

    pub fn mask(&self) -> &ValidityMask {
        &self.mask
    }

    pub fn into_parts(self) -> (Vec<String>, BandStack, ValidityMask) {
        (self.band_names, self.data, self.mask)
    }

    /// Acquisition date, if the image is timestamped
    pub fn date(&self) -> Option<NaiveDate> {
        self.time_start.map(|t| t.date_naive())
    }

    pub fn band_index(&self, name: &str) -> LtResult<usize> {
        self.band_names
            .iter()
            .position(|b| b == name)
            .ok_or_else(|| LtError::InvalidFormat(format!("Band '{}' not found in {:?}", name, self.band_names)))
    }

    pub fn band(&self, name: &str) -> LtResult<ArrayView2<'_, f32>> {
        let idx = self.band_index(name)?;
        Ok(self.data.index_axis(Axis(0), idx))
    }

    /// Band vector of one pixel
    pub fn pixel(&self, row: usize, col: usize) -> ArrayView1<'_, f32> {
        self.data.slice(s![.., row, col])
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.mask[[row, col]]
    }

    /// Select bands by name, keeping their names
    pub fn select(&self, names: &[&str]) -> LtResult<RasterImage> {
        self.select_as(names, names)
    }

    /// Select bands by name and rename them
    pub fn select_as(&self, names: &[&str], new_names: &[&str]) -> LtResult<RasterImage> {
        if names.len() != new_names.len() {
            return Err(LtError::InvalidFormat(format!(
                "Cannot rename {} selected bands to {} names",
                names.len(),
                new_names.len()
            )));
        }
        let indices = names
            .iter()
            .map(|n| self.band_index(n))
            .collect::<LtResult<Vec<_>>>()?;
        let data = self.data.select(Axis(0), &indices);
        let image = RasterImage::new(
            new_names.iter().map(|n| n.to_string()).collect(),
            data,
            self.mask.clone(),
        )?;
        Ok(image.with_properties_of(self))
    }

    pub fn rename(mut self, new_names: &[&str]) -> LtResult<RasterImage> {
        if new_names.len() != self.band_names.len() {
            return Err(LtError::InvalidFormat(format!(
                "Cannot rename {} bands to {} names",
                self.band_names.len(),
                new_names.len()
            )));
        }
        self.band_names = new_names.iter().map(|n| n.to_string()).collect();
        Ok(self)
    }

    /// Append the bands of another image on the same grid; masks are combined
    pub fn add_bands(mut self, other: &RasterImage) -> LtResult<RasterImage> {
        if other.shape() != self.shape() {
            return Err(LtError::Processing(format!(
                "Cannot stack bands of shape {:?} onto shape {:?}",
                other.shape(),
                self.shape()
            )));
        }
        self.data = ndarray::concatenate(Axis(0), &[self.data.view(), other.data.view()])
            .map_err(|e| LtError::Processing(format!("Shape error: {}", e)))?;
        self.band_names.extend(other.band_names.iter().cloned());
        ndarray::Zip::from(&mut self.mask)
            .and(&other.mask)
            .for_each(|m, &o| *m = *m && o);
        Ok(self)
    }

    /// Fill masked pixels with `value` and mark every pixel valid
    pub fn unmask(mut self, value: f32) -> RasterImage {
        for mut band in self.data.outer_iter_mut() {
            ndarray::Zip::from(&mut band)
                .and(&self.mask)
                .for_each(|v, &valid| {
                    if !valid {
                        *v = value;
                    }
                });
        }
        self.mask.fill(true);
        self
    }

    /// Replace the validity mask
    pub fn with_mask(mut self, mask: ValidityMask) -> LtResult<RasterImage> {
        if mask.dim() != self.shape() {
            return Err(LtError::InvalidFormat(format!(
                "Mask shape {:?} does not match image shape {:?}",
                mask.dim(),
                self.shape()
            )));
        }
        self.mask = mask;
        Ok(self)
    }

    /// Apply `f` to every band value
    pub fn map_values<F: Fn(f32) -> f32>(mut self, f: F) -> RasterImage {
        self.data.mapv_inplace(f);
        self
    }
}

/// Unordered multiset of images
#[derive(Debug, Clone, Default)]
pub struct ImageCollection {
    images: Vec<RasterImage>,
}

impl ImageCollection {
    pub fn new() -> Self {
        Self { images: Vec::new() }
    }

    pub fn from_images(images: Vec<RasterImage>) -> Self {
        Self { images }
    }

    pub fn push(&mut self, image: RasterImage) {
        self.images.push(image);
    }

    /// Concatenate two collections, this one first
    pub fn merge(mut self, other: ImageCollection) -> Self {
        self.images.extend(other.images);
        self
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RasterImage> {
        self.images.iter()
    }

    pub fn images(&self) -> &[RasterImage] {
        &self.images
    }

    pub fn into_images(self) -> Vec<RasterImage> {
        self.images
    }

    pub fn first(&self) -> Option<&RasterImage> {
        self.images.first()
    }

    /// Keep images whose footprint intersects `aoi`; images without a footprint are kept
    pub fn filter_bounds(self, aoi: &BoundingBox) -> Self {
        self.images
            .into_iter()
            .filter(|img| img.footprint.map_or(true, |fp| fp.intersects(aoi)))
            .collect()
    }

    /// Keep images acquired in `[start, end)`; untimed images are dropped
    pub fn filter_date(self, start: NaiveDate, end: NaiveDate) -> Self {
        self.images
            .into_iter()
            .filter(|img| img.date().map_or(false, |d| d >= start && d < end))
            .collect()
    }

    /// Stable sort by acquisition time
    pub fn sort_by_time(mut self) -> Self {
        self.images.sort_by_key(|img| img.time_start);
        self
    }

    /// Select the same bands from every image
    pub fn select(&self, names: &[&str]) -> LtResult<ImageCollection> {
        self.images.iter().map(|img| img.select(names)).collect()
    }
}

impl FromIterator<RasterImage> for ImageCollection {
    fn from_iter<I: IntoIterator<Item = RasterImage>>(iter: I) -> Self {
        Self { images: iter.into_iter().collect() }
    }
}

impl IntoIterator for ImageCollection {
    type Item = RasterImage;
    type IntoIter = std::vec::IntoIter<RasterImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.into_iter()
    }
}

impl<'a> IntoIterator for &'a ImageCollection {
    type Item = &'a RasterImage;
    type IntoIter = std::slice::Iter<'a, RasterImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}

/// Error types for time-series stack processing
#[derive(Debug, thiserror::Error)]
pub enum LtError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported {parameter}: '{value}'")]
    Configuration { parameter: &'static str, value: String },

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),
}

impl LtError {
    /// Configuration error naming the offending parameter and value
    pub fn config(parameter: &'static str, value: impl std::fmt::Display) -> Self {
        LtError::Configuration {
            parameter,
            value: value.to_string(),
        }
    }
}

/// Result type for stack operations
pub type LtResult<T> = Result<T, LtError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dated(y: i32, m: u32, d: u32) -> RasterImage {
        RasterImage::constant(&["B1"], &[1.0], (2, 2))
            .unwrap()
            .with_time_start(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_sensor_codes() {
        assert_eq!("LC08".parse::<Sensor>().unwrap(), Sensor::Oli);
        assert_eq!("le07".parse::<Sensor>().unwrap(), Sensor::Etm);
        match "LM01".parse::<Sensor>() {
            Err(LtError::Configuration { parameter, value }) => {
                assert_eq!(parameter, "sensor");
                assert_eq!(value, "LM01");
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_mask_shape_checked() {
        let data = BandStack::zeros((1, 3, 3));
        let mask = ValidityMask::from_elem((2, 3), true);
        assert!(RasterImage::new(vec!["B1".into()], data, mask).is_err());
    }

    #[test]
    fn test_select_and_unmask() {
        let data = BandStack::from_shape_fn((2, 2, 2), |(b, r, c)| (b * 100 + r * 10 + c) as f32);
        let mut mask = ValidityMask::from_elem((2, 2), true);
        mask[[1, 1]] = false;
        let image = RasterImage::new(vec!["B2".into(), "B3".into()], data, mask).unwrap();

        let selected = image.select_as(&["B3"], &["B2"]).unwrap();
        assert_eq!(selected.band_names(), &["B2".to_string()]);
        assert_eq!(selected.band("B2").unwrap()[[0, 1]], 101.0);
        assert!(!selected.is_valid(1, 1));

        let filled = selected.unmask(0.0);
        assert!(filled.is_valid(1, 1));
        assert_eq!(filled.band("B2").unwrap()[[1, 1]], 0.0);
        assert_eq!(filled.band("B2").unwrap()[[1, 0]], 110.0);
    }

    #[test]
    fn test_filter_date_is_half_open() {
        let collection = ImageCollection::from_images(vec![dated(2000, 6, 10), dated(2000, 9, 20), dated(2000, 7, 1)]);
        let start = NaiveDate::from_ymd_opt(2000, 6, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2000, 9, 20).unwrap();
        let filtered = collection.filter_date(start, end);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_filter_bounds() {
        let aoi = BoundingBox::new(-123.0, 43.0, -122.0, 44.0);
        let inside = dated(2000, 7, 1).with_footprint(BoundingBox::new(-122.5, 43.5, -121.0, 45.0));
        let outside = dated(2000, 7, 1).with_footprint(BoundingBox::new(10.0, 10.0, 11.0, 11.0));
        let filtered = ImageCollection::from_images(vec![inside, outside]).filter_bounds(&aoi);
        assert_eq!(filtered.len(), 1);
    }
}
