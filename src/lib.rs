//! ltstack: annual Landsat composites and vertex stacks for temporal segmentation
//!
//! This library harmonizes TM, ETM+ and OLI surface reflectance onto one radiometric
//! scale, builds per-year best-available-pixel composites by medoid selection, derives
//! spectral index series (single, standardized or ensemble) for a segmentation oracle,
//! and flattens the oracle's vertices into fixed-width raster bands.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BandData, BandStack, BoundingBox, ImageCollection, LtError, LtResult, RasterImage, Sensor, ValidityMask,
    COMPOSITE_BANDS, QA_BAND,
};

pub use io::{RunConfig, RunConfigReader, SceneCatalog};

#[cfg(feature = "python")]
mod python {
    use crate::core::{compute_index, resolve_window, MedoidCompositor, SegmentationOutput, SpectralIndex};
    use crate::types::{ImageCollection, LtError, RasterImage, ValidityMask, COMPOSITE_BANDS};
    use ndarray::Axis;
    use numpy::{IntoPyArray, PyArray2, PyArray3, PyReadonlyArray3, PyReadonlyArray4};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    fn to_py_err(err: LtError) -> PyErr {
        match err {
            LtError::Configuration { .. } => PyErr::new::<PyValueError, _>(err.to_string()),
            other => PyErr::new::<PyRuntimeError, _>(other.to_string()),
        }
    }

    fn composite_image(bands: ndarray::ArrayView3<'_, f32>, mask: ValidityMask) -> PyResult<RasterImage> {
        let names = COMPOSITE_BANDS.iter().map(|b| b.to_string()).collect();
        RasterImage::new(names, bands.to_owned(), mask).map_err(to_py_err)
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(py_resolve_window, m)?)?;
        m.add_function(wrap_pyfunction!(py_compute_index, m)?)?;
        m.add_function(wrap_pyfunction!(py_medoid_composite, m)?)?;
        m.add_class::<PyVertexStackUnpacker>()?;
        Ok(())
    }

    /// `[(year, "MM-DD", "MM-DD"), ...]` query windows for one composite year
    #[pyfunction]
    #[pyo3(name = "resolve_window")]
    fn py_resolve_window(year: i32, start_day: &str, end_day: &str) -> PyResult<Vec<(i32, String, String)>> {
        let windows = resolve_window(year, start_day, end_day).map_err(to_py_err)?;
        Ok(windows.iter().map(|w| w.to_tuple()).collect())
    }

    /// Index of a 6 x rows x cols composite; returns (values, valid)
    #[pyfunction]
    #[pyo3(name = "compute_index")]
    fn py_compute_index<'py>(
        py: Python<'py>,
        bands: PyReadonlyArray3<'py, f32>,
        index: &str,
        flip: bool,
    ) -> PyResult<(&'py PyArray2<f32>, &'py PyArray2<bool>)> {
        let index: SpectralIndex = index.parse().map_err(to_py_err)?;
        let bands = bands.as_array();
        let (_, rows, cols) = bands.dim();
        let image = composite_image(bands, ValidityMask::from_elem((rows, cols), true))?;
        let out = compute_index(&image, index, flip).map_err(to_py_err)?;
        let (_, data, mask) = out.into_parts();
        let values = data.index_axis_move(Axis(0), 0);
        Ok((values.into_pyarray(py), mask.into_pyarray(py)))
    }

    /// Medoid of n x 6 x rows x cols observations with n x rows x cols validity
    #[pyfunction]
    #[pyo3(name = "medoid_composite")]
    fn py_medoid_composite<'py>(
        py: Python<'py>,
        observations: PyReadonlyArray4<'py, f32>,
        valid: PyReadonlyArray3<'py, bool>,
    ) -> PyResult<(&'py PyArray3<f32>, &'py PyArray2<bool>)> {
        let observations = observations.as_array();
        let valid = valid.as_array();
        let (n, _, rows, cols) = observations.dim();
        if valid.dim() != (n, rows, cols) {
            return Err(PyErr::new::<PyValueError, _>(format!(
                "Validity shape {:?} does not match observations {:?}",
                valid.dim(),
                (n, rows, cols)
            )));
        }

        let collection = observations
            .outer_iter()
            .zip(valid.outer_iter())
            .map(|(bands, mask)| composite_image(bands, mask.to_owned()))
            .collect::<PyResult<ImageCollection>>()?;
        let composite = MedoidCompositor::new()
            .composite(&collection, (rows, cols))
            .map_err(to_py_err)?;
        let (_, data, mask) = composite.into_parts();
        Ok((data.into_pyarray(py), mask.into_pyarray(py)))
    }

    /// Python wrapper for VertexStackUnpacker
    #[pyclass(name = "VertexStackUnpacker")]
    struct PyVertexStackUnpacker {
        inner: crate::core::VertexStackUnpacker,
    }

    #[pymethods]
    impl PyVertexStackUnpacker {
        #[new]
        fn new(max_segments: usize) -> PyResult<Self> {
            let inner = crate::core::VertexStackUnpacker::new(max_segments).map_err(to_py_err)?;
            Ok(PyVertexStackUnpacker { inner })
        }

        #[getter]
        fn band_names(&self) -> Vec<String> {
            self.inner.band_names()
        }

        /// Unpack a rows x cols x 4 x years table; returns (bands, valid)
        fn unpack<'py>(
            &self,
            py: Python<'py>,
            table: PyReadonlyArray4<'py, f32>,
        ) -> PyResult<(&'py PyArray3<f32>, &'py PyArray2<bool>)> {
            let table = table.as_array().to_owned();
            let (rows, cols, _, _) = table.dim();
            let output = SegmentationOutput::new(table, ValidityMask::from_elem((rows, cols), true))
                .map_err(to_py_err)?;
            let stack = self.inner.unpack(&output).map_err(to_py_err)?;
            let (_, data, mask) = stack.into_parts();
            Ok((data.into_pyarray(py), mask.into_pyarray(py)))
        }

        fn __repr__(&self) -> String {
            format!("VertexStackUnpacker(max_segments={})", self.inner.max_segments())
        }
    }
}
