//! Flattening of per-pixel segmentation vertices into fixed-width bands

use crate::core::pixelwise::map_pixels;
use crate::types::{BandStack, LtError, LtResult, RasterImage, ValidityMask};
use ndarray::{Array4, ArrayView2, Axis};

/// Rows of the per-pixel segmentation table
pub const SEGMENTATION_ROWS: usize = 4;
const ROW_YEAR: usize = 0;
const ROW_RAW: usize = 1;
const ROW_FITTED: usize = 2;
const ROW_IS_VERTEX: usize = 3;

/// One segmentation vertex
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vertex {
    pub year: f32,
    pub raw: f32,
    pub fitted: f32,
}

/// Vertices of one pixel: `capacity` zero-initialised slots, the first `len`
/// of which hold real vertices in time order
#[derive(Debug, Clone, PartialEq)]
pub struct VertexSet {
    slots: Vec<Vertex>,
    len: usize,
}

impl VertexSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![Vertex::default(); capacity],
            len: 0,
        }
    }

    /// Append a vertex; returns false (and drops it) when the set is full
    pub fn push(&mut self, vertex: Vertex) -> bool {
        if self.len == self.slots.len() {
            return false;
        }
        self.slots[self.len] = vertex;
        self.len += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The real vertices
    pub fn vertices(&self) -> &[Vertex] {
        &self.slots[..self.len]
    }

    /// All slots, zero past `len`
    pub fn slots(&self) -> &[Vertex] {
        &self.slots
    }
}

/// Raw per-pixel segmentation result: `data` is (rows, cols, 4, years) with
/// rows year, raw value, fitted value and vertex flag
#[derive(Debug, Clone)]
pub struct SegmentationOutput {
    data: Array4<f32>,
    mask: ValidityMask,
}

impl SegmentationOutput {
    pub fn new(data: Array4<f32>, mask: ValidityMask) -> LtResult<Self> {
        let (rows, cols, table_rows, _) = data.dim();
        if table_rows != SEGMENTATION_ROWS {
            return Err(LtError::InvalidFormat(format!(
                "Segmentation table has {} rows, expected {}",
                table_rows, SEGMENTATION_ROWS
            )));
        }
        if mask.dim() != (rows, cols) {
            return Err(LtError::InvalidFormat(format!(
                "Mask shape {:?} does not match segmentation grid {:?}",
                mask.dim(),
                (rows, cols)
            )));
        }
        Ok(Self { data, mask })
    }

    /// Grid shape as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn years(&self) -> usize {
        self.data.dim().3
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn mask(&self) -> &ValidityMask {
        &self.mask
    }

    /// The 4 x years table of one pixel
    pub fn table(&self, row: usize, col: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), row).index_axis_move(Axis(0), col)
    }
}

/// Turns segmentation tables into `3 * (max_segments + 1)` vertex bands
#[derive(Debug, Clone)]
pub struct VertexStackUnpacker {
    max_segments: usize,
}

impl VertexStackUnpacker {
    pub fn new(max_segments: usize) -> LtResult<Self> {
        if max_segments == 0 {
            return Err(LtError::config("maxSegments", max_segments));
        }
        Ok(Self { max_segments })
    }

    pub fn max_segments(&self) -> usize {
        self.max_segments
    }

    /// Vertex slots per pixel
    pub fn vertex_slots(&self) -> usize {
        self.max_segments + 1
    }

    /// `yrs_vert_1..m`, then `src_vert_1..m`, then `fit_vert_1..m`
    pub fn band_names(&self) -> Vec<String> {
        let m = self.vertex_slots();
        ["yrs", "src", "fit"]
            .iter()
            .flat_map(|prefix| (1..=m).map(move |i| format!("{}_vert_{}", prefix, i)))
            .collect()
    }

    /// Flagged columns of one pixel's table, in time order, truncated to the slot count
    pub fn vertex_set(&self, output: &SegmentationOutput, row: usize, col: usize) -> VertexSet {
        let mut set = VertexSet::with_capacity(self.vertex_slots());
        let table = output.table(row, col);
        for column in table.axis_iter(Axis(1)) {
            if column[ROW_IS_VERTEX] == 0.0 {
                continue;
            }
            let vertex = Vertex {
                year: column[ROW_YEAR],
                raw: column[ROW_RAW],
                fitted: column[ROW_FITTED],
            };
            if !set.push(vertex) {
                break;
            }
        }
        set
    }

    /// Flatten every pixel's vertex set into the vertex stack
    pub fn unpack(&self, output: &SegmentationOutput) -> LtResult<RasterImage> {
        let shape = output.shape();
        let (rows, cols) = shape;
        let m = self.vertex_slots();
        log::info!(
            "Unpacking vertices over {:?} from {} year(s) into {} bands",
            shape,
            output.years(),
            3 * m
        );

        let sets = map_pixels(shape, |r, c| {
            if output.mask()[[r, c]] {
                Some(self.vertex_set(output, r, c))
            } else {
                None
            }
        });

        let mut data = BandStack::zeros((3 * m, rows, cols));
        for (idx, set) in sets.iter().enumerate() {
            let Some(set) = set else { continue };
            let (r, c) = (idx / cols, idx % cols);
            for (i, vertex) in set.slots().iter().enumerate() {
                data[[i, r, c]] = vertex.year;
                data[[m + i, r, c]] = vertex.raw;
                data[[2 * m + i, r, c]] = vertex.fitted;
            }
        }
        RasterImage::new(self.band_names(), data, output.mask().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-pixel output from (year, raw, fitted, is_vertex) columns
    fn single_pixel(columns: &[(f32, f32, f32, f32)]) -> SegmentationOutput {
        let data = Array4::from_shape_fn((1, 1, 4, columns.len()), |(_, _, row, t)| {
            let (year, raw, fit, flag) = columns[t];
            [year, raw, fit, flag][row]
        });
        SegmentationOutput::new(data, ValidityMask::from_elem((1, 1), true)).unwrap()
    }

    #[test]
    fn test_band_names() {
        let names = VertexStackUnpacker::new(2).unwrap().band_names();
        assert_eq!(
            names,
            vec![
                "yrs_vert_1", "yrs_vert_2", "yrs_vert_3", "src_vert_1", "src_vert_2", "src_vert_3", "fit_vert_1",
                "fit_vert_2", "fit_vert_3"
            ]
        );
    }

    #[test]
    fn test_zero_segments_rejected() {
        assert!(matches!(
            VertexStackUnpacker::new(0),
            Err(LtError::Configuration { parameter: "maxSegments", .. })
        ));
    }

    #[test]
    fn test_unpack_pads_with_zeros() {
        let output = single_pixel(&[
            (1985.0, -300.0, -310.0, 1.0),
            (1986.0, -290.0, -300.0, 0.0),
            (1987.0, 150.0, 140.0, 1.0),
            (1988.0, -200.0, -205.0, 1.0),
        ]);
        let unpacker = VertexStackUnpacker::new(6).unwrap();
        let stack = unpacker.unpack(&output).unwrap();
        assert_eq!(stack.band_count(), 21);

        let px = stack.pixel(0, 0).to_vec();
        assert_eq!(&px[0..3], &[1985.0, 1987.0, 1988.0]);
        assert_eq!(&px[7..10], &[-300.0, 150.0, -200.0]);
        assert_eq!(&px[14..17], &[-310.0, 140.0, -205.0]);
        for slots in [3..7, 10..14, 17..21] {
            assert!(px[slots].iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_unpack_truncates_to_slot_count() {
        let columns: Vec<_> = (0..6).map(|t| (2000.0 + t as f32, t as f32, t as f32, 1.0)).collect();
        let output = single_pixel(&columns);
        let unpacker = VertexStackUnpacker::new(2).unwrap();

        let set = unpacker.vertex_set(&output, 0, 0);
        assert_eq!(set.len(), 3);
        assert!(!set.is_empty());
        assert_eq!(set.slots().len(), 3);
        assert_eq!(set.vertices()[2].year, 2002.0);

        let stack = unpacker.unpack(&output).unwrap();
        assert_eq!(stack.pixel(0, 0).to_vec(), vec![2000.0, 2001.0, 2002.0, 0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_masked_pixel_is_all_zero() {
        let data = Array4::from_elem((1, 2, 4, 3), 1.0f32);
        let mut mask = ValidityMask::from_elem((1, 2), true);
        mask[[0, 1]] = false;
        let output = SegmentationOutput::new(data, mask).unwrap();
        let stack = VertexStackUnpacker::new(1).unwrap().unpack(&output).unwrap();
        assert!(stack.is_valid(0, 0));
        assert!(!stack.is_valid(0, 1));
        assert!(stack.pixel(0, 1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_table_shape_checked() {
        let data = Array4::zeros((2, 2, 3, 5));
        assert!(SegmentationOutput::new(data, ValidityMask::from_elem((2, 2), true)).is_err());
    }
}
