//! Core time-series stack processing modules

pub mod collector;
pub mod harmonize;
pub mod indices;
pub mod medoid;
pub mod pipeline;
pub(crate) mod pixelwise;
pub mod standardize;
pub mod vertices;
pub mod window;

// Re-export main types
pub use collector::{ObservationCollector, ObservationSource};
pub use harmonize::{HarmonizationParams, MaskCategory, QaMaskBuilder, SensorHarmonizer};
pub use indices::{compute_index, normalized_difference, tasseled_cap, SpectralIndex};
pub use medoid::{composite_timestamp, select_medoid, MedoidCompositor};
pub use pipeline::{
    collection_to_stack, run_pipeline, AnnualStackBuilder, LtParams, PipelineConfig, PipelineOutput, PipelinePlan,
    SegmentationOracle,
};
pub use pixelwise::{mean_std, median};
pub use standardize::{
    build_lt_collection, ensemble_composite, standardize, standardize_index, EnsemblePreset, LtIndexSpec, Reducer,
};
pub use vertices::{SegmentationOutput, Vertex, VertexSet, VertexStackUnpacker};
pub use window::{resolve_window, AnnualWindow, MonthDay, QueryWindow};
