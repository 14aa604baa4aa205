//! Real-time face/object tracking measurement model.
//!
//! Candidate patches run through a two-stage cascade: a hierarchical
//! quick-reject classifier ("WVM") discards most patches cheaply, and a
//! kernel-based refinement classifier ("SVM") scores the survivors exactly.
//! [`AdaptiveMeasurementModel`] wraps the cascade for frame-by-frame
//! tracking, retrains a scene-adapted refinement classifier from labeled
//! patches and fuses the certainties of both stages into per-sample weights.
//!
//! Classifier parameters are loaded from binary model files via
//! [`model::load_quick_reject_model`] and [`model::load_refinement_model`];
//! [`create_measurement_model`] wires a complete measurement model from the
//! two files.

mod classifier;
mod common;
mod extract;
mod kernel;
mod math;
mod tracking;

pub mod model;

pub use classifier::{
    ApproxFilter, LevelAndDistance, QuickRejectClassifier, QuickRejectParams, RectValue,
    RefinementClassifier,
};
pub use common::{FeatureVector, ImageData, Rectangle, Sample, SampleLabel};
pub use extract::{GrayPatchExtractor, PatchExtractor};
pub use kernel::{Kernel, KernelKind, PolynomialKernel, RbfKernel};
pub use math::Sigmoid;
pub use model::ModelError;
pub use tracking::{
    AdaptiveMeasurementModel, DuplicateFilter, MeasurementModel, NearestMeanTraining, Training,
    TrainingError, TrainingOutcome,
};

/// Creates a measurement model from a quick-reject and a refinement model
/// file, with a patch extractor sized to the quick-reject filter window and
/// the built-in nearest-mean trainer for scene adaptation.
///
/// The reliability offsets configure the operating points of the two stages;
/// 0.0 keeps them as trained.
pub fn create_measurement_model(
    quick_reject_path: &str,
    refinement_path: &str,
    limit_reliability_filter: f32,
    limit_reliability: f32,
) -> Result<AdaptiveMeasurementModel, ModelError> {
    let quick_reject = model::load_quick_reject_model(quick_reject_path, limit_reliability_filter)?;
    let refinement = model::load_refinement_model(refinement_path, limit_reliability)?;

    let extractor = GrayPatchExtractor::new(quick_reject.filter_width(), quick_reject.filter_height());
    let window_area = (quick_reject.filter_width() * quick_reject.filter_height()) as f32;
    let training = NearestMeanTraining::new(1.0 / (window_area * 65025.0));

    Ok(AdaptiveMeasurementModel::new(
        quick_reject,
        refinement,
        Box::new(extractor),
        Box::new(training),
    ))
}
