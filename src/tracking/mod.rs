//! Measurement model for video tracking: scores candidate samples with the
//! two-stage cascade and keeps a scene-adapted refinement classifier trained
//! from recently observed labeled patches.

mod training;

pub use self::training::{NearestMeanTraining, Training, TrainingError, TrainingOutcome};

use std::cmp::Ordering::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::classifier::{QuickRejectClassifier, RefinementClassifier};
use crate::common::{FeatureVector, ImageData, Rectangle, Sample, SampleLabel};
use crate::extract::PatchExtractor;

/// Refinement certainty assigned to samples the refinement classifier never
/// evaluated: maximal uncertainty, so the fused weight degrades gracefully to
/// half the quick-reject certainty.
const K_REFINEMENT_CERTAINTY_UNKNOWN: f64 = 0.5;

/// Training quality a retrained model must reach before the measurement model
/// switches from static to dynamic scoring.
const K_QUALITY_BAR: f64 = 0.75;

const K_DEFAULT_MIN_TRAINING_SAMPLES: usize = 10;

/// Per-frame contract of a measurement model towards the tracker.
pub trait MeasurementModel {
    /// Scores every sample against the current frame, storing the certainty
    /// as the sample weight.
    fn evaluate(&mut self, image: &ImageData, samples: &mut [Sample]);

    /// Buffers newly labeled patches for a later retraining attempt; does not
    /// retrain by itself.
    fn update_with_samples(
        &mut self,
        image: &ImageData,
        positive_samples: &[Sample],
        negative_samples: &[Sample],
    );

    /// Attempts to retrain the dynamic refinement classifier from the
    /// buffered patches. Failure is expected and recoverable; the model keeps
    /// its previous state.
    fn update(&mut self);

    /// Discards all adaptation, returning to the statically trained model.
    fn reset(&mut self);
}

/// Capability of thinning a sample set down to distinct patches.
pub trait DuplicateFilter {
    /// Keeps at most `count` samples, best weight first, no two of which
    /// cover the same patch region.
    fn filter_duplicates(&self, samples: Vec<Sample>, count: usize) -> Vec<Sample>;
}

/// Measurement model wrapping the quick-reject/refinement cascade.
///
/// Every sample first passes the quick-reject classifier; survivors are
/// scored by whichever refinement classifier is currently active. The fused
/// sample weight is the product of both certainties, treated as
/// independent.
///
/// Two refinement classifiers exist: the *static* one loaded at construction
/// and a *dynamic* one retrained online from labeled patches. `update()`
/// publishes a fully built replacement, so concurrent readers observe either
/// the old or the new dynamic model, never a mix.
pub struct AdaptiveMeasurementModel {
    quick_reject: QuickRejectClassifier,
    static_refinement: Arc<RefinementClassifier>,
    dynamic_refinement: Option<Arc<RefinementClassifier>>,
    using_dynamic_model: bool,
    extractor: Box<dyn PatchExtractor>,
    training: Box<dyn Training>,
    positive_patches: Vec<FeatureVector>,
    negative_patches: Vec<FeatureVector>,
    min_training_samples: usize,
}

impl AdaptiveMeasurementModel {
    pub fn new(
        quick_reject: QuickRejectClassifier,
        static_refinement: RefinementClassifier,
        extractor: Box<dyn PatchExtractor>,
        training: Box<dyn Training>,
    ) -> Self {
        AdaptiveMeasurementModel {
            quick_reject,
            static_refinement: Arc::new(static_refinement),
            dynamic_refinement: None,
            using_dynamic_model: false,
            extractor,
            training,
            positive_patches: vec![],
            negative_patches: vec![],
            min_training_samples: K_DEFAULT_MIN_TRAINING_SAMPLES,
        }
    }

    pub fn is_using_dynamic_model(&self) -> bool {
        self.using_dynamic_model
    }

    pub fn min_training_samples(&self) -> usize {
        self.min_training_samples
    }

    /// Labeled patches of each class required before a retraining attempt is
    /// made.
    pub fn set_min_training_samples(&mut self, count: usize) {
        self.min_training_samples = count;
    }

    pub fn quick_reject(&self) -> &QuickRejectClassifier {
        &self.quick_reject
    }

    fn active_refinement(&self) -> &RefinementClassifier {
        match (&self.dynamic_refinement, self.using_dynamic_model) {
            (Some(dynamic), true) => dynamic,
            _ => &self.static_refinement,
        }
    }

    /// Fused certainty of a single patch region. Read-only against the model
    /// state, which is what makes the per-sample loop parallelizable.
    fn score_region(&self, image: &ImageData, region: &Rectangle) -> f64 {
        let patch = match self.extractor.extract(image, region) {
            Some(patch) => patch,
            None => return 0.0,
        };

        let level_and_distance = self.quick_reject.compute_hyperplane_distance(&patch);
        let quick_certainty = self.quick_reject.certainty(level_and_distance.distance());

        if !self.quick_reject.classify_distance(level_and_distance) {
            // the refinement stage never sees rejected patches
            quick_certainty * K_REFINEMENT_CERTAINTY_UNKNOWN
        } else {
            let refinement = self.active_refinement();
            let distance = refinement.compute_hyperplane_distance(&patch);
            quick_certainty * refinement.certainty(distance)
        }
    }

    #[cfg(feature = "rayon")]
    fn score_regions(&self, image: &ImageData, regions: &[Rectangle]) -> Vec<f64> {
        regions
            .par_iter()
            .map(|region| self.score_region(image, region))
            .collect()
    }

    #[cfg(not(feature = "rayon"))]
    fn score_regions(&self, image: &ImageData, regions: &[Rectangle]) -> Vec<f64> {
        regions
            .iter()
            .map(|region| self.score_region(image, region))
            .collect()
    }

    /// Buffers a mixed batch of samples by their labels. Samples still
    /// labeled [`SampleLabel::Unknown`] carry no training signal and are
    /// skipped.
    pub fn update_with_labeled_samples(&mut self, image: &ImageData, samples: &[Sample]) {
        for sample in samples {
            let positive = match sample.label() {
                SampleLabel::Positive => true,
                SampleLabel::Negative => false,
                SampleLabel::Unknown => continue,
            };
            if let Some(patch) = self.extractor.extract(image, sample.bounds()) {
                if positive {
                    self.positive_patches.push(patch);
                } else {
                    self.negative_patches.push(patch);
                }
            }
        }
        debug!(
            "buffered labeled patches: {} positive, {} negative",
            self.positive_patches.len(),
            self.negative_patches.len()
        );
    }

    fn buffer_patches(&mut self, image: &ImageData, samples: &[Sample], positive: bool) {
        for sample in samples {
            if let Some(patch) = self.extractor.extract(image, sample.bounds()) {
                if positive {
                    self.positive_patches.push(patch);
                } else {
                    self.negative_patches.push(patch);
                }
            }
        }
    }
}

impl MeasurementModel for AdaptiveMeasurementModel {
    fn evaluate(&mut self, image: &ImageData, samples: &mut [Sample]) {
        // many samples cover the same patch; score each distinct region once
        let mut regions: Vec<Rectangle> = Vec::with_capacity(samples.len());
        let mut seen = HashSet::with_capacity(samples.len());
        for sample in samples.iter() {
            if seen.insert(sample.bounds().clone()) {
                regions.push(sample.bounds().clone());
            }
        }

        let weights = self.score_regions(image, &regions);
        let by_region: HashMap<Rectangle, f64> = regions.into_iter().zip(weights).collect();

        for sample in samples.iter_mut() {
            sample.set_weight(by_region[sample.bounds()]);
        }
    }

    fn update_with_samples(
        &mut self,
        image: &ImageData,
        positive_samples: &[Sample],
        negative_samples: &[Sample],
    ) {
        self.buffer_patches(image, positive_samples, true);
        self.buffer_patches(image, negative_samples, false);
        debug!(
            "buffered labeled patches: {} positive, {} negative",
            self.positive_patches.len(),
            self.negative_patches.len()
        );
    }

    fn update(&mut self) {
        if self.positive_patches.len() < self.min_training_samples
            || self.negative_patches.len() < self.min_training_samples
        {
            debug!(
                "skipping retraining: {} positive / {} negative patches, need {} each",
                self.positive_patches.len(),
                self.negative_patches.len(),
                self.min_training_samples
            );
            return;
        }

        match self
            .training
            .train(&self.positive_patches, &self.negative_patches)
        {
            Ok(outcome) => {
                // publish the fully built model, then decide whether to use it
                self.dynamic_refinement = Some(Arc::new(outcome.classifier));
                if outcome.quality >= K_QUALITY_BAR {
                    if !self.using_dynamic_model {
                        info!(
                            "switching to the dynamic model (training quality {:.3})",
                            outcome.quality
                        );
                    }
                    self.using_dynamic_model = true;
                } else {
                    debug!(
                        "training quality {:.3} below {}, scoring with the static model",
                        outcome.quality, K_QUALITY_BAR
                    );
                    self.using_dynamic_model = false;
                }
            }
            Err(error) => {
                debug!("retraining failed, keeping the previous model: {}", error);
            }
        }

        self.positive_patches.clear();
        self.negative_patches.clear();
    }

    fn reset(&mut self) {
        debug!("resetting to the static model");
        self.dynamic_refinement = None;
        self.using_dynamic_model = false;
        self.positive_patches.clear();
        self.negative_patches.clear();
    }
}

impl DuplicateFilter for AdaptiveMeasurementModel {
    fn filter_duplicates(&self, mut samples: Vec<Sample>, count: usize) -> Vec<Sample> {
        samples.sort_by(|x, y| {
            let x_weight = x.weight();
            let y_weight = y.weight();
            if x_weight > y_weight {
                // x goes before y
                Less
            } else if x_weight < y_weight {
                Greater
            } else {
                Equal
            }
        });

        let mut seen = HashSet::new();
        samples.retain(|sample| seen.insert(sample.bounds().clone()));
        samples.truncate(count);
        samples
    }
}
