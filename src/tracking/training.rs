use log::debug;
use thiserror::Error;

use crate::classifier::RefinementClassifier;
use crate::common::FeatureVector;
use crate::kernel::RbfKernel;
use crate::math::Sigmoid;

/// A freshly trained refinement classifier together with a quality signal in
/// `[0, 1]` that the measurement model compares against its acceptance bar.
pub struct TrainingOutcome {
    pub classifier: RefinementClassifier,
    pub quality: f64,
}

/// Expected, recoverable failures of a retraining attempt. The measurement
/// model logs these and keeps its previous state.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("not enough labeled patches: {positives} positive, {negatives} negative")]
    InsufficientSamples { positives: usize, negatives: usize },
    #[error("degenerate training set: {0}")]
    Degenerate(String),
    #[error("training failed: {0}")]
    Failed(String),
}

/// Fits a new refinement classifier from labeled patches. The solver itself
/// is a collaborator; the measurement model only relies on this contract.
pub trait Training: Send + Sync {
    fn train(
        &self,
        positives: &[FeatureVector],
        negatives: &[FeatureVector],
    ) -> Result<TrainingOutcome, TrainingError>;
}

/// Minimal built-in trainer: one support vector per class (the class mean)
/// with weights +1/-1, which makes the hyperplane distance the RBF similarity
/// gap between the two class templates. Good enough for scene adaptation
/// when no external solver is wired in.
pub struct NearestMeanTraining {
    gamma: f32,
}

impl NearestMeanTraining {
    pub fn new(gamma: f32) -> Self {
        NearestMeanTraining { gamma }
    }
}

fn class_mean(patches: &[FeatureVector]) -> Vec<f32> {
    let len = patches[0].len();
    let mut mean = vec![0f32; len];
    for patch in patches {
        for (m, v) in mean.iter_mut().zip(patch.values()) {
            *m += v;
        }
    }
    let n = patches.len() as f32;
    for m in mean.iter_mut() {
        *m /= n;
    }
    mean
}

impl Training for NearestMeanTraining {
    fn train(
        &self,
        positives: &[FeatureVector],
        negatives: &[FeatureVector],
    ) -> Result<TrainingOutcome, TrainingError> {
        if positives.is_empty() || negatives.is_empty() {
            return Err(TrainingError::InsufficientSamples {
                positives: positives.len(),
                negatives: negatives.len(),
            });
        }
        let len = positives[0].len();
        if positives
            .iter()
            .chain(negatives)
            .any(|patch| patch.len() != len)
        {
            return Err(TrainingError::Degenerate(
                "patches differ in length".into(),
            ));
        }

        let positive_mean: Vec<f32> = class_mean(positives).iter().map(|v| v * 255.0).collect();
        let negative_mean: Vec<f32> = class_mean(negatives).iter().map(|v| v * 255.0).collect();
        if positive_mean == negative_mean {
            return Err(TrainingError::Degenerate(
                "class means coincide, no separating direction".into(),
            ));
        }

        let classifier = RefinementClassifier::new(
            vec![positive_mean, negative_mean],
            vec![1.0, -1.0],
            0.0,
            0.0,
            Box::new(RbfKernel::new(self.gamma)),
            Sigmoid::default(),
        )
        .map_err(|e| TrainingError::Failed(e.to_string()))?;

        // quality is the training accuracy of the fresh classifier
        let correct = positives
            .iter()
            .filter(|p| classifier.compute_hyperplane_distance(p) >= 0.0)
            .count()
            + negatives
                .iter()
                .filter(|n| classifier.compute_hyperplane_distance(n) < 0.0)
                .count();
        let quality = correct as f64 / (positives.len() + negatives.len()) as f64;
        debug!(
            "trained nearest-mean model from {} positive and {} negative patches, quality {:.3}",
            positives.len(),
            negatives.len(),
            quality
        );

        Ok(TrainingOutcome {
            classifier,
            quality,
        })
    }
}
