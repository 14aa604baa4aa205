use crate::common::FeatureVector;
use crate::kernel::Kernel;
use crate::math::Sigmoid;
use crate::model::ModelError;

/// Kernel-based refinement classifier ("SVM").
///
/// Scores a feature vector as a kernel-weighted sum over its support vectors,
/// with no early exit: unlike the quick-reject cascade this stage is exact.
/// Support vectors are stored on the 0-255 training scale; feature vectors
/// are rescaled to match before kernel evaluation.
pub struct RefinementClassifier {
    support_vectors: Vec<Vec<f32>>,
    weights: Vec<f32>,
    bias: f32,
    limit_reliability: f32,
    kernel: Box<dyn Kernel>,
    posterior: Sigmoid,
}

impl RefinementClassifier {
    /// # Errors
    ///
    /// Fails when the support vector and weight counts differ, the support
    /// vectors are not all of one length, or there are none at all. No
    /// partially constructed classifier is ever returned.
    pub fn new(
        support_vectors: Vec<Vec<f32>>,
        weights: Vec<f32>,
        bias: f32,
        limit_reliability: f32,
        kernel: Box<dyn Kernel>,
        posterior: Sigmoid,
    ) -> Result<Self, ModelError> {
        if support_vectors.is_empty() {
            return Err(ModelError::Inconsistent(
                "refinement model has no support vectors".into(),
            ));
        }
        if support_vectors.len() != weights.len() {
            return Err(ModelError::Inconsistent(format!(
                "{} support vectors but {} weights",
                support_vectors.len(),
                weights.len()
            )));
        }
        let length = support_vectors[0].len();
        if support_vectors.iter().any(|sv| sv.len() != length) {
            return Err(ModelError::Inconsistent(
                "support vectors differ in length".into(),
            ));
        }

        Ok(RefinementClassifier {
            support_vectors,
            weights,
            bias,
            limit_reliability,
            kernel,
            posterior,
        })
    }

    pub fn num_support_vectors(&self) -> usize {
        self.support_vectors.len()
    }

    pub fn limit_reliability(&self) -> f32 {
        self.limit_reliability
    }

    /// Shifts the accept/reject boundary without retraining.
    pub fn set_limit_reliability(&mut self, limit_reliability: f32) {
        self.limit_reliability = limit_reliability;
    }

    pub fn classify(&self, feature_vector: &FeatureVector) -> bool {
        self.classify_distance(self.compute_hyperplane_distance(feature_vector))
    }

    pub fn classify_distance(&self, distance: f64) -> bool {
        distance >= f64::from(self.limit_reliability)
    }

    /// Exact distance to the decision boundary,
    /// `-bias + sum(weight_i * kernel(v, sv_i))` over every support vector.
    ///
    /// The leading minus on the bias is the sign convention of the trained
    /// models this classifier is loaded from; changing it would silently
    /// invalidate them, so it is pinned by tests instead of re-derived.
    ///
    /// # Panics
    ///
    /// Panics if the feature vector length does not match the support
    /// vectors.
    pub fn compute_hyperplane_distance(&self, feature_vector: &FeatureVector) -> f64 {
        assert_eq!(
            feature_vector.len(),
            self.support_vectors[0].len(),
            "feature vector length does not match the support vectors"
        );

        let scaled = feature_vector.scaled();
        let mut distance = f64::from(-self.bias);
        for (weight, sv) in self.weights.iter().zip(&self.support_vectors) {
            distance += f64::from(*weight) * self.kernel.compute(&scaled, sv);
        }
        distance
    }

    pub fn certainty(&self, distance: f64) -> f64 {
        self.posterior.eval(distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::RbfKernel;

    fn classifier(
        support_vectors: Vec<Vec<f32>>,
        weights: Vec<f32>,
        bias: f32,
        limit_reliability: f32,
    ) -> RefinementClassifier {
        RefinementClassifier::new(
            support_vectors,
            weights,
            bias,
            limit_reliability,
            Box::new(RbfKernel::new(1.0)),
            Sigmoid::default(),
        )
        .unwrap()
    }

    #[test]
    fn self_similarity_scores_one() {
        let fv = FeatureVector::new(vec![0.1, 0.4, 0.8, 1.0], 2, 2);
        let c = classifier(vec![fv.scaled()], vec![1.0], 0.0, 0.5);

        let distance = c.compute_hyperplane_distance(&fv);
        assert_eq!(1.0, distance);
        assert!(c.classify_distance(distance));
        assert!(c.classify(&fv));
    }

    #[test]
    fn bias_enters_with_negative_sign() {
        let fv = FeatureVector::new(vec![0.5; 4], 2, 2);
        let c = classifier(vec![fv.scaled()], vec![1.0], 0.25, 0.0);
        assert!((c.compute_hyperplane_distance(&fv) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn distance_is_independent_of_support_vector_order() {
        let fv = FeatureVector::new(vec![0.2, 0.5, 0.7, 0.9], 2, 2);
        let sv1 = vec![50.0, 130.0, 180.0, 230.0];
        let sv2 = vec![10.0, 20.0, 30.0, 40.0];
        let sv3 = vec![250.0, 240.0, 230.0, 220.0];

        let forward = classifier(
            vec![sv1.clone(), sv2.clone(), sv3.clone()],
            vec![0.5, -0.25, 1.5],
            0.1,
            0.0,
        );
        let backward = classifier(vec![sv3, sv2, sv1], vec![1.5, -0.25, 0.5], 0.1, 0.0);

        let a = forward.compute_hyperplane_distance(&fv);
        let b = backward.compute_hyperplane_distance(&fv);
        let tolerance = 1e-5 * a.abs().max(b.abs()).max(1.0);
        assert!((a - b).abs() < tolerance, "{} vs {}", a, b);
    }

    #[test]
    fn operating_point_shifts_the_boundary() {
        let fv = FeatureVector::new(vec![0.3; 4], 2, 2);
        let mut c = classifier(vec![fv.scaled()], vec![1.0], 0.0, 0.5);
        assert!(c.classify(&fv));
        c.set_limit_reliability(1.5);
        assert!(!c.classify(&fv));
    }

    #[test]
    fn construction_rejects_mismatched_counts() {
        let result = RefinementClassifier::new(
            vec![vec![1.0, 2.0]],
            vec![1.0, 2.0],
            0.0,
            0.0,
            Box::new(RbfKernel::new(1.0)),
            Sigmoid::default(),
        );
        assert!(result.is_err());

        let result = RefinementClassifier::new(
            vec![vec![1.0, 2.0], vec![1.0]],
            vec![1.0, 2.0],
            0.0,
            0.0,
            Box::new(RbfKernel::new(1.0)),
            Sigmoid::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    #[should_panic]
    fn mismatched_length_input_fails_fast() {
        let fv = FeatureVector::new(vec![0.5; 4], 2, 2);
        let c = classifier(vec![fv.scaled()], vec![1.0], 0.0, 0.0);
        c.classify(&FeatureVector::new(vec![0.5; 6], 3, 2));
    }
}
