use crate::common::FeatureVector;
use crate::math::{self, Integral, Sigmoid};
use crate::model::ModelError;

use super::LevelAndDistance;

/// Rectangular region of the filter window together with the gray value the
/// approximated filter takes on it.
#[derive(Clone, Debug)]
pub struct RectValue {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub value: f32,
}

/// Approximate reduced-set representation of one linear filter: a handful of
/// axis-aligned rectangles plus the precomputed self-convolution of the
/// approximated filter. Lets the cascade replace a full dot product by a few
/// summed-area lookups.
#[derive(Clone, Debug)]
pub struct ApproxFilter {
    pub rects: Vec<RectValue>,
    pub convol: f32,
}

/// Everything needed to construct a [`QuickRejectClassifier`]. Usually filled
/// in by the model loader; tests build it directly.
pub struct QuickRejectParams {
    pub filter_width: u32,
    pub filter_height: u32,
    /// RBF parameter of the hierarchical kernels, already scaled to the
    /// 0-255 pixel domain.
    pub basis_param: f32,
    pub num_levels: usize,
    pub num_filters_per_level: usize,
    /// 0 means "use all filters".
    pub num_used_filters: usize,
    /// One linear filter per cascade step, values on the 0-255 scale.
    pub lin_filters: Vec<Vec<f32>>,
    /// Row `i` holds the weights of kernel evaluations `0..=i` for level `i`.
    pub hk_weights: Vec<Vec<f32>>,
    pub thresholds: Vec<f32>,
    /// Offset folded into every threshold at construction time.
    pub limit_reliability_filter: f32,
    pub approx: Option<Vec<ApproxFilter>>,
    pub posterior: Sigmoid,
}

/// Hierarchical quick-reject classifier ("WVM").
///
/// Evaluates one reduced-set kernel per cascade step and accumulates a level
/// distance from the kernel evaluations seen so far. A level distance below
/// its threshold terminates the cascade immediately; most candidate patches
/// never reach the later, more selective levels.
pub struct QuickRejectClassifier {
    filter_width: u32,
    filter_height: u32,
    basis_param: f32,
    num_levels: usize,
    num_filters_per_level: usize,
    num_used_filters: usize,
    lin_filters: Vec<Vec<f32>>,
    hk_weights: Vec<Vec<f32>>,
    thresholds_from_file: Vec<f32>,
    thresholds: Vec<f32>,
    limit_reliability_filter: f32,
    approx: Option<Vec<ApproxFilter>>,
    posterior: Sigmoid,
}

impl QuickRejectClassifier {
    pub fn new(params: QuickRejectParams) -> Result<Self, ModelError> {
        let num_lin_filters = params.num_levels * params.num_filters_per_level;
        if num_lin_filters == 0 {
            return Err(ModelError::Inconsistent(
                "quick-reject model has no filters".into(),
            ));
        }
        if params.lin_filters.len() != num_lin_filters {
            return Err(ModelError::Inconsistent(format!(
                "expected {} linear filters, found {}",
                num_lin_filters,
                params.lin_filters.len()
            )));
        }
        let filter_len = (params.filter_width * params.filter_height) as usize;
        for (i, filter) in params.lin_filters.iter().enumerate() {
            if filter.len() != filter_len {
                return Err(ModelError::Inconsistent(format!(
                    "linear filter {} has length {}, expected {}",
                    i,
                    filter.len(),
                    filter_len
                )));
            }
        }
        if params.hk_weights.len() != num_lin_filters {
            return Err(ModelError::Inconsistent(format!(
                "expected {} hierarchical weight rows, found {}",
                num_lin_filters,
                params.hk_weights.len()
            )));
        }
        for (i, row) in params.hk_weights.iter().enumerate() {
            if row.len() < i + 1 {
                return Err(ModelError::Inconsistent(format!(
                    "hierarchical weight row {} has {} entries, needs at least {}",
                    i,
                    row.len(),
                    i + 1
                )));
            }
        }
        if params.thresholds.len() != num_lin_filters {
            return Err(ModelError::Inconsistent(format!(
                "expected {} hierarchical thresholds, found {}",
                num_lin_filters,
                params.thresholds.len()
            )));
        }
        if params.num_used_filters > num_lin_filters {
            return Err(ModelError::Inconsistent(format!(
                "num_used_filters {} exceeds filter count {}",
                params.num_used_filters, num_lin_filters
            )));
        }
        if let Some(approx) = &params.approx {
            if approx.len() != num_lin_filters {
                return Err(ModelError::Inconsistent(format!(
                    "expected {} approximate filters, found {}",
                    num_lin_filters,
                    approx.len()
                )));
            }
            for (i, filter) in approx.iter().enumerate() {
                for rect in &filter.rects {
                    if rect.x1 > rect.x2
                        || rect.y1 > rect.y2
                        || rect.x2 >= params.filter_width
                        || rect.y2 >= params.filter_height
                    {
                        return Err(ModelError::Inconsistent(format!(
                            "approximate filter {} has a rectangle outside the {}x{} window",
                            i, params.filter_width, params.filter_height
                        )));
                    }
                }
            }
        }

        let thresholds = params
            .thresholds
            .iter()
            .map(|t| t + params.limit_reliability_filter)
            .collect();

        Ok(QuickRejectClassifier {
            filter_width: params.filter_width,
            filter_height: params.filter_height,
            basis_param: params.basis_param,
            num_levels: params.num_levels,
            num_filters_per_level: params.num_filters_per_level,
            num_used_filters: params.num_used_filters,
            lin_filters: params.lin_filters,
            hk_weights: params.hk_weights,
            thresholds_from_file: params.thresholds,
            thresholds,
            limit_reliability_filter: params.limit_reliability_filter,
            approx: params.approx,
            posterior: params.posterior,
        })
    }

    pub fn filter_width(&self) -> u32 {
        self.filter_width
    }

    pub fn filter_height(&self) -> u32 {
        self.filter_height
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn num_filters_per_level(&self) -> usize {
        self.num_filters_per_level
    }

    pub fn num_lin_filters(&self) -> usize {
        self.lin_filters.len()
    }

    pub fn num_used_filters(&self) -> usize {
        self.num_used_filters
    }

    /// Change the number of filters the cascade may consult; 0 restores the
    /// full cascade.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the filter count.
    pub fn set_num_used_filters(&mut self, count: usize) {
        assert!(
            count <= self.lin_filters.len(),
            "num_used_filters {} exceeds filter count {}",
            count,
            self.lin_filters.len()
        );
        self.num_used_filters = count;
    }

    pub fn limit_reliability_filter(&self) -> f32 {
        self.limit_reliability_filter
    }

    /// Rewrites all hierarchical thresholds from their persisted values plus
    /// the given offset, shifting the operating point without retraining.
    pub fn set_limit_reliability_filter(&mut self, offset: f32) {
        self.limit_reliability_filter = offset;
        self.thresholds = self
            .thresholds_from_file
            .iter()
            .map(|t| t + offset)
            .collect();
    }

    fn active_filter_count(&self) -> usize {
        if self.num_used_filters == 0 {
            self.lin_filters.len()
        } else {
            self.num_used_filters
        }
    }

    pub fn classify(&self, feature_vector: &FeatureVector) -> bool {
        self.classify_distance(self.compute_hyperplane_distance(feature_vector))
    }

    /// True iff the distance reaches the threshold of the filter level it was
    /// computed at. Ties pass on to the next stage.
    pub fn classify_distance(&self, level_and_distance: LevelAndDistance) -> bool {
        level_and_distance.distance() >= f64::from(self.thresholds[level_and_distance.level()])
    }

    /// Runs the cascade and returns the index of the last evaluated filter
    /// together with the level distance computed there. An early rejection
    /// returns as soon as a level distance falls below its threshold; a full
    /// pass returns the last active level.
    ///
    /// # Panics
    ///
    /// Panics if the feature vector length does not match the filter window.
    pub fn compute_hyperplane_distance(&self, feature_vector: &FeatureVector) -> LevelAndDistance {
        assert_eq!(
            feature_vector.len(),
            (self.filter_width * self.filter_height) as usize,
            "feature vector length does not match the {}x{} filter window",
            self.filter_width,
            self.filter_height
        );

        let scaled = feature_vector.scaled();
        let bound = self.active_filter_count();

        // The integral image and the patch self-product are shared by all
        // fast-path kernel evaluations of this patch.
        let fast = self.approx.as_ref().map(|approx| {
            let integral = Integral::new(&scaled, self.filter_width, self.filter_height);
            let xx = math::vector_inner_product(&scaled, &scaled);
            (approx, integral, xx)
        });

        let mut kernel_evals: Vec<f32> = Vec::with_capacity(bound);
        let mut last = LevelAndDistance::new(0, 0.0);

        for level in 0..bound {
            let eval = match &fast {
                Some((approx, integral, xx)) => {
                    self.approx_kernel_eval(&approx[level], integral, *xx)
                }
                None => self.direct_kernel_eval(&scaled, &self.lin_filters[level]),
            };
            kernel_evals.push(eval);

            let mut distance = 0f32;
            for (weight, eval) in self.hk_weights[level].iter().zip(&kernel_evals) {
                distance += weight * eval;
            }

            last = LevelAndDistance::new(level, f64::from(distance));
            if distance < self.thresholds[level] {
                return last;
            }
        }

        last
    }

    pub fn certainty(&self, distance: f64) -> f64 {
        self.posterior.eval(distance)
    }

    fn direct_kernel_eval(&self, patch: &[f32], filter: &[f32]) -> f32 {
        (-self.basis_param * math::vector_squared_distance(patch, filter)).exp()
    }

    /// Same kernel evaluation from the reduced-set rectangles:
    /// `||x - z||^2 = x.x - 2 x.z + z.z`, with `x.z` assembled from rectangle
    /// sums and `z.z` precomputed at training time.
    fn approx_kernel_eval(&self, filter: &ApproxFilter, integral: &Integral<f32>, xx: f32) -> f32 {
        let mut xz = 0f32;
        for rect in &filter.rects {
            xz += rect.value * integral.rect_sum(rect.x1, rect.y1, rect.x2, rect.y2);
        }
        (-self.basis_param * (xx - 2.0 * xz + filter.convol)).exp()
    }
}
