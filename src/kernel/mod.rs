use crate::math;

/// Similarity of two equal-length vectors. Implementations are stateless and
/// deterministic; a `RefinementClassifier` holds one as a trait object so the
/// kernel can be swapped per model.
pub trait Kernel: Send + Sync {
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    fn compute(&self, left: &[f32], right: &[f32]) -> f64;
}

/// Kernel type discriminator as stored in the parameter file.
#[derive(Debug, Hash, PartialEq, Eq, Clone)]
pub enum KernelKind {
    Rbf,
    Polynomial,
}

impl KernelKind {
    #[inline]
    pub fn from(id: i32) -> Option<Self> {
        match id {
            0 => Some(KernelKind::Rbf),
            1 => Some(KernelKind::Polynomial),
            _ => None,
        }
    }
}

/// Radial basis function kernel, `exp(-gamma * ||l - r||^2)`.
#[derive(Clone, Debug)]
pub struct RbfKernel {
    gamma: f32,
}

impl RbfKernel {
    pub fn new(gamma: f32) -> Self {
        RbfKernel { gamma }
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }
}

impl Kernel for RbfKernel {
    fn compute(&self, left: &[f32], right: &[f32]) -> f64 {
        f64::from((-self.gamma * math::vector_squared_distance(left, right)).exp())
    }
}

/// Inhomogeneous polynomial kernel, `((l . r) / divisor + 1)^degree`.
#[derive(Clone, Debug)]
pub struct PolynomialKernel {
    degree: i32,
    divisor: f32,
}

impl PolynomialKernel {
    pub fn new(degree: i32, divisor: f32) -> Self {
        PolynomialKernel { degree, divisor }
    }
}

impl Kernel for PolynomialKernel {
    fn compute(&self, left: &[f32], right: &[f32]) -> f64 {
        f64::from(math::vector_inner_product(left, right) / self.divisor + 1.0).powi(self.degree)
    }
}
