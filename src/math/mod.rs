use num::traits::Num;

pub fn vector_inner_product(left: &[f32], right: &[f32]) -> f32 {
    assert_eq!(left.len(), right.len());
    left.iter().zip(right).map(|(l, r)| l * r).sum()
}

pub fn vector_squared_distance(left: &[f32], right: &[f32]) -> f32 {
    assert_eq!(left.len(), right.len());
    left.iter()
        .zip(right)
        .map(|(l, r)| {
            let d = l - r;
            d * d
        })
        .sum()
}

/// Monotone mapping from a hyperplane distance to a certainty in `(0, 1)`,
/// `1 / (1 + exp(a * d + b))`. The parameters come from a posterior fit over
/// validation data; `a < 0` makes larger distances more certain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sigmoid {
    a: f32,
    b: f32,
}

impl Sigmoid {
    pub fn new(a: f32, b: f32) -> Self {
        Sigmoid { a, b }
    }

    pub fn eval(&self, distance: f64) -> f64 {
        1.0 / (1.0 + (f64::from(self.a) * distance + f64::from(self.b)).exp())
    }
}

impl Default for Sigmoid {
    fn default() -> Self {
        Sigmoid { a: -1.0, b: 0.0 }
    }
}

/// Summed-area table over a row-major grid of values.
///
/// `rect_sum` answers inclusive rectangle sums in constant time. Generic over
/// the cell type so the same code serves plain and squared intensity grids.
pub struct Integral<T> {
    width: u32,
    height: u32,
    sums: Vec<T>,
}

impl<T: Num + Copy> Integral<T> {
    /// # Panics
    ///
    /// Panics if `values.len()` is not `width * height` or either dimension
    /// is zero.
    pub fn new(values: &[T], width: u32, height: u32) -> Self {
        assert!(width > 0 && height > 0);
        assert_eq!(values.len(), (width * height) as usize);

        let w = width as usize;
        let mut sums: Vec<T> = Vec::with_capacity(values.len());
        let mut row_sum: T = num::zero();
        for &v in &values[..w] {
            row_sum = row_sum + v;
            sums.push(row_sum);
        }
        for y in 1..height as usize {
            let mut row_sum: T = num::zero();
            for x in 0..w {
                row_sum = row_sum + values[y * w + x];
                sums.push(sums[(y - 1) * w + x] + row_sum);
            }
        }

        Integral {
            width,
            height,
            sums,
        }
    }

    #[inline]
    fn at(&self, x: u32, y: u32) -> T {
        self.sums[(y * self.width + x) as usize]
    }

    /// Sum over the inclusive rectangle `[x1, x2] x [y1, y2]`.
    pub fn rect_sum(&self, x1: u32, y1: u32, x2: u32, y2: u32) -> T {
        assert!(x1 <= x2 && y1 <= y2);
        assert!(x2 < self.width && y2 < self.height);

        match (x1, y1) {
            (0, 0) => self.at(x2, y2),
            (0, _) => self.at(x2, y2) - self.at(x2, y1 - 1),
            (_, 0) => self.at(x2, y2) - self.at(x1 - 1, y2),
            (_, _) => {
                self.at(x2, y2) - self.at(x1 - 1, y2) - self.at(x2, y1 - 1)
                    + self.at(x1 - 1, y1 - 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_inner_product() {
        let vec = vec![1.0, 2.0, 3.0];
        assert_eq!(14.0, vector_inner_product(&vec, &vec));
    }

    #[test]
    fn test_vector_squared_distance() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![0.0, 4.0, 1.0];
        assert_eq!(9.0, vector_squared_distance(&a, &b));
    }

    #[test]
    fn test_sigmoid_default_is_logistic() {
        let s = Sigmoid::default();
        assert!((s.eval(0.0) - 0.5).abs() < 1e-12);
        assert!(s.eval(3.0) > 0.9);
        assert!(s.eval(-3.0) < 0.1);
    }

    #[test]
    fn test_sigmoid_monotone() {
        let s = Sigmoid::default();
        assert!(s.eval(-1.0) < s.eval(0.0));
        assert!(s.eval(0.0) < s.eval(1.0));
    }

    #[test]
    fn test_integral_full_rect() {
        let values = vec![1, 2, 3, 4, 5, 6];
        let integral = Integral::new(&values, 3, 2);
        assert_eq!(21, integral.rect_sum(0, 0, 2, 1));
    }

    #[test]
    fn test_integral_inner_rects() {
        #[rustfmt::skip]
        let values = vec![
            1.0, 2.0, 3.0,
            4.0, 5.0, 6.0,
            7.0, 8.0, 9.0,
        ];
        let integral = Integral::new(&values, 3, 3);
        assert_eq!(5.0, integral.rect_sum(1, 1, 1, 1));
        assert_eq!(28.0, integral.rect_sum(1, 1, 2, 2));
        assert_eq!(12.0, integral.rect_sum(0, 0, 1, 1));
        assert_eq!(16.0, integral.rect_sum(1, 0, 2, 1));
    }
}
