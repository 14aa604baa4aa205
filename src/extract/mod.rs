use std::cmp;

use crate::common::{FeatureVector, ImageData, Rectangle};

/// Turns a sample region of a frame into the feature vector the classifiers
/// consume. Implementations must be usable from the parallel scoring loop.
pub trait PatchExtractor: Send + Sync {
    /// Returns `None` when no meaningful patch exists for the region, e.g.
    /// one with a zero or degenerate size.
    fn extract(&self, image: &ImageData, region: &Rectangle) -> Option<FeatureVector>;
}

/// Crops the region (padding pixels outside the frame with zeros), resizes it
/// bilinearly to the classifier window and normalizes to the 0-1 feature
/// domain.
pub struct GrayPatchExtractor {
    patch_width: u32,
    patch_height: u32,
}

impl GrayPatchExtractor {
    /// # Panics
    ///
    /// Panics if either patch dimension is zero.
    pub fn new(patch_width: u32, patch_height: u32) -> Self {
        assert!(
            patch_width > 0 && patch_height > 0,
            "illegal patch size: {}x{}",
            patch_width,
            patch_height
        );
        GrayPatchExtractor {
            patch_width,
            patch_height,
        }
    }

    fn crop_padded(image: &ImageData, region: &Rectangle) -> Vec<u8> {
        let img_width = image.width() as i32;
        let img_height = image.height() as i32;
        let mut data = vec![0u8; (region.width() * region.height()) as usize];

        let mut i = 0;
        for y in 0..region.height() as i32 {
            for x in 0..region.width() as i32 {
                let src_x = region.x() + x;
                let src_y = region.y() + y;
                if src_x >= 0 && src_x < img_width && src_y >= 0 && src_y < img_height {
                    data[i] = image.pixel(src_x as u32, src_y as u32);
                }
                i += 1;
            }
        }

        data
    }

    fn resize(src: &[u8], src_width: u32, src_height: u32, width: u32, height: u32) -> Vec<u8> {
        if src_width == width && src_height == height {
            return src.to_vec();
        }

        let x_scale = f64::from(src_width) / f64::from(width);
        let y_scale = f64::from(src_height) / f64::from(height);
        let mut dest = vec![0u8; (width * height) as usize];

        for y in 0..height {
            for x in 0..width {
                let src_x = x_scale * f64::from(x);
                let src_y = y_scale * f64::from(y);

                let x0 = cmp::min(src_x as u32, src_width - 2);
                let y0 = cmp::min(src_y as u32, src_height - 2);

                let x_weight = src_x - f64::from(x0);
                let y_weight = src_y - f64::from(y0);

                let d1 = f64::from(src[(y0 * src_width + x0) as usize]);
                let d2 = f64::from(src[(y0 * src_width + x0 + 1) as usize]);
                let d3 = f64::from(src[((y0 + 1) * src_width + x0) as usize]);
                let d4 = f64::from(src[((y0 + 1) * src_width + x0 + 1) as usize]);

                let value = (1.0 - y_weight) * ((1.0 - x_weight) * d1 + x_weight * d2)
                    + y_weight * ((1.0 - x_weight) * d3 + x_weight * d4);

                dest[(y * width + x) as usize] = value as u8;
            }
        }

        dest
    }
}

impl PatchExtractor for GrayPatchExtractor {
    fn extract(&self, image: &ImageData, region: &Rectangle) -> Option<FeatureVector> {
        // bilinear interpolation needs at least a 2x2 source
        if region.width() < 2 || region.height() < 2 {
            return None;
        }

        let cropped = Self::crop_padded(image, region);
        let resized = Self::resize(
            &cropped,
            region.width(),
            region.height(),
            self.patch_width,
            self.patch_height,
        );
        Some(FeatureVector::from_pixels(
            &resized,
            self.patch_width,
            self.patch_height,
        ))
    }
}
