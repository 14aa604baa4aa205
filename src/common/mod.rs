use std::fmt;

/// Axis-aligned region of a frame, in pixel coordinates.
///
/// The position may be negative (a sample drifting over the frame border);
/// patch extraction pads the missing pixels with zeros.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rectangle {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rectangle {
            x,
            y,
            width,
            height,
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn set_x(&mut self, x: i32) {
        self.x = x;
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn set_y(&mut self, y: i32) {
        self.y = y;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn set_width(&mut self, width: u32) {
        self.width = width;
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set_height(&mut self, height: u32) {
        self.height = height;
    }
}

/// Borrowed single-channel 8-bit image.
pub struct ImageData<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    num_channels: u32,
}

impl<'a> ImageData<'a> {
    /// # Panics
    ///
    /// Panics if `data.len()` is not `width * height`.
    pub fn new(data: &'a [u8], width: u32, height: u32) -> Self {
        assert_eq!(
            data.len(),
            width as usize * height as usize,
            "image buffer length does not match dimensions {}x{}",
            width,
            height
        );
        ImageData {
            data,
            width,
            height,
            num_channels: 1,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    pub fn data(&self) -> &[u8] {
        self.data
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }
}

impl fmt::Debug for ImageData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("num_channels", &self.num_channels)
            .finish()
    }
}

/// Fixed-length vector of normalized intensity samples extracted from a patch.
///
/// Values lie in `[0, 1]`, length is `width * height`. The classifiers rescale
/// to the 0-255 training domain internally, so a vector built from raw pixel
/// values would silently score garbage. Construction therefore rejects
/// out-of-range values outright.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
    width: u32,
    height: u32,
}

impl FeatureVector {
    /// # Panics
    ///
    /// Panics if the length does not match the dimensions or any value lies
    /// outside `[0, 1]`.
    pub fn new(values: Vec<f32>, width: u32, height: u32) -> Self {
        assert_eq!(
            values.len(),
            width as usize * height as usize,
            "feature vector length does not match dimensions {}x{}",
            width,
            height
        );
        for &v in &values {
            assert!(
                (0.0..=1.0).contains(&v),
                "feature value {} outside the normalized [0, 1] domain",
                v
            );
        }
        FeatureVector {
            values,
            width,
            height,
        }
    }

    pub fn from_pixels(pixels: &[u8], width: u32, height: u32) -> Self {
        assert_eq!(pixels.len(), width as usize * height as usize);
        let values = pixels.iter().map(|&p| f32::from(p) / 255.0).collect();
        FeatureVector {
            values,
            width,
            height,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Values rescaled to the 0-255 domain the models were trained in.
    pub fn scaled(&self) -> Vec<f32> {
        self.values.iter().map(|v| v * 255.0).collect()
    }
}

/// Label assigned to a sample during adaptive retraining.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleLabel {
    Positive,
    Negative,
    Unknown,
}

/// Tracked candidate region with a weight in `[0, 1]`.
#[derive(Clone, Debug)]
pub struct Sample {
    bounds: Rectangle,
    weight: f64,
    label: SampleLabel,
}

impl Sample {
    pub fn new(bounds: Rectangle) -> Self {
        Sample {
            bounds,
            weight: 0.0,
            label: SampleLabel::Unknown,
        }
    }

    pub fn bounds(&self) -> &Rectangle {
        &self.bounds
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    pub fn label(&self) -> SampleLabel {
        self.label
    }

    pub fn set_label(&mut self, label: SampleLabel) {
        self.label = label;
    }
}
