use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage, imageops};
use ndarray::Array4;

pub const CLASSIFIER_INPUT_SIZE: u32 = 224;

/// ImageNet channel means in BGR order, as used by ResNet50 "caffe" preprocessing.
const BGR_MEANS: [f32; 3] = [103.939, 116.779, 123.68];

const LETTERBOX_FILL: u8 = 114;

/// Geometry of a letterbox resize, needed to map boxes back to the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub size: u32,
}

impl Letterbox {
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resizes into a `size`×`size` square keeping aspect ratio, returning a
/// `[1, 3, size, size]` tensor scaled to `[0, 1]`.
pub fn letterbox(image: &DynamicImage, size: u32) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = image.to_rgb8();
    let resized = imageops::resize(&resized, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let s = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, s, s));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            size,
        },
    )
}

/// `[1, 224, 224, 3]` BGR mean-subtracted tensor for the disease classifier.
pub fn classifier_input(image: &DynamicImage) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let resized = imageops::resize(
        &rgb,
        CLASSIFIER_INPUT_SIZE,
        CLASSIFIER_INPUT_SIZE,
        FilterType::Lanczos3,
    );

    let s = CLASSIFIER_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, s, s, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let bgr = [pixel[2], pixel[1], pixel[0]];
        for c in 0..3 {
            tensor[[0, y as usize, x as usize, c]] = bgr[c] as f32 - BGR_MEANS[c];
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_pads_short_side() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([255, 0, 0])));
        let (tensor, geometry) = letterbox(&image, 64);
        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert!((geometry.scale - 0.32).abs() < 1e-6);
        assert_eq!(geometry.pad_x, 0.0);
        assert_eq!(geometry.pad_y, 16.0);
        // padding row stays at the fill value, content row is red
        assert!((tensor[[0, 0, 0, 10]] - 114.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 32, 10]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn letterbox_maps_back_to_source_pixels() {
        let geometry = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 10.0,
            size: 64,
        };
        assert_eq!(geometry.to_source(20.0, 30.0), (40.0, 40.0));
    }

    #[test]
    fn classifier_input_is_bgr_mean_subtracted() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 60, Rgb([200, 100, 50])));
        let tensor = classifier_input(&image);
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
        assert!((tensor[[0, 100, 100, 0]] - (50.0 - 103.939)).abs() < 1e-3);
        assert!((tensor[[0, 100, 100, 1]] - (100.0 - 116.779)).abs() < 1e-3);
        assert!((tensor[[0, 100, 100, 2]] - (200.0 - 123.68)).abs() < 1e-3);
    }
}
