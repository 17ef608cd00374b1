// THEORY:
// The preprocessor turns a raw color frame into the representation the motion
// detector compares. Two steps, always in this order:
// 1.  **Luminance**: the three color channels collapse into one brightness
//     channel. Motion is a change in brightness; color adds noise and cost.
// 2.  **Smoothing**: a Gaussian blur suppresses single-pixel sensor noise so
//     that only spatially coherent change survives the difference step.
//
// The kernel is specified by size, the way camera tuning guides talk about it
// ("11x11 blur"). The size sets the window exactly; the sigma is derived from
// it with the usual rule of thumb for an unspecified sigma, so a given size
// always smooths the same way. Pixels past the image edge repeat the edge.

pub mod preprocessor {
    use crate::config::validate_kernel_size;
    use crate::core_modules::frame::{Frame, PreprocessedFrame};
    use crate::error::{Error, Result};
    use image::{GrayImage, ImageBuffer, Luma, imageops};
    use imageproc::filter::separable_filter_equal;

    /// Sigma implied by a kernel size when no explicit sigma is given.
    pub fn sigma_for_kernel(kernel_size: u32) -> f32 {
        0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    }

    /// Normalized one-dimensional Gaussian weights, `kernel_size` taps long.
    pub fn gaussian_kernel(kernel_size: u32) -> Vec<f32> {
        let sigma = sigma_for_kernel(kernel_size);
        let center = (kernel_size / 2) as f32;
        let weights: Vec<f32> = (0..kernel_size)
            .map(|i| {
                let offset = i as f32 - center;
                (-(offset * offset) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let total: f32 = weights.iter().sum();
        weights.into_iter().map(|w| w / total).collect()
    }

    /// Converts a frame to a blurred single-channel image.
    ///
    /// A kernel size of 1 skips smoothing. Even or zero sizes are rejected.
    pub fn preprocess(frame: &Frame, blur_kernel_size: u32) -> Result<PreprocessedFrame> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::InvalidFrame(format!(
                "cannot preprocess a {width}x{height} frame"
            )));
        }
        validate_kernel_size(blur_kernel_size)?;

        let luma = imageops::grayscale(frame.image());
        if blur_kernel_size == 1 {
            return Ok(PreprocessedFrame::new(luma));
        }

        // Both passes run in f32 and round once, so flat areas keep their level.
        let levels: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_fn(width, height, |x, y| Luma([luma.get_pixel(x, y).0[0] as f32]));
        let smoothed = separable_filter_equal(&levels, &gaussian_kernel(blur_kernel_size));
        let smoothed = GrayImage::from_fn(width, height, |x, y| {
            Luma([smoothed.get_pixel(x, y).0[0].round().clamp(0.0, 255.0) as u8])
        });
        Ok(PreprocessedFrame::new(smoothed))
    }
}

#[cfg(test)]
mod tests {
    use super::preprocessor::*;
    use crate::core_modules::frame::Frame;
    use crate::error::Error;
    use image::{Rgb, RgbImage};
    use std::time::Instant;

    fn frame_from(image: RgbImage) -> Frame {
        Frame::new(image, Instant::now())
    }

    #[test]
    fn sigma_follows_kernel_size() {
        assert!((sigma_for_kernel(11) - 2.0).abs() < 1e-6);
        assert!((sigma_for_kernel(3) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(11);
        assert_eq!(kernel.len(), 11);
        assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((kernel[0] - kernel[10]).abs() < 1e-7);
        assert!(kernel[5] > kernel[4]);
    }

    #[test]
    fn blur_stays_inside_the_kernel_window() {
        let mut image = RgbImage::new(21, 21);
        image.put_pixel(10, 10, Rgb([255, 255, 255]));
        let blurred = preprocess(&frame_from(image), 5).unwrap();

        assert!(blurred.luma().get_pixel(12, 10).0[0] > 0);
        assert_eq!(blurred.luma().get_pixel(13, 10).0[0], 0);
        assert_eq!(blurred.luma().get_pixel(10, 7).0[0], 0);
    }

    #[test]
    fn uniform_gray_stays_uniform() {
        let frame = frame_from(RgbImage::from_pixel(32, 24, Rgb([100, 100, 100])));
        let processed = preprocess(&frame, 11).unwrap();

        assert_eq!(processed.dimensions(), (32, 24));
        assert!(processed.luma().pixels().all(|p| p.0[0].abs_diff(100) <= 1));
    }

    #[test]
    fn blur_spreads_an_isolated_bright_pixel() {
        let mut image = RgbImage::new(21, 21);
        image.put_pixel(10, 10, Rgb([255, 255, 255]));
        let frame = frame_from(image);

        let sharp = preprocess(&frame, 1).unwrap();
        assert_eq!(sharp.luma().get_pixel(10, 10).0[0], 255);
        assert_eq!(sharp.luma().get_pixel(11, 10).0[0], 0);

        let blurred = preprocess(&frame, 11).unwrap();
        assert!(blurred.luma().get_pixel(10, 10).0[0] < 255);
        assert!(blurred.luma().get_pixel(11, 10).0[0] > 0);
    }

    #[test]
    fn empty_frame_is_invalid() {
        let frame = frame_from(RgbImage::new(0, 0));
        assert!(matches!(preprocess(&frame, 11), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn even_kernel_is_rejected() {
        let frame = frame_from(RgbImage::new(8, 8));
        assert!(matches!(preprocess(&frame, 4), Err(Error::Config(_))));
    }

    #[test]
    fn is_deterministic() {
        let mut image = RgbImage::new(16, 16);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 16) as u8, (y * 16) as u8, 40]);
        }
        let frame = frame_from(image);
        assert_eq!(preprocess(&frame, 5).unwrap(), preprocess(&frame, 5).unwrap());
    }
}
