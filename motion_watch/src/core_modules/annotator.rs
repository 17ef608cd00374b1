// THEORY:
// The annotator is the only part of the pipeline that draws. It works on a copy
// of the display frame, so the frame that gets persisted is always the clean
// camera image. Each region gets a thin outline; any motion at all lights a
// single marker in the top-left corner.

use crate::core_modules::frame::{DetectionResult, Frame};
use image::Rgb;
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

const OUTLINE_COLOR: Rgb<u8> = Rgb([48, 209, 88]);
const OUTLINE_THICKNESS: u32 = 2;
const MARKER_CENTER: (i32, i32) = (20, 20);
const MARKER_RADIUS: i32 = 8;

/// Returns a copy of `display` with every region outlined and, if any region
/// exists, the motion marker drawn.
pub fn annotate(display: &Frame, detection: &DetectionResult) -> Frame {
    let mut canvas = display.image().clone();

    for region in detection.iter() {
        // Concentric one-pixel rectangles, growing inward.
        for inset in 0..OUTLINE_THICKNESS {
            if region.width <= 2 * inset || region.height <= 2 * inset {
                break;
            }
            let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32)
                .of_size(region.width - 2 * inset, region.height - 2 * inset);
            draw_hollow_rect_mut(&mut canvas, rect, OUTLINE_COLOR);
        }
    }

    if detection.motion_present() {
        draw_filled_circle_mut(&mut canvas, MARKER_CENTER, MARKER_RADIUS, OUTLINE_COLOR);
    }

    Frame::new(canvas, display.captured_at())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame::MotionRegion;
    use image::RgbImage;
    use std::time::Instant;

    fn scene() -> Frame {
        let mut image = RgbImage::new(120, 80);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([x as u8, y as u8, 90]);
        }
        Frame::new(image, Instant::now())
    }

    #[test]
    fn no_regions_means_no_marks() {
        let display = scene();
        let once = annotate(&display, &DetectionResult::default());
        let twice = annotate(&once, &DetectionResult::default());
        assert_eq!(once, display);
        assert_eq!(twice, display);
    }

    #[test]
    fn outlines_regions_and_lights_the_marker() {
        let display = scene();
        let region = MotionRegion { x: 50, y: 30, width: 40, height: 30, area: 1200.0 };
        let annotated = annotate(&display, &DetectionResult::new(vec![region]));

        let image = annotated.image();
        assert_eq!(*image.get_pixel(50, 30), OUTLINE_COLOR);
        assert_eq!(*image.get_pixel(51, 31), OUTLINE_COLOR);
        assert_eq!(*image.get_pixel(89, 59), OUTLINE_COLOR);
        assert_eq!(*image.get_pixel(70, 45), *display.image().get_pixel(70, 45));
        assert_eq!(*image.get_pixel(20, 20), OUTLINE_COLOR);
    }

    #[test]
    fn input_frame_is_left_untouched() {
        let display = scene();
        let before = display.clone();
        let region = MotionRegion { x: 0, y: 0, width: 20, height: 20, area: 400.0 };
        let _ = annotate(&display, &DetectionResult::new(vec![region]));
        assert_eq!(display, before);
    }
}
