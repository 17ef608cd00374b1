// THEORY:
// The motion detector is the engine of the spatial layer. It answers one
// question for a pair of preprocessed frames: where did the picture change?
//
// Algorithm steps:
// 1.  **Difference**: per-pixel absolute difference of the two luminance
//     images. Geometry must match exactly; a camera that silently changes
//     resolution shows up here as a `DimensionMismatch`.
// 2.  **Binarize**: pixels whose difference reaches the threshold become "on"
//     (255), everything else "off" (0).
// 3.  **Dilate**: the mask grows by a 3x3 square twice over. Adjacent fragments
//     of one moving object merge into a single blob, trading boundary precision
//     for fewer, larger regions.
// 4.  **Trace**: the border follower walks the outer boundary of every
//     top-level blob. Holes and blobs nested inside holes are ignored. The
//     mask is traced inside a one-pixel background frame: the follower only
//     recognises an outer border where a blob meets background, so a blob
//     touching the image edge would otherwise start out as a hole.
// 5.  **Filter**: each boundary's enclosed polygon area is compared with the
//     minimum area. Small components are dropped here and never reach callers.
//
// The detector is a stateless utility. It has no memory of earlier frames and
// never mutates its inputs.

pub mod motion_detector {
    use crate::core_modules::frame::{DetectionResult, MotionRegion, PreprocessedFrame};
    use crate::error::{Error, Result};
    use image::{GrayImage, imageops};
    use imageproc::contours::{BorderType, Contour, find_contours};
    use imageproc::distance_transform::Norm;
    use imageproc::morphology::dilate;

    const MASK_ON: u8 = 255;
    const MASK_OFF: u8 = 0;

    /// Width of the background frame put around the mask before tracing.
    const TRACE_PADDING: i32 = 1;

    /// Two passes of a 3x3 square dilation reach two pixels in every direction,
    /// diagonals included. That is a single L-infinity dilation of radius 2.
    const DILATION_RADIUS: u8 = 2;

    /// Compares two preprocessed frames and returns every region of change whose
    /// enclosed area is at least `min_area` pixels.
    pub fn detect(
        prev: &PreprocessedFrame,
        curr: &PreprocessedFrame,
        threshold: u8,
        min_area: f64,
    ) -> Result<DetectionResult> {
        let mask = binary_difference(prev, curr, threshold)?;
        let dilated = dilate(&mask, Norm::LInf, DILATION_RADIUS);

        let regions: Vec<MotionRegion> = find_contours::<i32>(&padded(&dilated))
            .iter()
            .filter(|contour| is_external(contour))
            .filter_map(region_from_contour)
            .filter(|region| region.area >= min_area)
            .collect();

        if !regions.is_empty() {
            log::trace!("{} motion region(s) detected", regions.len());
        }
        Ok(DetectionResult::new(regions))
    }

    /// Steps 1 and 2: absolute difference followed by a binary threshold.
    pub fn binary_difference(
        prev: &PreprocessedFrame,
        curr: &PreprocessedFrame,
        threshold: u8,
    ) -> Result<GrayImage> {
        if prev.dimensions() != curr.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: prev.dimensions(),
                found: curr.dimensions(),
            });
        }
        let (width, height) = prev.dimensions();

        let mask: Vec<u8> = prev
            .luma()
            .as_raw()
            .iter()
            .zip(curr.luma().as_raw())
            .map(|(a, b)| if a.abs_diff(*b) >= threshold { MASK_ON } else { MASK_OFF })
            .collect();

        GrayImage::from_raw(width, height, mask)
            .ok_or_else(|| Error::InvalidFrame(format!("difference mask for {width}x{height} frames")))
    }

    /// Copies the mask into a background frame `TRACE_PADDING` pixels wide, so
    /// every blob lies strictly inside the traced image.
    fn padded(mask: &GrayImage) -> GrayImage {
        let border = 2 * TRACE_PADDING as u32;
        let mut framed = GrayImage::new(mask.width() + border, mask.height() + border);
        imageops::replace(&mut framed, mask, TRACE_PADDING as i64, TRACE_PADDING as i64);
        framed
    }

    /// Outer borders without a parent are the boundaries of top-level blobs.
    fn is_external(contour: &Contour<i32>) -> bool {
        contour.border_type == BorderType::Outer && contour.parent.is_none()
    }

    /// Bounding box and enclosed area of one traced boundary, in the
    /// coordinates of the unpadded mask.
    fn region_from_contour(contour: &Contour<i32>) -> Option<MotionRegion> {
        let first = contour.points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for point in &contour.points {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }

        Some(MotionRegion {
            x: (min_x - TRACE_PADDING).max(0) as u32,
            y: (min_y - TRACE_PADDING).max(0) as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
            area: enclosed_area(contour),
        })
    }

    /// Shoelace formula over the boundary points. A closed polygon, so the last
    /// point connects back to the first.
    pub(crate) fn enclosed_area(contour: &Contour<i32>) -> f64 {
        let points = &contour.points;
        if points.len() < 3 {
            return 0.0;
        }
        let mut twice_area = 0i64;
        for (i, current) in points.iter().enumerate() {
            let next = &points[(i + 1) % points.len()];
            twice_area += current.x as i64 * next.y as i64 - next.x as i64 * current.y as i64;
        }
        twice_area.abs() as f64 / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::motion_detector::*;
    use crate::core_modules::frame::{Frame, PreprocessedFrame};
    use crate::core_modules::preprocessor::preprocessor::preprocess;
    use crate::error::Error;
    use image::{Rgb, RgbImage};
    use std::time::Instant;

    const WIDTH: u32 = 200;
    const HEIGHT: u32 = 150;

    fn blank() -> RgbImage {
        RgbImage::new(WIDTH, HEIGHT)
    }

    fn with_block(mut image: RgbImage, x: u32, y: u32, w: u32, h: u32, level: u8) -> RgbImage {
        for py in y..y + h {
            for px in x..x + w {
                image.put_pixel(px, py, Rgb([level, level, level]));
            }
        }
        image
    }

    fn prepared(image: RgbImage) -> PreprocessedFrame {
        preprocess(&Frame::new(image, Instant::now()), 11).unwrap()
    }

    #[test]
    fn identical_frames_have_no_motion() {
        let scene = with_block(blank(), 30, 30, 60, 40, 180);
        let result = detect(&prepared(scene.clone()), &prepared(scene), 30, 1000.0).unwrap();
        assert!(!result.motion_present());
    }

    #[test]
    fn block_at_origin_yields_one_region() {
        let before = prepared(blank());
        let after = prepared(with_block(blank(), 0, 0, 50, 50, 255));

        let result = detect(&before, &after, 30, 1000.0).unwrap();

        assert_eq!(result.len(), 1);
        let region = result.regions[0];
        assert_eq!((region.x, region.y), (0, 0));
        assert!((45..=60).contains(&region.width), "width {}", region.width);
        assert!((45..=60).contains(&region.height), "height {}", region.height);
        assert!(region.area >= 1000.0);
    }

    #[test]
    fn blocks_touching_an_edge_are_reported() {
        let before = prepared(blank());
        for (x, y) in [(0, 40), (40, 0), (0, HEIGHT - 50), (WIDTH - 50, 0), (WIDTH - 50, HEIGHT - 50)] {
            let after = prepared(with_block(blank(), x, y, 50, 50, 255));

            let result = detect(&before, &after, 30, 1000.0).unwrap();

            assert_eq!(result.len(), 1, "block at ({x}, {y})");
            assert!(result.regions[0].covers(x, y, 50, 50), "block at ({x}, {y})");
        }
    }

    #[test]
    fn full_frame_change_is_one_region() {
        let before = prepared(blank());
        let after = prepared(with_block(blank(), 0, 0, WIDTH, HEIGHT, 255));

        let result = detect(&before, &after, 30, 1000.0).unwrap();

        assert_eq!(result.len(), 1);
        let region = result.regions[0];
        assert_eq!((region.x, region.y, region.width, region.height), (0, 0, WIDTH, HEIGHT));
    }

    #[test]
    fn changed_area_is_covered_by_a_region() {
        let before = prepared(blank());
        let after = prepared(with_block(blank(), 80, 60, 40, 40, 255));

        let result = detect(&before, &after, 30, 1000.0).unwrap();

        assert!(result.iter().any(|region| region.covers(80, 60, 40, 40)));
    }

    #[test]
    fn small_change_is_discarded() {
        let before = prepared(blank());
        let after = prepared(with_block(blank(), 100, 70, 10, 10, 255));

        let result = detect(&before, &after, 30, 1000.0).unwrap();
        assert!(result.is_empty());

        // The same change is reported once the minimum area allows it.
        let result = detect(&before, &after, 30, 50.0).unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn change_below_threshold_is_ignored() {
        let before = prepared(with_block(blank(), 0, 0, WIDTH, HEIGHT, 100));
        let after = prepared(with_block(blank(), 0, 0, WIDTH, HEIGHT, 120));

        let result = detect(&before, &after, 30, 1000.0).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn nearby_fragments_merge_into_one_region() {
        let before = prepared(blank());
        let after = with_block(blank(), 20, 20, 30, 30, 255);
        let after = prepared(with_block(after, 52, 20, 30, 30, 255));

        let result = detect(&before, &after, 30, 1000.0).unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.regions[0].covers(20, 20, 62, 30));
    }

    #[test]
    fn distant_changes_stay_separate() {
        let before = prepared(blank());
        let after = with_block(blank(), 5, 5, 40, 40, 255);
        let after = prepared(with_block(after, 140, 90, 40, 40, 255));

        let result = detect(&before, &after, 30, 1000.0).unwrap();
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn geometry_change_is_a_dimension_mismatch() {
        let before = prepared(blank());
        let after = prepared(RgbImage::new(WIDTH / 2, HEIGHT / 2));

        match detect(&before, &after, 30, 1000.0) {
            Err(Error::DimensionMismatch { expected, found }) => {
                assert_eq!(expected, (WIDTH, HEIGHT));
                assert_eq!(found, (WIDTH / 2, HEIGHT / 2));
            }
            other => panic!("expected a dimension mismatch, got {other:?}"),
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let sharp = |image| preprocess(&Frame::new(image, Instant::now()), 1).unwrap();
        let before = sharp(with_block(blank(), 0, 0, WIDTH, HEIGHT, 10));
        let after = sharp(with_block(blank(), 0, 0, WIDTH, HEIGHT, 40));

        let mask = binary_difference(&before, &after, 30).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == 255));
    }
}
