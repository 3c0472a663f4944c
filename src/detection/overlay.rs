//! Box overlays on the display copy of a frame.

use super::{ClassLabel, DetectionResult};
use crate::hardware::Frame;

const LINE_WIDTH: u32 = 2;

/// BGR colour used for a class outline.
pub fn color_for(label: ClassLabel) -> [u8; 3] {
    match label {
        ClassLabel::Driver => [255, 0, 0],
        ClassLabel::Forklift => [0, 165, 255],
        ClassLabel::Person => [0, 0, 255],
    }
}

/// Return a copy of `frame` with an outline drawn for every detection.
///
/// Boxes are clipped to the frame. Grayscale frames get white outlines.
pub fn draw_detections(frame: &Frame, result: &DetectionResult) -> Frame {
    let mut out = frame.clone();
    if frame.width == 0 || frame.height == 0 {
        return out;
    }

    for detection in result.detections() {
        let color = color_for(detection.label);
        let color: &[u8] = if out.channels >= 3 { &color } else { &[255] };

        let x1 = detection.bbox.x1.min(out.width - 1);
        let y1 = detection.bbox.y1.min(out.height - 1);
        let x2 = detection.bbox.x2.min(out.width - 1);
        let y2 = detection.bbox.y2.min(out.height - 1);

        for t in 0..LINE_WIDTH {
            for x in x1..=x2 {
                out.set_pixel(x, y1.saturating_add(t).min(y2), color);
                out.set_pixel(x, y2.saturating_sub(t).max(y1), color);
            }
            for y in y1..=y2 {
                out.set_pixel(x1.saturating_add(t).min(x2), y, color);
                out.set_pixel(x2.saturating_sub(t).max(x1), y, color);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, Detection};

    #[test]
    fn draws_outline_and_keeps_interior() {
        let frame = Frame::filled(20, 20, 3, 0);
        let result = DetectionResult::new(vec![Detection {
            label: ClassLabel::Person,
            bbox: BoundingBox::new(2, 2, 12, 12),
            confidence: 0.8,
        }]);

        let drawn = draw_detections(&frame, &result);
        assert_eq!(drawn.pixel(2, 2), Some(&[0u8, 0, 255][..]));
        assert_eq!(drawn.pixel(12, 7), Some(&[0u8, 0, 255][..]));
        assert_eq!(drawn.pixel(7, 7), Some(&[0u8, 0, 0][..]));
        // the source frame is untouched
        assert_eq!(frame.pixel(2, 2), Some(&[0u8, 0, 0][..]));
    }

    #[test]
    fn clips_boxes_outside_frame() {
        let frame = Frame::filled(10, 10, 1, 0);
        let result = DetectionResult::new(vec![Detection {
            label: ClassLabel::Forklift,
            bbox: BoundingBox::new(5, 5, 400, 400),
            confidence: 0.5,
        }]);
        let drawn = draw_detections(&frame, &result);
        assert_eq!(drawn.pixel(9, 9), Some(&[255u8][..]));
        assert!(drawn.is_well_formed());
    }
}
