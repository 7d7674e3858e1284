//! Contracts for the optional tracking collaborators.
//!
//! Trackers and face detectors work on a half-resolution luma image. Everything they
//! report is in that reduced space; the session converts with [`tracker_upscale`] and
//! [`tracker_downscale`].

use image::{GrayImage, imageops::FilterType};

use crate::{
    core::{Frame, Point, Rect, Vec2},
    error::RetrackResult,
};

/// Source pixels per tracker pixel.
pub const TRACKER_SCALE: f64 = 2.0;
/// Fraction of the tracker's template replaced by each new observation.
pub const ADAPT_RATE: f64 = 0.2;
/// How far a detected face pulls the anchor toward its chin per frame.
pub const ATTRACT_RATE: f64 = 0.02;

pub fn tracker_upscale(p: Point) -> Point {
    Point::new(p.x * TRACKER_SCALE, p.y * TRACKER_SCALE)
}

pub fn tracker_downscale(p: Point) -> Point {
    Point::new(p.x / TRACKER_SCALE, p.y / TRACKER_SCALE)
}

/// Luma of a frame, reduced by [`TRACKER_SCALE`].
#[derive(Clone, Debug)]
pub struct GrayFrame {
    image: GrayImage,
}

impl GrayFrame {
    pub fn from_frame(frame: &Frame) -> RetrackResult<Self> {
        let luma = image::DynamicImage::ImageRgba8(frame.to_image()?).into_luma8();
        let w = ((f64::from(frame.width) / TRACKER_SCALE).round() as u32).max(1);
        let h = ((f64::from(frame.height) / TRACKER_SCALE).round() as u32).max(1);
        Ok(Self {
            image: image::imageops::resize(&luma, w, h, FilterType::Triangle),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, f64::from(self.width()), f64::from(self.height()))
    }
}

/// Result of one tracking step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackStep {
    /// Displacement since the previous frame, tracker space.
    pub delta: Vec2,
    /// False when the tracker lost its target.
    pub good: bool,
}

pub trait Tracker {
    fn position(&self) -> Point;
    fn set_position(&mut self, p: Point);
    /// Template size, tracker space.
    fn size(&self) -> Vec2;
    fn track(&mut self, frame: &GrayFrame) -> RetrackResult<TrackStep>;
    /// Move by `delta` and blend the template at `rate` toward the current frame.
    fn adapt(&mut self, frame: &GrayFrame, rate: f64, delta: Vec2) -> RetrackResult<()>;
}

pub trait FaceDetector {
    /// Face boxes in full tracker-space coordinates, searching only `roi` when given.
    fn detect(&mut self, frame: &GrayFrame, roi: Option<Rect>) -> RetrackResult<Vec<Rect>>;
}

/// The point a face attracts the anchor to: bottom-center of its box.
pub fn chin_point(face: Rect) -> Point {
    Point::new(face.center().x, face.y1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_frame_halves_dimensions() {
        let f = Frame::filled(8, 6, [255, 255, 255, 255]);
        let g = GrayFrame::from_frame(&f).unwrap();
        assert_eq!((g.width(), g.height()), (4, 3));
        assert_eq!(g.image().get_pixel(1, 1).0, [255]);
        assert_eq!(g.bounds(), Rect::new(0.0, 0.0, 4.0, 3.0));
    }

    #[test]
    fn single_pixel_frame_stays_non_empty() {
        let g = GrayFrame::from_frame(&Frame::filled(1, 1, [0, 0, 0, 255])).unwrap();
        assert_eq!((g.width(), g.height()), (1, 1));
    }

    #[test]
    fn scale_conversions_invert() {
        let p = Point::new(10.0, 7.0);
        assert_eq!(tracker_downscale(tracker_upscale(p)), p);
        assert_eq!(tracker_upscale(p), Point::new(20.0, 14.0));
    }

    #[test]
    fn chin_is_bottom_center() {
        assert_eq!(
            chin_point(Rect::new(10.0, 20.0, 30.0, 60.0)),
            Point::new(20.0, 60.0)
        );
    }
}
