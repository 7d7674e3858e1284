//! Anchor-following affine compositing.
//!
//! Output pixel `p` shows source pixel `M⁻¹ p`, where
//! `M = Translate(position) · Scale(scale) · Translate(-anchor)`. Pixel centers sit on
//! integer coordinates; samples outside the source read as opaque black.

use std::sync::Arc;

use crate::{
    core::{Affine, Anchor, Frame, Point, Rect, rgba_len},
    error::{RetrackError, RetrackResult},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resample {
    /// Box-filters the source down first when the output shrinks it; bilinear otherwise.
    /// Preview.
    Area,
    /// Bilinear. Export.
    Linear,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Compositor {
    width: u32,
    height: u32,
    position: Point,
    scale: f64,
    viewbox: Rect,
}

impl Compositor {
    pub fn new(
        width: u32,
        height: u32,
        position: Point,
        scale: f64,
        viewbox: Rect,
    ) -> RetrackResult<Self> {
        if width == 0 || height == 0 {
            return Err(RetrackError::validation(
                "output width/height must be non-zero",
            ));
        }
        if u16::try_from(width).is_err() || u16::try_from(height).is_err() {
            return Err(RetrackError::validation(
                "output width/height must fit in u16",
            ));
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(RetrackError::validation("scale must be finite and > 0"));
        }
        rgba_len(width, height)?;
        Ok(Self {
            width,
            height,
            position,
            scale,
            viewbox,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn viewbox(&self) -> Rect {
        self.viewbox
    }

    /// Source → output transform for `anchor`.
    pub fn transform(&self, anchor: Anchor) -> Affine {
        Affine::translate(self.position.to_vec2())
            * Affine::scale(self.scale)
            * Affine::translate(-anchor.to_vec2())
    }

    /// Output → source transform for `anchor`.
    pub fn inverse(&self, anchor: Anchor) -> Affine {
        self.transform(anchor).inverse()
    }

    /// The viewbox overlay rectangle expressed in source coordinates.
    pub fn viewbox_in_source(&self, anchor: Anchor) -> Rect {
        let inv = self.inverse(anchor);
        let tl = inv * Point::new(self.viewbox.x0, self.viewbox.y0);
        let br = inv * Point::new(self.viewbox.x1, self.viewbox.y1);
        Rect::from_points(tl, br)
    }

    pub fn render(
        &self,
        frame: &Frame,
        anchor: Anchor,
        resample: Resample,
    ) -> RetrackResult<Frame> {
        // The rasterizer puts pixel centers at +0.5; conjugating keeps them on integers.
        let half = Affine::translate((0.5, 0.5));
        let mut transform = half * self.transform(anchor) * half.inverse();

        let shrunk;
        let source = if resample == Resample::Area && self.scale < 1.0 {
            let w = ((f64::from(frame.width) * self.scale).round() as u32).max(1);
            let h = ((f64::from(frame.height) * self.scale).round() as u32).max(1);
            shrunk = Frame::from_image(image::imageops::resize(
                &frame.to_image()?,
                w,
                h,
                image::imageops::FilterType::Triangle,
            ));
            transform *= Affine::scale_non_uniform(
                f64::from(frame.width) / f64::from(w),
                f64::from(frame.height) / f64::from(h),
            );
            &shrunk
        } else {
            frame
        };

        let (out_w, out_h) = (self.width as u16, self.height as u16);
        let paint = vello_cpu::Image {
            image: vello_cpu::ImageSource::Pixmap(Arc::new(frame_to_pixmap(source)?)),
            // Medium quality, which is bilinear.
            sampler: vello_cpu::peniko::ImageSampler::default(),
        };

        let mut ctx = vello_cpu::RenderContext::new(out_w, out_h);
        ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(0, 0, 0, 255));
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(out_w),
            f64::from(out_h),
        ));

        ctx.set_transform(affine_to_cpu(transform));
        ctx.set_paint(paint);
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            0.0,
            0.0,
            f64::from(source.width),
            f64::from(source.height),
        ));
        ctx.flush();

        let mut pixmap = vello_cpu::Pixmap::new(out_w, out_h);
        ctx.render_to_pixmap(&mut pixmap);

        // Opaque background, so premultiplied and straight alpha agree.
        Frame::new(self.width, self.height, pixmap.data_as_u8_slice().to_vec())
    }
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn frame_to_pixmap(frame: &Frame) -> RetrackResult<vello_cpu::Pixmap> {
    let w: u16 = frame
        .width
        .try_into()
        .map_err(|_| RetrackError::evaluation("frame width exceeds u16"))?;
    let h: u16 = frame
        .height
        .try_into()
        .map_err(|_| RetrackError::evaluation("frame height exceeds u16"))?;
    if frame.data.len() != rgba_len(frame.width, frame.height)? {
        return Err(RetrackError::evaluation("frame byte length mismatch"));
    }

    let mut may_have_opacities = false;
    let pixels = frame
        .data
        .chunks_exact(4)
        .map(|px| {
            let a = px[3];
            may_have_opacities |= a != 255;
            let premul = |c: u8| ((u16::from(c) * u16::from(a) + 127) / 255) as u8;
            vello_cpu::peniko::color::PremulRgba8 {
                r: premul(px[0]),
                g: premul(px[1]),
                b: premul(px[2]),
                a,
            }
        })
        .collect();

    Ok(vello_cpu::Pixmap::from_parts_with_opacity(
        pixels,
        w,
        h,
        may_have_opacities,
    ))
}
