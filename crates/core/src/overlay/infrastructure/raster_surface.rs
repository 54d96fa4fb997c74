use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::overlay::domain::overlay_surface::{self, LabelStyle, OverlaySurface};
use crate::shared::detection::{BoundingBox, Point};
use crate::shared::geometry::Size;

/// Fonts tried, in order, when no label font is given explicitly.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum FontError {
    #[error("failed to read font {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is not a usable TrueType/OpenType font")]
    Invalid { path: PathBuf },
}

pub fn load_font(path: &Path) -> Result<FontArc, FontError> {
    let bytes = fs::read(path).map_err(|source| FontError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    FontArc::try_from_vec(bytes).map_err(|_| FontError::Invalid {
        path: path.to_path_buf(),
    })
}

/// First usable font from [`SYSTEM_FONTS`], if any.
pub fn system_font() -> Option<FontArc> {
    SYSTEM_FONTS
        .iter()
        .map(Path::new)
        .filter(|path| path.is_file())
        .find_map(|path| load_font(path).ok())
}

struct Published {
    image: RgbaImage,
    generation: u64,
}

fn lock(published: &Mutex<Published>) -> MutexGuard<'_, Published> {
    published.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory RGBA overlay.
///
/// All drawing lands in a private back buffer. `present` copies it into the
/// front buffer shared with [`OverlayView`] readers, so a reader only ever
/// sees whole cycles.
///
/// Geometry comes from detection engines and is not trusted: non-finite
/// shapes are skipped and everything else is clipped to the surface before
/// it reaches the rasterizer.
pub struct RasterSurface {
    back: RgbaImage,
    front: Arc<Mutex<Published>>,
    label_font: Option<FontArc>,
}

impl RasterSurface {
    pub fn new(size: Size) -> Self {
        let back = RgbaImage::new(size.width, size.height);
        let front = Arc::new(Mutex::new(Published {
            image: back.clone(),
            generation: 0,
        }));
        Self {
            back,
            front,
            label_font: None,
        }
    }

    /// Font for score labels. Without one, labels are skipped.
    pub fn with_label_font(mut self, font: FontArc) -> Self {
        self.label_font = Some(font);
        self
    }

    /// A cheap, cloneable reader of presented frames.
    pub fn view(&self) -> OverlayView {
        OverlayView {
            published: Arc::clone(&self.front),
        }
    }

    fn bounds(&self) -> (i64, i64) {
        (i64::from(self.back.width()), i64::from(self.back.height()))
    }

    fn contains(&self, x: i64, y: i64) -> bool {
        let (max_x, max_y) = self.bounds();
        (0..max_x).contains(&x) && (0..max_y).contains(&y)
    }

    /// Clips a segment to the surface plus a one-pixel margin
    /// (Liang-Barsky). `None` when nothing of it is visible.
    ///
    /// Endpoints cut by an edge are snapped onto that edge, so segments far
    /// longer than the surface still land on the right pixels.
    fn clip_segment(&self, a: Point, b: Point) -> Option<(Point, Point)> {
        let (dx, dy) = (b.x - a.x, b.y - a.y);
        if !(a.x.is_finite() && a.y.is_finite() && dx.is_finite() && dy.is_finite()) {
            return None;
        }
        let (max_x, max_y) = self.bounds();
        let (lo, hi_x, hi_y) = (-1.0, max_x as f64 + 1.0, max_y as f64 + 1.0);

        // (p, q, axis is x, edge coordinate)
        let edges = [
            (-dx, a.x - lo, true, lo),
            (dx, hi_x - a.x, true, hi_x),
            (-dy, a.y - lo, false, lo),
            (dy, hi_y - a.y, false, hi_y),
        ];
        let mut enter: (f64, Option<(bool, f64)>) = (0.0, None);
        let mut exit: (f64, Option<(bool, f64)>) = (1.0, None);
        for (p, q, on_x, edge) in edges {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > exit.0 {
                    return None;
                }
                if r > enter.0 {
                    enter = (r, Some((on_x, edge)));
                }
            } else {
                if r < enter.0 {
                    return None;
                }
                if r < exit.0 {
                    exit = (r, Some((on_x, edge)));
                }
            }
        }

        let at = |(t, snap): (f64, Option<(bool, f64)>)| {
            let (mut x, mut y) = (a.x + t * dx, a.y + t * dy);
            match snap {
                Some((true, edge)) => x = edge,
                Some((false, edge)) => y = edge,
                None => {}
            }
            Point::new(x.clamp(lo, hi_x), y.clamp(lo, hi_y))
        };
        Some((at(enter), at(exit)))
    }
}

impl OverlaySurface for RasterSurface {
    fn size(&self) -> Size {
        Size::new(self.back.width(), self.back.height())
    }

    fn clear(&mut self) {
        for px in self.back.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
    }

    fn stroke_rect(&mut self, rect: &BoundingBox, color: overlay_surface::Rgba, line_width: u32) {
        if ![rect.x, rect.y, rect.width, rect.height]
            .iter()
            .all(|v| v.is_finite())
        {
            return;
        }
        // Float-to-int `as` saturates, so these are in range for any finite box.
        let (x, y) = (rect.x.round() as i64, rect.y.round() as i64);
        let (w, h) = (rect.width.round() as i64, rect.height.round() as i64);
        if w <= 0 || h <= 0 {
            return;
        }

        // Edges pushed past the margin stay off-canvas after clamping.
        let (max_x, max_y) = self.bounds();
        for i in 0..i64::from(line_width.max(1)) {
            // Grow outwards so the inner edge stays on the box.
            let left = x.saturating_sub(i).clamp(-1, max_x);
            let top = y.saturating_sub(i).clamp(-1, max_y);
            let right = x.saturating_add(w).saturating_add(i).clamp(-1, max_x + 1);
            let bottom = y.saturating_add(h).saturating_add(i).clamp(-1, max_y + 1);
            if right <= left || bottom <= top {
                continue;
            }
            let outline = Rect::at(left as i32, top as i32)
                .of_size((right - left) as u32, (bottom - top) as u32);
            draw_hollow_rect_mut(&mut self.back, outline, Rgba(color));
        }
    }

    fn stroke_polyline(
        &mut self,
        points: &[Point],
        closed: bool,
        color: overlay_surface::Rgba,
        line_width: u32,
    ) {
        if points.len() < 2 {
            return;
        }
        let mut segments: Vec<(Point, Point)> = points.windows(2).map(|w| (w[0], w[1])).collect();
        if closed && points.len() > 2 {
            segments.push((points[points.len() - 1], points[0]));
        }

        let width = line_width.max(1);
        for (a, b) in segments {
            let (dx, dy) = (b.x - a.x, b.y - a.y);
            let len = (dx * dx + dy * dy).sqrt();
            let (nx, ny) = if len > 0.0 && len.is_finite() {
                (-dy / len, dx / len)
            } else {
                (0.0, 0.0)
            };
            for k in 0..width {
                let offset = f64::from(k) - f64::from(width - 1) / 2.0;
                let (ox, oy) = (nx * offset, ny * offset);
                let shifted = (
                    Point::new(a.x + ox, a.y + oy),
                    Point::new(b.x + ox, b.y + oy),
                );
                let Some((start, end)) = self.clip_segment(shifted.0, shifted.1) else {
                    continue;
                };
                draw_line_segment_mut(
                    &mut self.back,
                    (start.x as f32, start.y as f32),
                    (end.x as f32, end.y as f32),
                    Rgba(color),
                );
            }
        }
    }

    fn fill_point(&mut self, center: Point, radius: f64, color: overlay_surface::Rgba) {
        if !(center.x.is_finite() && center.y.is_finite() && radius.is_finite()) {
            return;
        }
        let (max_x, max_y) = self.bounds();
        let r = radius.round().clamp(0.0, (max_x + max_y) as f64);
        let (cx, cy) = (center.x.round(), center.y.round());
        if cx < -r || cy < -r || cx > max_x as f64 + r || cy > max_y as f64 + r {
            return;
        }
        let (cx, cy, r) = (cx as i64, cy as i64, r as i64);
        if r == 0 {
            if self.contains(cx, cy) {
                self.back.put_pixel(cx as u32, cy as u32, Rgba(color));
            }
            return;
        }
        draw_filled_circle_mut(&mut self.back, (cx as i32, cy as i32), r as i32, Rgba(color));
    }

    fn draw_text(&mut self, anchor: Point, text: &str, style: &LabelStyle) {
        let Some(font) = &self.label_font else {
            return;
        };
        if text.is_empty()
            || !(anchor.x.is_finite() && anchor.y.is_finite())
            || !(style.size.is_finite() && style.size > 0.0)
        {
            return;
        }

        let scale = PxScale::from(style.size as f32);
        let (text_w, text_h) = text_size(scale, font, text);
        let pad = style.padding;
        let box_w = text_w.saturating_add(pad.saturating_mul(2));
        let box_h = text_h.saturating_add(pad.saturating_mul(2));
        if box_w == 0 || box_h == 0 {
            return;
        }

        let (max_x, max_y) = self.bounds();
        let left = anchor.x.round().clamp(-(box_w as f64), max_x as f64) as i32;
        let top = (anchor.y.round() - box_h as f64).clamp(-(box_h as f64), max_y as f64) as i32;
        draw_filled_rect_mut(
            &mut self.back,
            Rect::at(left, top).of_size(box_w, box_h),
            Rgba(style.background),
        );
        let inset = i32::try_from(pad).unwrap_or(i32::MAX);
        draw_text_mut(
            &mut self.back,
            Rgba(style.color),
            left.saturating_add(inset),
            top.saturating_add(inset),
            scale,
            font,
            text,
        );
    }

    fn present(&mut self) {
        let mut front = lock(&self.front);
        front.image.clone_from(&self.back);
        front.generation += 1;
    }
}

/// Read side of a [`RasterSurface`], shared with the UI thread.
#[derive(Clone)]
pub struct OverlayView {
    published: Arc<Mutex<Published>>,
}

impl OverlayView {
    /// Bumped on every `present`; readers re-upload only when it changes.
    pub fn generation(&self) -> u64 {
        lock(&self.published).generation
    }

    pub fn size(&self) -> Size {
        let front = lock(&self.published);
        Size::new(front.image.width(), front.image.height())
    }

    /// Copies out the latest presented overlay with its generation.
    pub fn snapshot(&self) -> (u64, RgbaImage) {
        let front = lock(&self.published);
        (front.generation, front.image.clone())
    }

    /// Number of non-transparent pixels in the presented overlay.
    pub fn painted_pixels(&self) -> usize {
        lock(&self.published)
            .image
            .pixels()
            .filter(|px| px.0[3] != 0)
            .count()
    }

    pub fn save_png(&self, path: &Path) -> image::ImageResult<()> {
        let (_, image) = self.snapshot();
        image.save_with_format(path, image::ImageFormat::Png)
    }
}
