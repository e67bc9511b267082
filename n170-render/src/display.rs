use crate::stimulus::ImageStimulus;
use crate::text::render_text_pixmap;
use ab_glyph::FontVec;
use anyhow::{Context, Result, anyhow};
use bytemuck::{cast_slice, cast_slice_mut};
use log::debug;
use n170_cache::Atom;
use n170_core::{Display, Stimulus};
use n170_timing::{CalibrationStats, HighPrecisionTimer, Timer};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tiny_skia::{Color, FilterQuality, Pixmap, PixmapPaint, Transform};

struct TextCache {
    font: FontVec,
    size_px: f32,
    /// Blank lines are cached as `None`.
    map: HashMap<Atom, Option<Arc<Pixmap>>>,
}

impl TextCache {
    fn get_or_render(&mut self, line: &str) -> Option<Arc<Pixmap>> {
        let (font, size_px) = (&self.font, self.size_px);
        self.map
            .entry(Atom::from(line))
            .or_insert_with(|| {
                render_text_pixmap(line, size_px, font, Color::from_rgba8(255, 255, 255, 255))
                    .map(Arc::new)
            })
            .clone()
    }
}

/// Software display: stimuli are composed on an offscreen back buffer and
/// copied to the front buffer on `flip`.
pub struct SkiaDisplay {
    width: u32,
    height: u32,
    center: (f32, f32),
    background: [u8; 4],

    canvas: Pixmap,
    front: Vec<u8>,
    clear_buffer: Vec<u8>,

    /// Screen-fitted copies of each stimulus, keyed by cache id.
    fitted: HashMap<usize, Arc<Pixmap>>,
    text: Option<TextCache>,

    flip_timer: HighPrecisionTimer,
    last_flip_ns: Option<u64>,
}

impl SkiaDisplay {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let background = [128u8, 128, 128, 255];
        let canvas = Self::blank_canvas(width, height, background)?;
        let clear_buffer = canvas.data().to_vec();
        Ok(Self {
            width,
            height,
            center: (width as f32 / 2.0, height as f32 / 2.0),
            background,
            front: clear_buffer.clone(),
            canvas,
            clear_buffer,
            fitted: HashMap::new(),
            text: None,
            flip_timer: HighPrecisionTimer::new(),
            last_flip_ns: None,
        })
    }

    /// Load a TTF/OTF font for instruction screens.
    pub fn with_font(mut self, path: &Path, size_px: f32) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| anyhow!("{} is not a usable font", path.display()))?;
        self.text = Some(TextCache {
            font,
            size_px,
            map: HashMap::new(),
        });
        Ok(self)
    }

    fn blank_canvas(width: u32, height: u32, bg: [u8; 4]) -> Result<Pixmap> {
        let mut canvas = Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("invalid display size {width}x{height}"))?;
        canvas.fill(Color::from_rgba8(bg[0], bg[1], bg[2], bg[3]));
        Ok(canvas)
    }

    pub fn resize(&mut self, new_width: u32, new_height: u32) -> Result<()> {
        self.canvas = Self::blank_canvas(new_width, new_height, self.background)?;
        self.width = new_width;
        self.height = new_height;
        self.center = (new_width as f32 / 2.0, new_height as f32 / 2.0);
        self.clear_buffer = self.canvas.data().to_vec();
        self.front = self.clear_buffer.clone();
        // fitted sizes depend on the screen
        self.fitted.clear();
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// RGBA bytes of the last flipped frame.
    pub fn front(&self) -> &[u8] {
        &self.front
    }

    pub fn frame_count(&self) -> usize {
        self.flip_timer.frame_count()
    }

    /// Inter-flip timing, the same statistics the timer calibration reports.
    pub fn flip_stats(&self) -> CalibrationStats {
        self.flip_timer.calibration_stats()
    }

    /// Draw centered lines of text into the back buffer. Without a font this
    /// leaves the blank background.
    pub fn draw_text(&mut self, lines: &[&str]) {
        let Some(cache) = self.text.as_mut() else {
            return;
        };
        let rendered: Vec<Option<Arc<Pixmap>>> =
            lines.iter().map(|l| cache.get_or_render(l)).collect();
        let line_h = cache.size_px * 1.4;
        let top = self.center.1 - line_h * (rendered.len() as f32 - 1.0) / 2.0;
        for (i, pm) in rendered.iter().enumerate() {
            if let Some(pm) = pm {
                self.blit(pm, (self.center.0, top + i as f32 * line_h));
            }
        }
    }

    fn fit(&mut self, image: &ImageStimulus) -> Result<Arc<Pixmap>> {
        if let Some(p) = self.fitted.get(&image.cache_id()) {
            return Ok(Arc::clone(p));
        }
        let (iw, ih) = image.size();
        let scale = (self.width as f32 / iw as f32)
            .min(self.height as f32 / ih as f32)
            .min(1.0);
        let fitted = if scale >= 1.0 {
            Arc::clone(image.pixmap())
        } else {
            let tw = ((iw as f32 * scale).round() as u32).max(1);
            let th = ((ih as f32 * scale).round() as u32).max(1);
            let mut pm = Pixmap::new(tw, th).ok_or_else(|| anyhow!("invalid fitted size"))?;
            let paint = PixmapPaint {
                quality: FilterQuality::Bilinear,
                ..PixmapPaint::default()
            };
            let src: &Pixmap = image.pixmap();
            pm.draw_pixmap(
                0,
                0,
                src.as_ref(),
                &paint,
                Transform::from_scale(scale, scale),
                None,
            );
            debug!(
                "scaled {} from {}x{} to {}x{}",
                image.source().display(),
                iw,
                ih,
                tw,
                th
            );
            Arc::new(pm)
        };
        self.fitted.insert(image.cache_id(), Arc::clone(&fitted));
        Ok(fitted)
    }

    /// Copy `pm` centered at `pos`, clipped to the canvas.
    fn blit(&mut self, pm: &Pixmap, pos: (f32, f32)) {
        let (w, h) = (pm.width() as i32, pm.height() as i32);
        let (cw, ch) = (self.width as i32, self.height as i32);

        let x = (pos.0 - w as f32 * 0.5).floor() as i32;
        let y = (pos.1 - h as f32 * 0.5).floor() as i32;

        // Cull fully off-screen
        if x + w <= 0 || y + h <= 0 || x >= cw || y >= ch {
            return;
        }

        let dst_x = x.max(0) as usize;
        let dst_y = y.max(0) as usize;
        let src_x = (-x).max(0) as usize;
        let src_y = (-y).max(0) as usize;
        let copy_w = (w as usize - src_x).min(cw as usize - dst_x);
        let copy_h = (h as usize - src_y).min(ch as usize - dst_y);
        let src_stride = w as usize;
        let dst_stride = cw as usize;

        let src_u32: &[u32] = cast_slice(pm.data());
        let fully_opaque = (0..copy_h).all(|row| {
            let start = (src_y + row) * src_stride + src_x;
            src_u32[start..start + copy_w].iter().all(|&p| p >> 24 == 0xFF)
        });

        let dst_u32: &mut [u32] = cast_slice_mut(self.canvas.data_mut());
        if fully_opaque {
            for row in 0..copy_h {
                let s = (src_y + row) * src_stride + src_x;
                let d = (dst_y + row) * dst_stride + dst_x;
                dst_u32[d..d + copy_w].copy_from_slice(&src_u32[s..s + copy_w]);
            }
            return;
        }

        for row in 0..copy_h {
            let s0 = (src_y + row) * src_stride + src_x;
            let d0 = (dst_y + row) * dst_stride + dst_x;
            for i in 0..copy_w {
                let s = src_u32[s0 + i];
                let d = dst_u32[d0 + i];
                let inv = 255 - (s >> 24);
                // premultiplied over, per channel
                let mut out = 0u32;
                for shift in [0, 8, 16, 24] {
                    let sc = (s >> shift) & 0xFF;
                    let dc = (d >> shift) & 0xFF;
                    out |= ((sc + (dc * inv + 127) / 255).min(255)) << shift;
                }
                dst_u32[d0 + i] = out;
            }
        }
    }
}

impl Display for SkiaDisplay {
    type Image = ImageStimulus;

    fn draw(&mut self, image: &ImageStimulus) -> Result<()> {
        let fitted = self.fit(image)?;
        self.blit(&fitted, self.center);
        Ok(())
    }

    fn clear(&mut self) {
        self.canvas.data_mut().copy_from_slice(&self.clear_buffer);
    }

    fn flip(&mut self) -> Result<()> {
        self.front.copy_from_slice(self.canvas.data());
        let now = self.flip_timer.now();
        let since = self.last_flip_ns.map_or(0, |last| now.saturating_sub(last));
        self.flip_timer
            .record_frame(std::time::Duration::from_nanos(since));
        self.last_flip_ns = Some(now);
        Ok(())
    }
}
