use ab_glyph::{Font, Glyph, OutlinedGlyph, PxScale, Rect, ScaleFont, point};
use tiny_skia::{Color, ColorU8, Pixmap};

/// Lay `text` out on a single baseline placed at the font ascent.
fn layout<F: Font>(text: &str, size_px: f32, font: &F) -> Vec<OutlinedGlyph> {
    let scale = PxScale::from(size_px);
    let scaled = font.as_scaled(scale);
    let mut caret = 0.0f32;
    let mut prev = None;
    text.chars()
        .filter_map(|ch| {
            let id = font.glyph_id(ch);
            if let Some(p) = prev {
                caret += scaled.kern(p, id);
            }
            let glyph = Glyph {
                id,
                scale,
                position: point(caret, scaled.ascent()),
            };
            caret += scaled.h_advance(id);
            prev = Some(id);
            font.outline_glyph(glyph)
        })
        .collect()
}

fn union_bounds(glyphs: &[OutlinedGlyph]) -> Option<Rect> {
    glyphs
        .iter()
        .map(OutlinedGlyph::px_bounds)
        .reduce(|a, b| Rect {
            min: point(a.min.x.min(b.min.x), a.min.y.min(b.min.y)),
            max: point(a.max.x.max(b.max.x), a.max.y.max(b.max.y)),
        })
}

/// Rasterize one line of text into a transparent pixmap tightly bounding its
/// ink. Lines without visible glyphs give `None`.
pub fn render_text_pixmap<F: Font>(
    text: &str,
    size_px: f32,
    font: &F,
    color: Color,
) -> Option<Pixmap> {
    let glyphs = layout(text, size_px, font);
    let bounds = union_bounds(&glyphs)?;
    let (ox, oy) = (bounds.min.x.floor(), bounds.min.y.floor());
    let width = (bounds.max.x.ceil() - ox).max(1.0) as u32;
    let height = (bounds.max.y.ceil() - oy).max(1.0) as u32;
    let mut pm = Pixmap::new(width, height)?;

    let ink = color.to_color_u8();
    let stride = width as usize;
    let pixels = pm.pixels_mut();
    for glyph in &glyphs {
        let b = glyph.px_bounds();
        let (dx, dy) = ((b.min.x - ox) as i64, (b.min.y - oy) as i64);
        glyph.draw(|x, y, coverage| {
            let (px, py) = (x as i64 + dx, y as i64 + dy);
            if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                return;
            }
            let i = py as usize * stride + px as usize;
            let alpha = (coverage.clamp(0.0, 1.0) * ink.alpha() as f32).round() as u8;
            // overlapping glyph edges keep the stronger coverage
            if alpha > pixels[i].alpha() {
                pixels[i] =
                    ColorU8::from_rgba(ink.red(), ink.green(), ink.blue(), alpha).premultiply();
            }
        });
    }
    Some(pm)
}
