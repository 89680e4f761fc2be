//! Detection overlay and JPEG encoding for annotated responses.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, Rgb, RgbImage};

use crate::detect::Detection;

const FIRE_COLOR: Rgb<u8> = Rgb([255, 56, 56]);
const SMOKE_COLOR: Rgb<u8> = Rgb([255, 200, 0]);
const OTHER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_BACKGROUND: Rgb<u8> = Rgb([16, 16, 16]);
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;

/// Draw every detection's box and `LABEL 0.87` caption onto a copy of `image`.
///
/// With no detections the copy is pixel-identical to the input.
pub fn annotate(image: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.clone();
    if canvas.width() == 0 || canvas.height() == 0 {
        return canvas;
    }
    let scale = text_scale(canvas.height());

    for det in detections {
        let bbox = det.bbox.clamp_to(canvas.width(), canvas.height());
        let color = color_for(det);
        for inset in 0..scale {
            draw_rectangle(
                &mut canvas,
                bbox.x_min.round() as i32 + inset,
                bbox.y_min.round() as i32 + inset,
                bbox.x_max.round() as i32 - inset,
                bbox.y_max.round() as i32 - inset,
                color,
            );
        }
    }

    for det in detections {
        let bbox = det.bbox.clamp_to(canvas.width(), canvas.height());
        let caption = format!("{} {:.2}", det.label, det.confidence);
        let text_w = caption.chars().count() as i32 * GLYPH_ADVANCE * scale;
        let text_h = GLYPH_HEIGHT * scale;
        let x = bbox.x_min.round() as i32;
        let above = bbox.y_min.round() as i32 - text_h - 2 * scale;
        let y = if above >= 0 {
            above
        } else {
            bbox.y_min.round() as i32 + scale + 1
        };
        fill_rect(
            &mut canvas,
            x,
            y,
            x + text_w + scale,
            y + text_h + scale,
            LABEL_BACKGROUND,
        );
        draw_text(&mut canvas, x + scale, y + scale, &caption, scale, color_for(det));
    }

    canvas
}

/// Encode an RGB image as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buffer)
}

fn color_for(det: &Detection) -> Rgb<u8> {
    if det.label_contains("fire") {
        FIRE_COLOR
    } else if det.label_contains("smoke") {
        SMOKE_COLOR
    } else {
        OTHER_COLOR
    }
}

fn text_scale(height: u32) -> i32 {
    (height / 240).clamp(1, 4) as i32
}

fn draw_rectangle(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    if right < left || bottom < top {
        return;
    }
    let width = image.width() as i32;
    let height = image.height() as i32;
    let inside = |x: i32, y: i32| x >= 0 && y >= 0 && x < width && y < height;

    for x in left..=right {
        for y in [top, bottom] {
            if inside(x, y) {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
    for y in top..=bottom {
        for x in [left, right] {
            if inside(x, y) {
                image.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);
    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, x: i32, y: i32, text: &str, scale: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let mut pen_x = x;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(rows) = glyph_bits(ch) {
            for (row, pattern) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let px = pen_x + col * scale + dx;
                            let py = y + row as i32 * scale + dy;
                            if px >= 0 && py >= 0 && px < width && py < height {
                                image.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        pen_x += GLYPH_ADVANCE * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0, 0b00100],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn gray(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([40, 40, 40]))
    }

    #[test]
    fn no_detections_leaves_pixels_untouched() {
        let image = gray(64, 48);
        assert_eq!(annotate(&image, &[]), image);
    }

    #[test]
    fn box_edges_use_class_color() {
        let image = gray(200, 200);
        let dets = vec![
            Detection::new("fire", 0.9, BoundingBox::new(50.0, 60.0, 150.0, 160.0)),
            Detection::new("smoke", 0.5, BoundingBox::new(10.0, 100.0, 40.0, 190.0)),
        ];
        let out = annotate(&image, &dets);
        assert_eq!(out.dimensions(), image.dimensions());
        assert_eq!(*out.get_pixel(100, 160), FIRE_COLOR);
        assert_eq!(*out.get_pixel(150, 120), FIRE_COLOR);
        assert_eq!(*out.get_pixel(40, 150), SMOKE_COLOR);
        // Interior is untouched.
        assert_eq!(*out.get_pixel(100, 110), Rgb([40, 40, 40]));
    }

    #[test]
    fn boxes_outside_the_frame_are_clipped() {
        let image = gray(32, 32);
        let dets = vec![Detection::new(
            "person",
            0.7,
            BoundingBox::new(-20.0, -20.0, 400.0, 400.0),
        )];
        let out = annotate(&image, &dets);
        assert_eq!(*out.get_pixel(31, 16), OTHER_COLOR);
    }

    #[test]
    fn jpeg_output_preserves_dimensions() -> anyhow::Result<()> {
        let image = gray(96, 64);
        let bytes = encode_jpeg(&image, 85)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!((decoded.width(), decoded.height()), (96, 64));
        Ok(())
    }

    #[test]
    fn every_label_character_has_a_glyph() {
        for ch in "FIRE SMOKE_LIGHT 0.87 -:!%".chars() {
            assert!(glyph_bits(ch).is_some(), "missing glyph for {ch:?}");
        }
    }
}
