//! Pixel-level implementations of the recorded pipeline operations.
//!
//! Geometry ops (resize, crop, pad) delegate to `image::imageops`;
//! point ops the codec lacks (gamma, modulate, tint, threshold,
//! normalize, median, trim) work directly on the RGBA buffer.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use super::{Fit, Margins, Op, Position, ResizeSpec};
use crate::error::IpxError;

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

pub fn apply(img: RgbaImage, op: &Op) -> Result<RgbaImage, IpxError> {
    let out = match op {
        Op::Resize(spec) => resize(img, spec),
        Op::Extend { margins, background } => extend(img, *margins, *background),
        Op::Extract { margins } => extract(img, *margins),
        Op::Trim { threshold } => trim(img, *threshold),
        Op::Rotate { angle } => rotate(img, *angle),
        Op::Flip => imageops::flip_vertical(&img),
        Op::Flop => imageops::flip_horizontal(&img),
        Op::Sharpen { sigma, flat } => imageops::unsharpen(&img, *sigma, *flat as i32),
        Op::Median { size } => median(img, *size),
        Op::Blur => imageops::blur(&img, 1.0),
        Op::Flatten { background } => flatten(img, *background),
        Op::Gamma {
            gamma_in,
            gamma_out,
        } => gamma(img, *gamma_in, *gamma_out),
        Op::Negate => negate(img),
        Op::Normalize => normalize(img),
        Op::Threshold { level } => threshold(img, *level),
        Op::Modulate {
            brightness,
            saturation,
            hue,
        } => modulate(img, *brightness, *saturation, *hue),
        Op::Tint { color } => tint(img, *color),
        Op::Grayscale => grayscale(img),
    };
    Ok(out)
}

fn resize(img: RgbaImage, spec: &ResizeSpec) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();

    let clamp = |value: u32, max: u32| {
        if spec.without_enlargement {
            value.min(max)
        } else {
            value
        }
    };

    match (spec.width, spec.height) {
        (None, None) => img,
        (Some(w), None) => {
            let w = clamp(w.max(1), src_w);
            let h = scaled_dim(src_h, w, src_w);
            exact(&img, w, h)
        }
        (None, Some(h)) => {
            let h = clamp(h.max(1), src_h);
            let w = scaled_dim(src_w, h, src_h);
            exact(&img, w, h)
        }
        (Some(w), Some(h)) => {
            let w = clamp(w.max(1), src_w);
            let h = clamp(h.max(1), src_h);
            match spec.fit {
                Fit::Fill => exact(&img, w, h),
                Fit::Inside => {
                    let (w, h) = fit_within(src_w, src_h, w, h);
                    exact(&img, w, h)
                }
                Fit::Outside => {
                    let (w, h) = fit_around(src_w, src_h, w, h);
                    exact(&img, w, h)
                }
                Fit::Cover => cover(&img, w, h, spec.position),
                Fit::Contain => contain(&img, w, h, spec.background),
            }
        }
    }
}

fn exact(img: &RgbaImage, w: u32, h: u32) -> RgbaImage {
    imageops::resize(img, w.max(1), h.max(1), RESIZE_FILTER)
}

fn scaled_dim(other: u32, target: u32, reference: u32) -> u32 {
    if reference == 0 {
        return other.max(1);
    }
    ((other as u64 * target as u64 + reference as u64 / 2) / reference as u64).max(1) as u32
}

/// Largest dimensions fitting inside the target box, aspect preserved.
fn fit_within(src_w: u32, src_h: u32, w: u32, h: u32) -> (u32, u32) {
    let scale = (w as f64 / src_w as f64).min(h as f64 / src_h as f64);
    scaled_pair(src_w, src_h, scale)
}

/// Smallest dimensions covering the target box, aspect preserved.
fn fit_around(src_w: u32, src_h: u32, w: u32, h: u32) -> (u32, u32) {
    let scale = (w as f64 / src_w as f64).max(h as f64 / src_h as f64);
    scaled_pair(src_w, src_h, scale)
}

fn scaled_pair(src_w: u32, src_h: u32, scale: f64) -> (u32, u32) {
    (
        ((src_w as f64 * scale).round() as u32).max(1),
        ((src_h as f64 * scale).round() as u32).max(1),
    )
}

fn cover(img: &RgbaImage, w: u32, h: u32, position: Position) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();
    let (scaled_w, scaled_h) = fit_around(src_w, src_h, w, h);
    let scaled = exact(img, scaled_w, scaled_h);

    let x = anchor_offset(scaled_w, w, position.horizontal());
    let y = anchor_offset(scaled_h, h, position.vertical());
    imageops::crop_imm(&scaled, x, y, w.min(scaled_w), h.min(scaled_h)).to_image()
}

/// Offset of the crop window along one axis: -1 start, 0 center, 1 end.
fn anchor_offset(available: u32, wanted: u32, gravity: i8) -> u32 {
    let slack = available.saturating_sub(wanted);
    match gravity {
        -1 => 0,
        1 => slack,
        _ => slack / 2,
    }
}

fn contain(img: &RgbaImage, w: u32, h: u32, background: Rgba<u8>) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();
    let (scaled_w, scaled_h) = fit_within(src_w, src_h, w, h);
    let scaled = exact(img, scaled_w, scaled_h);

    let mut canvas = RgbaImage::from_pixel(w, h, background);
    let x = (w.saturating_sub(scaled_w) / 2) as i64;
    let y = (h.saturating_sub(scaled_h) / 2) as i64;
    imageops::overlay(&mut canvas, &scaled, x, y);
    canvas
}

fn extend(img: RgbaImage, margins: Margins, background: Rgba<u8>) -> RgbaImage {
    let (w, h) = img.dimensions();
    let mut canvas = RgbaImage::from_pixel(
        w + margins.left + margins.right,
        h + margins.top + margins.bottom,
        background,
    );
    imageops::overlay(&mut canvas, &img, margins.left as i64, margins.top as i64);
    canvas
}

/// Crops the margins off the edges, the complement of [`extend`].
fn extract(img: RgbaImage, margins: Margins) -> RgbaImage {
    let (w, h) = img.dimensions();
    let new_w = w.saturating_sub(margins.left + margins.right).max(1);
    let new_h = h.saturating_sub(margins.top + margins.bottom).max(1);
    let x = margins.left.min(w - 1);
    let y = margins.top.min(h - 1);
    imageops::crop_imm(&img, x, y, new_w, new_h).to_image()
}

/// Removes edges whose pixels stay within `threshold` of the top-left
/// corner color.
fn trim(img: RgbaImage, threshold: u32) -> RgbaImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img;
    }
    let corner = *img.get_pixel(0, 0);

    let mut min_x = w;
    let mut min_y = h;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    for (x, y, px) in img.enumerate_pixels() {
        if pixel_distance(*px, corner) > threshold {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if min_x > max_x || min_y > max_y {
        // Uniform image: nothing to trim against.
        return img;
    }

    imageops::crop_imm(&img, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image()
}

fn pixel_distance(a: Rgba<u8>, b: Rgba<u8>) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .take(3)
        .map(|(x, y)| x.abs_diff(*y) as u32)
        .max()
        .unwrap_or(0)
}

/// Quarter-turn rotation; other angles are inert for this codec.
fn rotate(img: RgbaImage, angle: i64) -> RgbaImage {
    match angle.rem_euclid(360) {
        90 => imageops::rotate90(&img),
        180 => imageops::rotate180(&img),
        270 => imageops::rotate270(&img),
        _ => img,
    }
}

fn median(img: RgbaImage, size: u32) -> RgbaImage {
    let radius = (size.max(1) / 2) as i64;
    let (w, h) = img.dimensions();
    let mut out = RgbaImage::new(w, h);

    let mut window: Vec<u8> = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
    for y in 0..h {
        for x in 0..w {
            let mut px = [0u8; 4];
            for channel in 0..4 {
                window.clear();
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let sx = (x as i64 + dx).clamp(0, w as i64 - 1) as u32;
                        let sy = (y as i64 + dy).clamp(0, h as i64 - 1) as u32;
                        window.push(img.get_pixel(sx, sy).0[channel]);
                    }
                }
                window.sort_unstable();
                px[channel] = window[window.len() / 2];
            }
            out.put_pixel(x, y, Rgba(px));
        }
    }
    out
}

fn flatten(mut img: RgbaImage, background: Rgba<u8>) -> RgbaImage {
    for px in img.pixels_mut() {
        let alpha = px.0[3] as u32;
        if alpha == 255 {
            continue;
        }
        for channel in 0..3 {
            let fg = px.0[channel] as u32;
            let bg = background.0[channel] as u32;
            px.0[channel] = ((fg * alpha + bg * (255 - alpha)) / 255) as u8;
        }
        px.0[3] = 255;
    }
    img
}

fn gamma(mut img: RgbaImage, gamma_in: f32, gamma_out: Option<f32>) -> RgbaImage {
    let gamma_in = if gamma_in > 0.0 { gamma_in } else { 2.2 };
    let mut lut = [0u8; 256];
    for (value, slot) in lut.iter_mut().enumerate() {
        let mut v = (value as f32 / 255.0).powf(1.0 / gamma_in);
        if let Some(out) = gamma_out {
            if out > 0.0 {
                v = v.powf(out);
            }
        }
        *slot = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    for px in img.pixels_mut() {
        for channel in 0..3 {
            px.0[channel] = lut[px.0[channel] as usize];
        }
    }
    img
}

fn negate(mut img: RgbaImage) -> RgbaImage {
    for px in img.pixels_mut() {
        for channel in 0..3 {
            px.0[channel] = 255 - px.0[channel];
        }
    }
    img
}

/// Stretches the luminance range to full scale.
fn normalize(mut img: RgbaImage) -> RgbaImage {
    let mut min = 255u8;
    let mut max = 0u8;
    for px in img.pixels() {
        let l = luma(*px);
        min = min.min(l);
        max = max.max(l);
    }
    if max <= min {
        return img;
    }
    let range = (max - min) as u32;
    for px in img.pixels_mut() {
        for channel in 0..3 {
            let v = px.0[channel].saturating_sub(min) as u32;
            px.0[channel] = ((v * 255) / range).min(255) as u8;
        }
    }
    img
}

fn threshold(mut img: RgbaImage, level: u8) -> RgbaImage {
    for px in img.pixels_mut() {
        let value = if luma(*px) >= level { 255 } else { 0 };
        *px = Rgba([value, value, value, 255]);
    }
    img
}

fn modulate(
    mut img: RgbaImage,
    brightness: Option<f32>,
    saturation: Option<f32>,
    hue: Option<i32>,
) -> RgbaImage {
    let brightness = brightness.unwrap_or(1.0).max(0.0);
    let saturation = saturation.unwrap_or(1.0).max(0.0);
    let hue = hue.unwrap_or(0) as f32;

    for px in img.pixels_mut() {
        let (h, s, l) = rgb_to_hsl(px.0[0], px.0[1], px.0[2]);
        let h = (h + hue).rem_euclid(360.0);
        let s = (s * saturation).clamp(0.0, 1.0);
        let l = (l * brightness).clamp(0.0, 1.0);
        let (r, g, b) = hsl_to_rgb(h, s, l);
        px.0[0] = r;
        px.0[1] = g;
        px.0[2] = b;
    }
    img
}

/// Recolors via luminance: the tint color scales each gray value.
fn tint(mut img: RgbaImage, color: Rgba<u8>) -> RgbaImage {
    for px in img.pixels_mut() {
        let l = luma(*px) as u32;
        for channel in 0..3 {
            px.0[channel] = ((l * color.0[channel] as u32) / 255) as u8;
        }
    }
    img
}

fn grayscale(mut img: RgbaImage) -> RgbaImage {
    for px in img.pixels_mut() {
        let l = luma(*px);
        px.0[0] = l;
        px.0[1] = l;
        px.0[2] = l;
    }
    img
}

fn luma(px: Rgba<u8>) -> u8 {
    let [r, g, b, _] = px.0;
    ((r as u32 * 2126 + g as u32 * 7152 + b as u32 * 722) / 10000) as u8
}

fn rgb_to_hsl(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if max == min {
        return (0.0, 0.0, l);
    }

    let delta = max - min;
    let s = if l > 0.5 {
        delta / (2.0 - max - min)
    } else {
        delta / (max + min)
    };
    let h = if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    (h, s, l)
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (u8, u8, u8) {
    if s == 0.0 {
        let v = (l * 255.0).round() as u8;
        return (v, v, v);
    }
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = l - c / 2.0;
    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (
        ((r + m) * 255.0).round().clamp(0.0, 255.0) as u8,
        ((g + m) * 255.0).round().clamp(0.0, 255.0) as u8,
        ((b + m) * 255.0).round().clamp(0.0, 255.0) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(color))
    }

    #[test]
    fn test_resize_width_preserves_aspect() {
        let spec = ResizeSpec {
            width: Some(50),
            height: None,
            ..Default::default()
        };
        let out = resize(solid(100, 60, [10, 10, 10, 255]), &spec);
        assert_eq!(out.dimensions(), (50, 30));
    }

    #[test]
    fn test_resize_without_enlargement_clamps() {
        let spec = ResizeSpec {
            width: Some(500),
            height: None,
            without_enlargement: true,
            ..Default::default()
        };
        let out = resize(solid(100, 100, [10, 10, 10, 255]), &spec);
        assert_eq!(out.dimensions(), (100, 100));
    }

    #[test]
    fn test_resize_cover_crops_to_exact_box() {
        let spec = ResizeSpec {
            width: Some(40),
            height: Some(40),
            fit: Fit::Cover,
            ..Default::default()
        };
        let out = resize(solid(200, 100, [10, 10, 10, 255]), &spec);
        assert_eq!(out.dimensions(), (40, 40));
    }

    #[test]
    fn test_resize_contain_pads_to_exact_box() {
        let spec = ResizeSpec {
            width: Some(40),
            height: Some(40),
            fit: Fit::Contain,
            background: Rgba([255, 0, 0, 255]),
            ..Default::default()
        };
        let out = resize(solid(200, 100, [0, 0, 255, 255]), &spec);
        assert_eq!(out.dimensions(), (40, 40));
        // Letterbox rows above and below carry the background.
        assert_eq!(*out.get_pixel(20, 1), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_resize_inside_keeps_aspect() {
        let spec = ResizeSpec {
            width: Some(40),
            height: Some(40),
            fit: Fit::Inside,
            ..Default::default()
        };
        let out = resize(solid(200, 100, [10, 10, 10, 255]), &spec);
        assert_eq!(out.dimensions(), (40, 20));
    }

    #[test]
    fn test_extend_and_extract_are_complements() {
        let margins = Margins {
            top: 2,
            right: 3,
            bottom: 4,
            left: 5,
        };
        let img = solid(10, 10, [7, 7, 7, 255]);
        let extended = extend(img.clone(), margins, Rgba([0, 0, 0, 255]));
        assert_eq!(extended.dimensions(), (18, 16));
        let restored = extract(extended, margins);
        assert_eq!(restored.dimensions(), (10, 10));
        assert_eq!(*restored.get_pixel(0, 0), Rgba([7, 7, 7, 255]));
    }

    #[test]
    fn test_trim_removes_uniform_border() {
        let mut img = solid(10, 10, [255, 255, 255, 255]);
        for y in 3..7 {
            for x in 2..8 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        let out = trim(img, 10);
        assert_eq!(out.dimensions(), (6, 4));
    }

    #[test]
    fn test_rotate_quarter_turns() {
        let img = solid(10, 20, [1, 2, 3, 255]);
        assert_eq!(rotate(img.clone(), 90).dimensions(), (20, 10));
        assert_eq!(rotate(img.clone(), 180).dimensions(), (10, 20));
        assert_eq!(rotate(img.clone(), -90).dimensions(), (20, 10));
        // Non-quarter angles are inert.
        assert_eq!(rotate(img, 45).dimensions(), (10, 20));
    }

    #[test]
    fn test_negate() {
        let out = negate(solid(2, 2, [10, 20, 30, 200]));
        assert_eq!(*out.get_pixel(0, 0), Rgba([245, 235, 225, 200]));
    }

    #[test]
    fn test_threshold_binarizes() {
        let mut img = solid(2, 1, [200, 200, 200, 255]);
        img.put_pixel(1, 0, Rgba([20, 20, 20, 255]));
        let out = threshold(img, 128);
        assert_eq!(*out.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*out.get_pixel(1, 0), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_flatten_composites_background() {
        let out = flatten(solid(1, 1, [255, 0, 0, 0]), Rgba([0, 0, 255, 255]));
        assert_eq!(*out.get_pixel(0, 0), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_grayscale_levels_channels() {
        let out = grayscale(solid(1, 1, [255, 0, 0, 255]));
        let px = out.get_pixel(0, 0);
        assert_eq!(px.0[0], px.0[1]);
        assert_eq!(px.0[1], px.0[2]);
    }

    #[test]
    fn test_modulate_hue_rotation_changes_channel_order() {
        let out = modulate(solid(1, 1, [255, 0, 0, 255]), None, None, Some(120));
        let px = out.get_pixel(0, 0);
        // Red rotated by 120 degrees lands on green.
        assert!(px.0[1] > px.0[0]);
        assert!(px.0[1] > px.0[2]);
    }

    #[test]
    fn test_hsl_round_trip() {
        for color in [[255u8, 0, 0], [0, 255, 0], [12, 200, 64], [128, 128, 128]] {
            let (h, s, l) = rgb_to_hsl(color[0], color[1], color[2]);
            let (r, g, b) = hsl_to_rgb(h, s, l);
            assert!((r as i32 - color[0] as i32).abs() <= 1);
            assert!((g as i32 - color[1] as i32).abs() <= 1);
            assert!((b as i32 - color[2] as i32).abs() <= 1);
        }
    }
}
