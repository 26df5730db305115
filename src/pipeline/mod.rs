//! Codec pipeline: an incremental builder that records operations and
//! materializes one encoded buffer.
//!
//! ## Key Components
//!
//! - [`Pipeline`] - Records operations, then decodes, applies and encodes
//! - [`OutputFormat`] - The closed set of negotiable output formats
//! - [`ImageMeta`] - Decoded dimensions and sniffed type of a source
//!
//! Operations are applied in recording order; the handler table decides
//! that order. Animated sources re-encode frame by frame when the output
//! format is `gif`.

mod ops;

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::{
    AnimationDecoder, DynamicImage, Frame, ImageFormat, ImageReader, Rgba, RgbaImage,
};
use serde::{Deserialize, Serialize};

use crate::error::IpxError;

const DEFAULT_QUALITY: u8 = 80;

/// Decoded metadata of a source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    /// Short type name (`png`, `jpeg`, `svg`, …) sniffed from content.
    pub source_type: String,
    pub mime: String,
}

/// Output formats `to_format` will encode to. Anything else leaves the
/// source format in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
    Tiff,
    Gif,
}

impl OutputFormat {
    /// Accepts the modifier vocabulary; `jpg` normalizes to `jpeg`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "avif" => Some(Self::Avif),
            "tiff" => Some(Self::Tiff),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Avif => "avif",
            Self::Tiff => "tiff",
            Self::Gif => "gif",
        }
    }
}

/// Resize fit modes, matching the modifier vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fit {
    #[default]
    Cover,
    Contain,
    Fill,
    Inside,
    Outside,
}

impl Fit {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cover" => Some(Self::Cover),
            "contain" => Some(Self::Contain),
            "fill" => Some(Self::Fill),
            "inside" => Some(Self::Inside),
            "outside" => Some(Self::Outside),
            _ => None,
        }
    }
}

/// Crop anchor for cover resizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    Center,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Position {
    pub fn parse(value: &str) -> Option<Self> {
        let has = |needle: &str| value.split_whitespace().any(|token| token == needle);
        match (has("top"), has("bottom"), has("left"), has("right")) {
            (true, _, true, _) => Some(Self::TopLeft),
            (true, _, _, true) => Some(Self::TopRight),
            (_, true, true, _) => Some(Self::BottomLeft),
            (_, true, _, true) => Some(Self::BottomRight),
            (true, ..) => Some(Self::Top),
            (_, true, ..) => Some(Self::Bottom),
            (_, _, true, _) => Some(Self::Left),
            (_, _, _, true) => Some(Self::Right),
            _ if value == "center" || value == "centre" => Some(Self::Center),
            _ => None,
        }
    }

    fn horizontal(&self) -> i8 {
        match self {
            Self::Left | Self::TopLeft | Self::BottomLeft => -1,
            Self::Right | Self::TopRight | Self::BottomRight => 1,
            _ => 0,
        }
    }

    fn vertical(&self) -> i8 {
        match self {
            Self::Top | Self::TopLeft | Self::TopRight => -1,
            Self::Bottom | Self::BottomLeft | Self::BottomRight => 1,
            _ => 0,
        }
    }
}

/// Edge margins for pad and crop operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Margins {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

pub const DEFAULT_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Parameters of one resize operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub position: Position,
    pub background: Rgba<u8>,
    pub without_enlargement: bool,
}

impl Default for ResizeSpec {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            fit: Fit::default(),
            position: Position::default(),
            background: DEFAULT_BACKGROUND,
            without_enlargement: false,
        }
    }
}

/// One recorded pipeline operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Resize(ResizeSpec),
    Extend {
        margins: Margins,
        background: Rgba<u8>,
    },
    Extract {
        margins: Margins,
    },
    Trim {
        threshold: u32,
    },
    Rotate {
        angle: i64,
    },
    Flip,
    Flop,
    Sharpen {
        sigma: f32,
        flat: f32,
    },
    Median {
        size: u32,
    },
    Blur,
    Flatten {
        background: Rgba<u8>,
    },
    Gamma {
        gamma_in: f32,
        gamma_out: Option<f32>,
    },
    Negate,
    Normalize,
    Threshold {
        level: u8,
    },
    Modulate {
        brightness: Option<f32>,
        saturation: Option<f32>,
        hue: Option<i32>,
    },
    Tint {
        color: Rgba<u8>,
    },
    Grayscale,
}

/// Result of a materialized pipeline.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Bytes,
    /// Short format name used for the `Content-Type`.
    pub format: String,
}

/// Builder producing one encoded buffer.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    ops: Vec<Op>,
    animated: bool,
    format: Option<OutputFormat>,
    quality: Option<u8>,
    progressive: bool,
}

impl Pipeline {
    pub fn new(animated: bool) -> Self {
        Self {
            animated,
            ..Self::default()
        }
    }

    fn push(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    pub fn resize(self, spec: ResizeSpec) -> Self {
        self.push(Op::Resize(spec))
    }

    pub fn extend(self, margins: Margins, background: Rgba<u8>) -> Self {
        self.push(Op::Extend {
            margins,
            background,
        })
    }

    pub fn extract(self, margins: Margins) -> Self {
        self.push(Op::Extract { margins })
    }

    pub fn trim(self, threshold: u32) -> Self {
        self.push(Op::Trim { threshold })
    }

    pub fn rotate(self, angle: i64) -> Self {
        self.push(Op::Rotate { angle })
    }

    pub fn flip(self) -> Self {
        self.push(Op::Flip)
    }

    pub fn flop(self) -> Self {
        self.push(Op::Flop)
    }

    pub fn sharpen(self, sigma: f32, flat: f32) -> Self {
        self.push(Op::Sharpen { sigma, flat })
    }

    pub fn median(self, size: u32) -> Self {
        self.push(Op::Median { size })
    }

    pub fn blur(self) -> Self {
        self.push(Op::Blur)
    }

    pub fn flatten(self, background: Rgba<u8>) -> Self {
        self.push(Op::Flatten { background })
    }

    pub fn gamma(self, gamma_in: f32, gamma_out: Option<f32>) -> Self {
        self.push(Op::Gamma {
            gamma_in,
            gamma_out,
        })
    }

    pub fn negate(self) -> Self {
        self.push(Op::Negate)
    }

    pub fn normalize(self) -> Self {
        self.push(Op::Normalize)
    }

    pub fn threshold(self, level: u8) -> Self {
        self.push(Op::Threshold { level })
    }

    pub fn modulate(
        self,
        brightness: Option<f32>,
        saturation: Option<f32>,
        hue: Option<i32>,
    ) -> Self {
        self.push(Op::Modulate {
            brightness,
            saturation,
            hue,
        })
    }

    pub fn tint(self, color: Rgba<u8>) -> Self {
        self.push(Op::Tint { color })
    }

    pub fn grayscale(self) -> Self {
        self.push(Op::Grayscale)
    }

    /// Fixes the output format. `progressive` is forced on for jpeg by the
    /// caller and recorded here; the jpeg encoder emits baseline either way.
    pub fn to_format(mut self, format: OutputFormat, quality: Option<u8>, progressive: bool) -> Self {
        self.format = Some(format);
        self.quality = quality;
        self.progressive = progressive;
        self
    }

    /// Decodes the input, applies the recorded operations and encodes.
    pub fn to_buffer(self, input: &[u8]) -> Result<EncodedImage, IpxError> {
        let input_format = image::guess_format(input)
            .map_err(|err| IpxError::internal(format!("Undecodable source image: {err}")))?;

        // Identity pipeline with no format change: the source bytes are
        // already the answer.
        if self.ops.is_empty() && self.format.is_none() {
            return Ok(EncodedImage {
                bytes: Bytes::copy_from_slice(input),
                format: format_name(input_format).to_string(),
            });
        }

        if self.animated
            && input_format == ImageFormat::Gif
            && matches!(self.format, None | Some(OutputFormat::Gif))
        {
            return self.animated_gif(input);
        }

        let decoded = image::load_from_memory_with_format(input, input_format)?;
        let mut frame = decoded.into_rgba8();
        for op in &self.ops {
            frame = ops::apply(frame, op)?;
        }

        let quality = self.quality.unwrap_or(DEFAULT_QUALITY);
        if self.progressive {
            // No progressive encoder in this codec; baseline is emitted.
            tracing::debug!("progressive jpeg requested, encoding baseline");
        }
        match self.format {
            Some(format) => {
                let bytes = encode(&frame, format, quality)?;
                Ok(EncodedImage {
                    bytes: bytes.into(),
                    format: format.name().to_string(),
                })
            }
            None => {
                let bytes = encode_native(&frame, input_format, quality)?;
                Ok(EncodedImage {
                    bytes: bytes.into(),
                    format: format_name(input_format).to_string(),
                })
            }
        }
    }

    fn animated_gif(self, input: &[u8]) -> Result<EncodedImage, IpxError> {
        let decoder = GifDecoder::new(Cursor::new(input))?;
        let frames = decoder.into_frames().collect_frames()?;

        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            encoder.set_repeat(Repeat::Infinite)?;
            for frame in frames {
                let delay = frame.delay();
                let mut buffer = frame.into_buffer();
                for op in &self.ops {
                    buffer = ops::apply(buffer, op)?;
                }
                encoder.encode_frame(Frame::from_parts(buffer, 0, 0, delay))?;
            }
        }

        Ok(EncodedImage {
            bytes: out.into(),
            format: "gif".to_string(),
        })
    }
}

fn encode(frame: &RgbaImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>, IpxError> {
    let mut out = Cursor::new(Vec::new());
    match format {
        OutputFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(frame.clone()).into_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut out, quality);
            rgb.write_with_encoder(encoder)?;
        }
        OutputFormat::Png => frame.write_to(&mut out, ImageFormat::Png)?,
        OutputFormat::Webp => frame.write_to(&mut out, ImageFormat::WebP)?,
        OutputFormat::Tiff => frame.write_to(&mut out, ImageFormat::Tiff)?,
        OutputFormat::Gif => {
            let mut encoder = GifEncoder::new(&mut out);
            encoder.encode_frame(Frame::new(frame.clone()))?;
        }
        OutputFormat::Avif => {
            return Err(IpxError::internal(
                "AVIF encoding is not supported by this codec build",
            ));
        }
    }
    Ok(out.into_inner())
}

/// Re-encodes in the source format when no explicit format was requested.
fn encode_native(
    frame: &RgbaImage,
    input_format: ImageFormat,
    quality: u8,
) -> Result<Vec<u8>, IpxError> {
    match input_format {
        ImageFormat::Jpeg => encode(frame, OutputFormat::Jpeg, quality),
        ImageFormat::WebP => encode(frame, OutputFormat::Webp, quality),
        ImageFormat::Tiff => encode(frame, OutputFormat::Tiff, quality),
        ImageFormat::Gif => encode(frame, OutputFormat::Gif, quality),
        // PNG re-encode also covers formats without an encoder (bmp, ico, …).
        _ => {
            let mut out = Cursor::new(Vec::new());
            if frame.write_to(&mut out, input_format).is_err() {
                out = Cursor::new(Vec::new());
                frame.write_to(&mut out, ImageFormat::Png)?;
            }
            Ok(out.into_inner())
        }
    }
}

/// Short type name used in meta and content types.
pub fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Avif => "avif",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Ico => "ico",
        _ => "png",
    }
}

/// Sniffs the source type and probes dimensions without a full decode.
pub fn sniff_meta(bytes: &[u8]) -> Result<ImageMeta, IpxError> {
    if is_svg(bytes) {
        return Ok(ImageMeta {
            width: 0,
            height: 0,
            source_type: "svg".to_string(),
            mime: "image/svg+xml".to_string(),
        });
    }

    let format = image::guess_format(bytes)
        .map_err(|err| IpxError::internal(format!("Undecodable source image: {err}")))?;
    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()?;

    Ok(ImageMeta {
        width,
        height,
        source_type: format_name(format).to_string(),
        mime: format.to_mime_type().to_string(),
    })
}

/// SVG has no magic number; sniff the document head for an `<svg` root.
pub fn is_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with("<svg")
        || ((trimmed.starts_with("<?xml") || trimmed.starts_with("<!"))
            && text.contains("<svg"))
}
