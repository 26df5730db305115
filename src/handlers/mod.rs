//! Handler table: the static registry mapping modifier names to their
//! effect on the codec pipeline.
//!
//! ## Key Components
//!
//! - [`Handler`] - One record: names, sort order, apply function
//! - [`HandlerContext`] - Per-request scratch state written by setters
//! - [`resolve_handlers`] - Filters, parses and sorts a modifier map
//!
//! Setters (`order = -1`) run before operations (`order = 0`); within the
//! same order class the modifier insertion order is kept. Unknown
//! modifiers drop silently for forward compatibility.

mod args;

pub use args::{is_truthy, parse_args, parse_color, parse_literal};

use image::Rgba;
use serde_json::Value;

use crate::pipeline::{
    DEFAULT_BACKGROUND, Fit, ImageMeta, Margins, Pipeline, Position, ResizeSpec,
};
use crate::resolve::ModifierMap;

/// Modifier keys consumed by the engine itself (format negotiation), never
/// dispatched to a handler.
pub const RESERVED_MODIFIERS: &[&str] = &["f", "format", "a", "animated"];

/// Per-request scratch state. Lives for one `data()` production.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub meta: ImageMeta,
    pub quality: Option<u8>,
    pub fit: Option<Fit>,
    pub position: Option<Position>,
    pub background: Option<Rgba<u8>>,
    pub enlarge: bool,
}

impl HandlerContext {
    pub fn new(meta: ImageMeta) -> Self {
        Self {
            meta,
            quality: None,
            fit: None,
            position: None,
            background: None,
            enlarge: false,
        }
    }

    fn background_or_default(&self) -> Rgba<u8> {
        self.background.unwrap_or(DEFAULT_BACKGROUND)
    }
}

type ApplyFn = fn(&mut HandlerContext, Pipeline, &[Value]) -> Pipeline;

/// One handler record of the static table.
pub struct Handler {
    pub names: &'static [&'static str],
    /// Setters sort before operations; the sort is stable.
    pub order: i8,
    pub apply: ApplyFn,
}

/// The full modifier vocabulary.
pub static HANDLERS: &[Handler] = &[
    // Context setters
    Handler {
        names: &["q", "quality"],
        order: -1,
        apply: set_quality,
    },
    Handler {
        names: &["fit"],
        order: -1,
        apply: set_fit,
    },
    Handler {
        names: &["pos", "position"],
        order: -1,
        apply: set_position,
    },
    Handler {
        names: &["b", "background"],
        order: -1,
        apply: set_background,
    },
    Handler {
        names: &["enlarge"],
        order: -1,
        apply: set_enlarge,
    },
    // Pipeline operations
    Handler {
        names: &["w", "width"],
        order: 0,
        apply: apply_width,
    },
    Handler {
        names: &["h", "height"],
        order: 0,
        apply: apply_height,
    },
    Handler {
        names: &["s", "resize"],
        order: 0,
        apply: apply_resize,
    },
    Handler {
        names: &["trim"],
        order: 0,
        apply: apply_trim,
    },
    Handler {
        names: &["extend"],
        order: 0,
        apply: apply_extend,
    },
    Handler {
        names: &["extract", "crop"],
        order: 0,
        apply: apply_extract,
    },
    Handler {
        names: &["rotate"],
        order: 0,
        apply: apply_rotate,
    },
    Handler {
        names: &["flip"],
        order: 0,
        apply: |_, pipeline, _| pipeline.flip(),
    },
    Handler {
        names: &["flop"],
        order: 0,
        apply: |_, pipeline, _| pipeline.flop(),
    },
    Handler {
        names: &["sharpen"],
        order: 0,
        apply: apply_sharpen,
    },
    Handler {
        names: &["median"],
        order: 0,
        apply: apply_median,
    },
    Handler {
        names: &["blur"],
        order: 0,
        apply: |_, pipeline, _| pipeline.blur(),
    },
    Handler {
        names: &["flatten"],
        order: 0,
        apply: |ctx, pipeline, _| pipeline.flatten(ctx.background_or_default()),
    },
    Handler {
        names: &["gamma"],
        order: 0,
        apply: apply_gamma,
    },
    Handler {
        names: &["negate"],
        order: 0,
        apply: |_, pipeline, _| pipeline.negate(),
    },
    Handler {
        names: &["normalize"],
        order: 0,
        apply: |_, pipeline, _| pipeline.normalize(),
    },
    Handler {
        names: &["threshold"],
        order: 0,
        apply: apply_threshold,
    },
    Handler {
        names: &["modulate"],
        order: 0,
        apply: apply_modulate,
    },
    Handler {
        names: &["tint"],
        order: 0,
        apply: apply_tint,
    },
    Handler {
        names: &["grayscale"],
        order: 0,
        apply: |_, pipeline, _| pipeline.grayscale(),
    },
];

pub fn lookup(name: &str) -> Option<&'static Handler> {
    HANDLERS
        .iter()
        .find(|handler| handler.names.contains(&name))
}

/// Filters unknown and reserved modifiers, parses their arguments and
/// sorts the survivors: setters first, insertion order otherwise.
pub fn resolve_handlers(
    modifiers: &ModifierMap,
) -> Vec<(&'static Handler, Vec<Value>)> {
    let mut resolved: Vec<_> = modifiers
        .iter()
        .filter(|(name, _)| !RESERVED_MODIFIERS.contains(name))
        .filter_map(|(name, value)| {
            lookup(name).map(|handler| (handler, parse_args(value)))
        })
        .collect();
    resolved.sort_by_key(|(handler, _)| handler.order);
    resolved
}

/// Runs every resolved handler against the pipeline.
pub fn apply_handlers(
    ctx: &mut HandlerContext,
    mut pipeline: Pipeline,
    resolved: Vec<(&'static Handler, Vec<Value>)>,
) -> Pipeline {
    for (handler, handler_args) in resolved {
        pipeline = (handler.apply)(ctx, pipeline, &handler_args);
    }
    pipeline
}

fn set_quality(ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    if let Some(quality) = args::uint_arg(handler_args, 0) {
        ctx.quality = Some(quality.clamp(1, 100) as u8);
    }
    pipeline
}

fn set_fit(ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    ctx.fit = args::string_arg(handler_args, 0)
        .as_deref()
        .and_then(Fit::parse);
    pipeline
}

fn set_position(ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    ctx.position = args::string_arg(handler_args, 0)
        .as_deref()
        .and_then(Position::parse);
    pipeline
}

fn set_background(ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    ctx.background = args::string_arg(handler_args, 0)
        .as_deref()
        .and_then(parse_color);
    pipeline
}

fn set_enlarge(ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    ctx.enlarge = handler_args.first().map(is_truthy).unwrap_or(true);
    pipeline
}

fn apply_width(ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    match args::uint_arg(handler_args, 0) {
        Some(width) => pipeline.resize(ResizeSpec {
            width: Some(width),
            height: None,
            without_enlargement: !ctx.enlarge,
            ..Default::default()
        }),
        None => pipeline,
    }
}

fn apply_height(ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    match args::uint_arg(handler_args, 0) {
        Some(height) => pipeline.resize(ResizeSpec {
            width: None,
            height: Some(height),
            without_enlargement: !ctx.enlarge,
            ..Default::default()
        }),
        None => pipeline,
    }
}

fn apply_resize(ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    let value = match args::string_arg(handler_args, 0) {
        Some(value) => value,
        None => return pipeline,
    };
    let (width, height) = args::parse_size_pair(&value);
    let (Some(mut width), Some(mut height)) = (width, height) else {
        return pipeline;
    };

    // Without enlarge, the requested box shrinks to fit the source while
    // keeping the requested aspect ratio.
    let (src_w, src_h) = (ctx.meta.width, ctx.meta.height);
    if !ctx.enlarge && src_w > 0 && src_h > 0 && width > 0 && height > 0 {
        let aspect = width as f64 / height as f64;
        if width > src_w {
            width = src_w;
            height = ((src_w as f64 / aspect).round() as u32).max(1);
        }
        if height > src_h {
            height = src_h;
            width = ((src_h as f64 * aspect).round() as u32).max(1);
        }
    }

    pipeline.resize(ResizeSpec {
        width: Some(width),
        height: Some(height),
        fit: ctx.fit.unwrap_or_default(),
        position: ctx.position.unwrap_or_default(),
        background: ctx.background_or_default(),
        without_enlargement: false,
    })
}

fn apply_trim(_ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    pipeline.trim(args::uint_arg(handler_args, 0).unwrap_or(10))
}

fn margins_from(handler_args: &[Value]) -> Margins {
    Margins {
        top: args::uint_arg(handler_args, 0).unwrap_or(0),
        right: args::uint_arg(handler_args, 1).unwrap_or(0),
        bottom: args::uint_arg(handler_args, 2).unwrap_or(0),
        left: args::uint_arg(handler_args, 3).unwrap_or(0),
    }
}

fn apply_extend(ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    pipeline.extend(margins_from(handler_args), ctx.background_or_default())
}

fn apply_extract(_ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    pipeline.extract(margins_from(handler_args))
}

fn apply_rotate(_ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    match args::int_arg(handler_args, 0) {
        Some(angle) => pipeline.rotate(angle),
        None => pipeline,
    }
}

fn apply_sharpen(_ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    let sigma = args::float_arg(handler_args, 0).unwrap_or(1.0);
    let flat = args::float_arg(handler_args, 1).unwrap_or(1.0);
    pipeline.sharpen(sigma, flat)
}

fn apply_median(_ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    pipeline.median(args::uint_arg(handler_args, 0).unwrap_or(3))
}

fn apply_gamma(_ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    let gamma_in = args::float_arg(handler_args, 0).unwrap_or(2.2);
    let gamma_out = args::float_arg(handler_args, 1);
    pipeline.gamma(gamma_in, gamma_out)
}

fn apply_threshold(_ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    let level = args::uint_arg(handler_args, 0).unwrap_or(128).min(255) as u8;
    pipeline.threshold(level)
}

fn apply_modulate(_ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    let brightness = args::float_arg(handler_args, 0);
    let saturation = args::float_arg(handler_args, 1);
    let hue = args::int_arg(handler_args, 2).map(|h| h as i32);
    pipeline.modulate(brightness, saturation, hue)
}

fn apply_tint(_ctx: &mut HandlerContext, pipeline: Pipeline, handler_args: &[Value]) -> Pipeline {
    match args::string_arg(handler_args, 0).as_deref().and_then(parse_color) {
        Some(color) => pipeline.tint(color),
        None => pipeline,
    }
}
