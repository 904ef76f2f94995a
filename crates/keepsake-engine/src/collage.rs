use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Pixel, Rgba, RgbaImage};
use keepsake_contracts::images::{split_data_url, GeneratedImage};
use keepsake_contracts::scenarios::SCENARIO_COUNT;

pub const TEMPLATE_WIDTH: u32 = 1080;
pub const TEMPLATE_HEIGHT: u32 = 1350;

const SKY_TOP: [u8; 3] = [224, 247, 250];
const SKY_BOTTOM: [u8; 3] = [255, 255, 255];
const TREE_GREEN: [u8; 3] = [46, 125, 80];
const TRUNK_BROWN: [u8; 3] = [121, 85, 72];
const PLACEHOLDER_GREY: [u8; 3] = [203, 213, 225];

/// A square tile position, as fractions of the template size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeSlot {
    pub top: f32,
    pub left: f32,
    pub width: f32,
    pub rotate_deg: f32,
}

const fn slot(top: f32, left: f32, rotate_deg: f32) -> TreeSlot {
    TreeSlot {
        top,
        left,
        width: 0.172,
        rotate_deg,
    }
}

/// Rows of 1, 2, 3 and 4 tiles; slot `i` shows scenario `i`.
pub const TREE_SLOTS: [TreeSlot; SCENARIO_COUNT] = [
    slot(0.128, 0.413, -2.0),
    slot(0.268, 0.312, -3.0),
    slot(0.268, 0.513, 2.0),
    slot(0.408, 0.210, -2.0),
    slot(0.408, 0.413, 1.0),
    slot(0.408, 0.616, -2.0),
    slot(0.548, 0.108, -3.0),
    slot(0.548, 0.312, 2.0),
    slot(0.548, 0.514, -2.0),
    slot(0.548, 0.718, 3.0),
];

impl TreeSlot {
    /// Top-left corner and side length in canvas pixels.
    pub fn rect(&self, canvas_width: u32, canvas_height: u32) -> (i64, i64, u32) {
        let x = (self.left * canvas_width as f32).round() as i64;
        let y = (self.top * canvas_height as f32).round() as i64;
        let side = (self.width * canvas_width as f32).round().max(1.0) as u32;
        (x, y, side)
    }
}

/// Rasterizes the ten tiles onto the tree template.
#[derive(Debug, Clone)]
pub struct CollageCompositor {
    width: u32,
    height: u32,
    template: Option<RgbaImage>,
}

impl CollageCompositor {
    pub fn new(scale: u32) -> Self {
        let scale = scale.clamp(1, 4);
        Self {
            width: TEMPLATE_WIDTH * scale,
            height: TEMPLATE_HEIGHT * scale,
            template: None,
        }
    }

    pub fn with_template(mut self, template: &DynamicImage) -> Self {
        self.template = Some(
            template
                .resize_exact(self.width, self.height, FilterType::Triangle)
                .to_rgba8(),
        );
        self
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Tiles are placed by `scenario_index`; a missing index leaves its slot empty.
    pub fn render(&self, images: &[GeneratedImage]) -> RgbaImage {
        let mut canvas = match &self.template {
            Some(template) => template.clone(),
            None => tree_background(self.width, self.height),
        };
        for (index, slot) in TREE_SLOTS.iter().enumerate() {
            let Some(image) = images.iter().find(|image| image.scenario_index == index) else {
                continue;
            };
            let (x, y, side) = slot.rect(self.width, self.height);
            let tile = tile_image(image, side);
            paste_rotated(&mut canvas, &tile, x, y, slot.rotate_deg);
        }
        canvas
    }
}

impl Default for CollageCompositor {
    fn default() -> Self {
        Self::new(1)
    }
}

pub fn export_png(surface: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    surface
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("failed to save {}", path.display()))
}

/// Decoded, cover-cropped square for a successful tile; flat grey otherwise.
fn tile_image(image: &GeneratedImage, side: u32) -> RgbaImage {
    let decoded = image
        .succeeded
        .then(|| decode_display_url(&image.display_url))
        .flatten();
    match decoded {
        Some(decoded) => decoded
            .resize_to_fill(side, side, FilterType::Triangle)
            .to_rgba8(),
        None => placeholder_tile(side),
    }
}

fn decode_display_url(url: &str) -> Option<DynamicImage> {
    let (_, payload) = split_data_url(url)?;
    let bytes = BASE64.decode(payload.as_bytes()).ok()?;
    image::load_from_memory(&bytes).ok()
}

fn placeholder_tile(side: u32) -> RgbaImage {
    let [r, g, b] = PLACEHOLDER_GREY;
    let border = (side / 40).max(1);
    RgbaImage::from_fn(side, side, |x, y| {
        let edge = x < border || y < border || x >= side - border || y >= side - border;
        if edge {
            Rgba([r - 30, g - 30, b - 30, 255])
        } else {
            Rgba([r, g, b, 255])
        }
    })
}

fn tree_background(width: u32, height: u32) -> RgbaImage {
    let apex = (width as f32 * 0.5, height as f32 * 0.08);
    let base_y = height as f32 * 0.76;
    let half_base = width as f32 * 0.46;
    let trunk_half = width as f32 * 0.05;
    let trunk_bottom = height as f32 * 0.86;

    RgbaImage::from_fn(width, height, |x, y| {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        if py >= apex.1 && py <= base_y {
            let progress = (py - apex.1) / (base_y - apex.1);
            if (px - apex.0).abs() <= half_base * progress {
                return opaque(TREE_GREEN);
            }
        }
        if py > base_y && py <= trunk_bottom && (px - apex.0).abs() <= trunk_half {
            return opaque(TRUNK_BROWN);
        }
        let t = py / height as f32;
        let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        Rgba([
            mix(SKY_TOP[0], SKY_BOTTOM[0]),
            mix(SKY_TOP[1], SKY_BOTTOM[1]),
            mix(SKY_TOP[2], SKY_BOTTOM[2]),
            255,
        ])
    })
}

fn opaque([r, g, b]: [u8; 3]) -> Rgba<u8> {
    Rgba([r, g, b, 255])
}

/// Draws `tile` with its top-left at (`x`, `y`), rotated clockwise by `degrees` about its
/// centre. Nearest-neighbour sampling; pixels outside the canvas are dropped.
fn paste_rotated(canvas: &mut RgbaImage, tile: &RgbaImage, x: i64, y: i64, degrees: f32) {
    let side = tile.width().min(tile.height()) as f32;
    if side <= 0.0 {
        return;
    }
    let (sin, cos) = degrees.to_radians().sin_cos();
    let center_x = x as f32 + side / 2.0;
    let center_y = y as f32 + side / 2.0;
    let reach = side / 2.0 * (cos.abs() + sin.abs());

    let clamp_x = |value: f32| value.clamp(0.0, canvas.width() as f32) as u32;
    let clamp_y = |value: f32| value.clamp(0.0, canvas.height() as f32) as u32;
    let (min_x, max_x) = (clamp_x((center_x - reach).floor()), clamp_x((center_x + reach).ceil()));
    let (min_y, max_y) = (clamp_y((center_y - reach).floor()), clamp_y((center_y + reach).ceil()));

    for py in min_y..max_y {
        for px in min_x..max_x {
            let dx = px as f32 + 0.5 - center_x;
            let dy = py as f32 + 0.5 - center_y;
            let sx = cos * dx + sin * dy + side / 2.0;
            let sy = -sin * dx + cos * dy + side / 2.0;
            if sx < 0.0 || sy < 0.0 || sx >= side || sy >= side {
                continue;
            }
            let source = *tile.get_pixel(sx as u32, sy as u32);
            let target = canvas.get_pixel_mut(px, py);
            if source[3] == u8::MAX {
                *target = source;
            } else {
                target.blend(&source);
            }
        }
    }
}
