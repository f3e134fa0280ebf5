//! N64 texel formats to float RGBA.
//!
//! Decoded images keep their rows bottom-up (UV origin at the bottom left),
//! which is why non-palette images are flipped once after decoding.

#[allow(unused_imports)]
use tracing::{trace, debug, error, info, warn};

use crate::gbi::{TileFormat, TileSize};

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTexture {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<f32>,
}

/// A texture the source could decode, or a named placeholder when its
/// pixel data is not available.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureEntry {
    Image(DecodedTexture),
    Reference { name: String, width: u32 },
}

impl TextureEntry {
    pub fn is_reference(&self) -> bool {
        matches!(self, TextureEntry::Reference { .. })
    }
}

fn rgba16(v: u16) -> [f32; 4] {
    [
        ((v >> 11) & 31) as f32 / 31.0,
        ((v >> 6) & 31) as f32 / 31.0,
        ((v >> 1) & 31) as f32 / 31.0,
        (v & 1) as f32,
    ]
}

fn rgba32(c: &[u8]) -> [f32; 4] {
    [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0, c[3] as f32 / 255.0]
}

fn ia16(v: u16) -> [f32; 4] {
    let i = (v >> 8) as f32 / 255.0;
    [i, i, i, (v & 0xFF) as f32 / 255.0]
}

fn ia8(v: u8) -> [f32; 4] {
    let i = ((v >> 4) & 15) as f32 / 15.0;
    [i, i, i, (v & 15) as f32 / 15.0]
}

fn ia4(v: u8) -> [f32; 4] {
    let i = ((v >> 1) & 7) as f32 / 7.0;
    [i, i, i, (v & 1) as f32]
}

fn intensity(v: u8, max: f32) -> [f32; 4] {
    let i = v as f32 / max;
    [i, i, i, 1.0]
}

/// `ceil(len / (width * bpp / 8))`
pub fn texture_height(len: usize, siz: TileSize, width: u32) -> u32 {
    let row_bytes = width as f64 * siz.bits() as f64 / 8.0;
    if row_bytes <= 0.0 {
        return 0;
    }
    (len as f64 / row_bytes).ceil() as u32
}

/// Decodes raw big-endian texel data. A width of 0 means 16.
pub fn decode_texture(bytes: &[u8], fmt: TileFormat, siz: TileSize, width: u32) -> DecodedTexture {
    let width = if width == 0 { 16 } else { width };
    let height = texture_height(bytes.len(), siz, width);
    let mut texels: Vec<[f32; 4]> = Vec::new();

    match (fmt, siz) {
        (TileFormat::Rgba, TileSize::Bits16) => {
            texels.extend(bytes.chunks_exact(2).map(|c| rgba16(u16::from_be_bytes([c[0], c[1]]))));
        },
        (TileFormat::Rgba, TileSize::Bits32) => {
            texels.extend(bytes.chunks_exact(4).map(rgba32));
        },
        (TileFormat::Ia, TileSize::Bits16) => {
            texels.extend(bytes.chunks_exact(2).map(|c| ia16(u16::from_be_bytes([c[0], c[1]]))));
        },
        (TileFormat::Ia, TileSize::Bits8) => texels.extend(bytes.iter().map(|v| ia8(*v))),
        (TileFormat::Ia, TileSize::Bits4) => {
            texels.extend(bytes.iter().flat_map(|v| [ia4(v >> 4), ia4(v & 15)]));
        },
        (TileFormat::I, TileSize::Bits8) => texels.extend(bytes.iter().map(|v| intensity(*v, 255.0))),
        (TileFormat::I, TileSize::Bits4) => {
            texels.extend(bytes.iter().flat_map(|v| [intensity(v >> 4, 15.0), intensity(v & 15, 15.0)]));
        },
        // palette indices are kept raw so the TLUT can look them up later
        (TileFormat::Ci, TileSize::Bits8) => texels.extend(bytes.iter().map(|v| intensity(*v, 255.0))),
        (TileFormat::Ci, TileSize::Bits4) => {
            texels.extend(bytes.iter().flat_map(|v| [intensity(v >> 4, 255.0), intensity(v & 15, 255.0)]));
        },
        _ => {
            warn!(target: "F3D", "unhandled texture format {}{}", fmt.name(), siz.name());
        },
    }

    let mut rgba = vec![0.0f32; 4 * width as usize * height as usize];
    for (dst, texel) in rgba.chunks_exact_mut(4).zip(texels.iter()) {
        dst.copy_from_slice(texel);
    }

    DecodedTexture { width, height, rgba }
}

/// Replaces every pixel with `palette[round(r * 255)]`. Pixels whose index
/// falls outside the palette are left unchanged; the count of those is
/// returned.
pub fn apply_palette(image: &mut DecodedTexture, palette: &DecodedTexture) -> usize {
    let entries = palette.rgba.len() / 4;
    let mut invalid = 0;
    for px in image.rgba.chunks_exact_mut(4) {
        let idx = (px[0] * 255.0).round() as usize;
        if idx < entries {
            px.copy_from_slice(&palette.rgba[idx * 4..idx * 4 + 4]);
        } else {
            invalid += 1;
        }
    }
    if invalid != 0 {
        warn!(target: "F3D", "invalid LUT indices detected ({} pixels)", invalid);
    }
    invalid
}

pub fn flip_vertical(image: &mut DecodedTexture) {
    let row = 4 * image.width as usize;
    let h = image.height as usize;
    if row == 0 || image.rgba.len() < row * h {
        return;
    }
    for j in 0..h / 2 {
        let (top, bottom) = image.rgba.split_at_mut((h - 1 - j) * row);
        top[j * row..(j + 1) * row].swap_with_slice(&mut bottom[..row]);
    }
}

pub fn encode_rgba16(r: f32, g: f32, b: f32, a: f32) -> u16 {
    let q = |v: f32| ((v.clamp(0.0, 1.0) * 31.0).round() as u16) & 31;
    (q(r) << 11) | (q(g) << 6) | (q(b) << 1) | (a >= 0.5) as u16
}

impl DecodedTexture {
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.rgba.iter().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8).collect()
    }

    /// Writes the image top row first.
    #[cfg(feature = "png")]
    pub fn save_png(&self, path: &std::path::Path) -> crate::error::Result<()> {
        let mut top_down = self.clone();
        flip_vertical(&mut top_down);
        image::save_buffer(path, &top_down.to_rgba8(), self.width, self.height, image::ColorType::Rgba8)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(())
    }

    /// Loads an image file, rows bottom-up unless `keep_row_order`.
    #[cfg(feature = "png")]
    pub fn load_png(path: &std::path::Path, keep_row_order: bool) -> crate::error::Result<DecodedTexture> {
        let img = image::open(path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        let mut tex = DecodedTexture {
            width,
            height,
            rgba: img.into_raw().into_iter().map(|v| v as f32 / 255.0).collect(),
        };
        if !keep_row_order {
            flip_vertical(&mut tex);
        }
        Ok(tex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn formats() -> impl Strategy<Value = (TileFormat, TileSize)> {
        let fmt = prop_oneof![
            Just(TileFormat::Rgba), Just(TileFormat::Yuv), Just(TileFormat::Ci), Just(TileFormat::Ia), Just(TileFormat::I),
        ];
        let siz = prop_oneof![Just(TileSize::Bits4), Just(TileSize::Bits8), Just(TileSize::Bits16), Just(TileSize::Bits32)];
        (fmt, siz)
    }

    proptest! {
        #[test]
        fn decoded_size_matches_data((fmt, siz) in formats(), data in proptest::collection::vec(any::<u8>(), 0..512), width in 0u32..64) {
            let tex = decode_texture(&data, fmt, siz, width);
            let w = if width == 0 { 16 } else { width };
            let row_bytes = w as f64 * siz.bits() as f64 / 8.0;
            let h = (data.len() as f64 / row_bytes).ceil() as u32;
            prop_assert_eq!(tex.width, w);
            prop_assert_eq!(tex.height, h);
            prop_assert_eq!(tex.rgba.len(), 4 * (w * h) as usize);
        }

        #[test]
        fn rgba16_round_trip(r in 0.0f32..=1.0, g in 0.0f32..=1.0, b in 0.0f32..=1.0, opaque in any::<bool>()) {
            let v = encode_rgba16(r, g, b, if opaque { 1.0 } else { 0.0 });
            let tex = decode_texture(&v.to_be_bytes(), TileFormat::Rgba, TileSize::Bits16, 1);
            prop_assert!((tex.rgba[0] - r).abs() <= 1.0 / 31.0);
            prop_assert!((tex.rgba[1] - g).abs() <= 1.0 / 31.0);
            prop_assert!((tex.rgba[2] - b).abs() <= 1.0 / 31.0);
            prop_assert_eq!(tex.rgba[3], if opaque { 1.0 } else { 0.0 });
        }
    }

    #[test]
    fn intensity_alpha_formats() {
        let tex = decode_texture(&[0xF1], TileFormat::Ia, TileSize::Bits8, 1);
        assert_eq!(&tex.rgba[..], &[1.0, 1.0, 1.0, 1.0 / 15.0]);

        let tex = decode_texture(&[0xE3], TileFormat::Ia, TileSize::Bits4, 2);
        assert_eq!(&tex.rgba[..4], &[1.0, 1.0, 1.0, 0.0]);
        assert_eq!(&tex.rgba[4..], &[1.0 / 7.0, 1.0 / 7.0, 1.0 / 7.0, 1.0]);

        let tex = decode_texture(&[0x80, 0x40], TileFormat::Ia, TileSize::Bits16, 1);
        assert_eq!(tex.rgba[0], 128.0 / 255.0);
        assert_eq!(tex.rgba[3], 64.0 / 255.0);
    }

    #[test]
    fn unsupported_format_leaves_zeros() {
        let tex = decode_texture(&[0xFF; 8], TileFormat::I, TileSize::Bits16, 2);
        assert_eq!(tex.height, 2);
        assert!(tex.rgba.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn palette_substitution() {
        let mut image = decode_texture(&[0, 1, 2, 3], TileFormat::Ci, TileSize::Bits8, 2);
        let palette = DecodedTexture {
            width: 4,
            height: 1,
            rgba: (0..16).map(|v| v as f32 / 16.0).collect(),
        };
        assert_eq!(apply_palette(&mut image, &palette), 0);
        assert_eq!(image.rgba, palette.rgba);

        let mut bad = decode_texture(&[5, 0], TileFormat::Ci, TileSize::Bits8, 2);
        let before = bad.rgba.clone();
        assert_eq!(apply_palette(&mut bad, &palette), 1);
        assert_eq!(&bad.rgba[..4], &before[..4]);
        assert_eq!(&bad.rgba[4..], &palette.rgba[..4]);
    }

    #[test]
    fn flip() {
        let mut tex = DecodedTexture { width: 1, height: 3, rgba: (0..12).map(|v| v as f32).collect() };
        flip_vertical(&mut tex);
        assert_eq!(tex.rgba, vec![8.0, 9.0, 10.0, 11.0, 4.0, 5.0, 6.0, 7.0, 0.0, 1.0, 2.0, 3.0]);
    }
}
