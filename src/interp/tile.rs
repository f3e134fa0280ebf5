//! Tile descriptors and tile sizes.

use crate::gbi::{TileFormat, TileSize};

pub const TILE_COUNT: usize = 8;

/// TMEM address the palette loaders use.
pub const TLUT_TMEM: u32 = 256;

/// Largest value of the 9-bit `line` and `tmem` tile fields.
pub const MAX_TILE_WORDS: u32 = 0x1FF;

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub fmt: TileFormat,
    pub siz: TileSize,
    /// Row stride in 64-bit words.
    pub line: u32,
    pub tmem: u32,
    pub palette: u32,
    /// `(clamp, mirror)` per axis.
    pub cms: (bool, bool),
    pub cmt: (bool, bool),
    pub masks: u32,
    pub maskt: u32,
    pub shifts: u32,
    pub shiftt: u32,
}

impl Default for Tile {
    fn default() -> Self {
        Tile {
            fmt: TileFormat::Rgba,
            siz: TileSize::Bits16,
            line: 5,
            tmem: 0,
            palette: 0,
            cms: (false, false),
            cmt: (false, false),
            masks: 0,
            maskt: 0,
            shifts: 0,
            shiftt: 0,
        }
    }
}

impl Tile {
    /// Texture format string such as `RGBA16` or `CI4`.
    pub fn format_name(&self) -> String {
        format!("{}{}", self.fmt.name(), self.siz.name())
    }

    /// Texel width of one TMEM row.
    pub fn texel_width(&self) -> u32 {
        match self.siz {
            TileSize::Bits4 => self.line * 8 * 2,
            siz => {
                let bytes = siz.line_bytes().max(1);
                (self.line * 8).div_ceil(bytes)
            },
        }
    }
}

/// `gsDPSetTileSize` bounds in 10.2 fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBounds {
    pub uls: i64,
    pub ult: i64,
    pub lrs: i64,
    pub lrt: i64,
}

impl Default for TileBounds {
    fn default() -> Self {
        TileBounds { uls: 0, ult: 0, lrs: 32, lrt: 32 }
    }
}

impl TileBounds {
    /// Texture size implied by the bounds, for placeholder textures.
    pub fn reference_size(&self) -> [u32; 2] {
        let dim = |v: i64| ((v as f32 / 4.0) + 1.0).round().max(0.0) as u32;
        [dim(self.lrs), dim(self.lrt)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_from_line() {
        let tile = Tile { siz: TileSize::Bits16, line: 8, ..Default::default() };
        assert_eq!(tile.texel_width(), 32);
        let tile = Tile { siz: TileSize::Bits4, line: 2, ..Default::default() };
        assert_eq!(tile.texel_width(), 32);
        let tile = Tile { siz: TileSize::Bits8, line: 4, ..Default::default() };
        assert_eq!(tile.texel_width(), 32);
    }

    #[test]
    fn format_names() {
        let tile = Tile { fmt: TileFormat::Ci, siz: TileSize::Bits8, ..Default::default() };
        assert_eq!(tile.format_name(), "CI8");
        assert_eq!(Tile::default().format_name(), "RGBA16");
    }

    #[test]
    fn reference_size_from_bounds() {
        let b = TileBounds { uls: 0, ult: 0, lrs: 31 << 2, lrt: 15 << 2 };
        assert_eq!(b.reference_size(), [32, 16]);
    }
}
