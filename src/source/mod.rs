//! Where display lists and the data they reference come from.
//!
//! Both front-ends produce the same `Command` names and argument positions,
//! so the interpreter never knows whether it is walking C source or a ROM.

use std::sync::Arc;

use cgmath::Matrix4;

use crate::command::Command;
use crate::error::Result;
use crate::gbi::{TileFormat, TileSize};
use crate::interp::light::LightSet;
use crate::model::Vertex;
use crate::texture::TextureEntry;

pub mod binary;
pub mod text;

pub use binary::{BinarySource, SegmentTable};
pub use text::CSource;

/// Parameters of a texture load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRequest {
    pub fmt: TileFormat,
    pub siz: TileSize,
    pub width: u32,
    /// Row count implied by the tile size, for sources without array bounds.
    pub height: u32,
    pub is_lut: bool,
}

pub trait AssetSource {
    /// Commands of the named list. Fatal when the list cannot be found or
    /// has no terminator.
    fn display_list(&mut self, name: &str) -> Result<Vec<Command>>;

    fn vertices(&mut self, name: &str) -> Result<Arc<Vec<Vertex>>>;

    fn lights(&mut self, name: &str) -> Result<LightSet>;

    fn matrix(&mut self, name: &str) -> Option<Matrix4<f32>>;

    /// Decoded texture, or a reference placeholder when the pixel data is
    /// not available.
    fn texture(&mut self, name: &str, request: TextureRequest) -> Result<TextureEntry>;

    /// Whether `name` was loaded from an image file rather than texel data.
    fn is_image_file(&self, _name: &str) -> bool {
        false
    }

    /// Maps a call target to a list name. `None` skips the call.
    fn resolve_dl_name(&self, name: &str) -> Option<String> {
        Some(name.strip_prefix('&').unwrap_or(name).to_string())
    }
}
