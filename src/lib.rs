use std::path::PathBuf;

pub mod command;
pub mod error;
pub mod fixed;
pub mod gbi;
pub mod interp;
pub mod model;
pub mod source;
pub mod texture;

pub use command::{Arg, Command};
pub use error::{F3dError, Result};
pub use gbi::Ucode;
pub use interp::F3dContext;
pub use model::{ImportedMesh, OutputVertex, Triangle, Vertex};
pub use source::{AssetSource, BinarySource, CSource, SegmentTable};
pub use texture::{DecodedTexture, TextureEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFault {
    OutOfBounds(usize),
}

/// Read access to a big-endian ROM image.
pub trait RomSource {
    fn read_u32(&self, offset: usize) -> std::result::Result<u32, ReadFault>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_u64(&self, offset: usize) -> std::result::Result<u64, ReadFault> {
        Ok(((self.read_u32(offset)? as u64) << 32) | self.read_u32(offset + 4)? as u64)
    }

    /// not every source needs to implement these, so defaults are provided
    fn read_u16(&self, offset: usize) -> std::result::Result<u16, ReadFault> {
        let word = self.read_u32(offset & !0x03)?;
        let shift = 16 - ((offset & 0x02) << 3);
        Ok(((word >> shift) & 0xFFFF) as u16)
    }

    fn read_u8(&self, offset: usize) -> std::result::Result<u8, ReadFault> {
        let word = self.read_u32(offset & !0x03)?;
        let shift = 24 - ((offset & 0x03) << 3);
        Ok(((word >> shift) & 0xFF) as u8)
    }

    fn read_block(&self, offset: usize, length: usize) -> std::result::Result<Vec<u8>, ReadFault> {
        (offset..offset + length).map(|i| self.read_u8(i)).collect()
    }
}

impl RomSource for [u8] {
    fn read_u32(&self, offset: usize) -> std::result::Result<u32, ReadFault> {
        let bytes = self.get(offset..offset + 4).ok_or(ReadFault::OutOfBounds(offset))?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn read_block(&self, offset: usize, length: usize) -> std::result::Result<Vec<u8>, ReadFault> {
        self.get(offset..offset + length)
            .map(|b| b.to_vec())
            .ok_or(ReadFault::OutOfBounds(offset))
    }
}

impl RomSource for Vec<u8> {
    fn read_u32(&self, offset: usize) -> std::result::Result<u32, ReadFault> {
        self.as_slice().read_u32(offset)
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn read_block(&self, offset: usize, length: usize) -> std::result::Result<Vec<u8>, ReadFault> {
        self.as_slice().read_block(offset, length)
    }
}

impl<T: RomSource + ?Sized> RomSource for &T {
    fn read_u32(&self, offset: usize) -> std::result::Result<u32, ReadFault> {
        (**self).read_u32(offset)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn read_block(&self, offset: usize, length: usize) -> std::result::Result<Vec<u8>, ReadFault> {
        (**self).read_block(offset, length)
    }
}

/// Import configuration.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub ucode: Ucode,
    pub vertex_buffer_size: usize,
    /// Directory `#include` paths are resolved against.
    pub base_path: Option<PathBuf>,
    /// The root transform is a uniform scale by `1 / scale`.
    pub scale: f32,
    /// When set, CI images loaded from image files are taken as already
    /// colored and no palette is applied.
    pub ci_images_stored_as_full_color: bool,
}

impl ImportSettings {
    pub fn for_ucode(ucode: Ucode) -> ImportSettings {
        ImportSettings {
            ucode,
            vertex_buffer_size: ucode.default_vertex_buffer_size(),
            ..Default::default()
        }
    }
}

impl Default for ImportSettings {
    fn default() -> Self {
        ImportSettings {
            ucode: Ucode::default(),
            vertex_buffer_size: Ucode::default().default_vertex_buffer_size(),
            base_path: None,
            scale: 1.0,
            ci_images_stored_as_full_color: true,
        }
    }
}

/// Debug switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tweakables {
    /// Skip texel decoding; every texture becomes a reference.
    pub disable_textures: bool,
    /// Ignore light commands.
    pub disable_lighting: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom_reads() {
        let rom: Vec<u8> = vec![0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        assert_eq!(rom.read_u32(0).unwrap(), 0x1234_5678);
        assert_eq!(rom.read_u64(0).unwrap(), 0x1234_5678_9ABC_DEF0);
        assert_eq!(rom.read_u16(2).unwrap(), 0x5678);
        assert_eq!(rom.read_u16(4).unwrap(), 0x9ABC);
        assert_eq!(rom.read_u8(5).unwrap(), 0xBC);
        assert_eq!(rom.read_block(1, 3).unwrap(), vec![0x34, 0x56, 0x78]);
        assert_eq!(rom.read_u32(6), Err(ReadFault::OutOfBounds(6)));
        assert!(rom.read_block(6, 4).is_err());
    }

    #[test]
    fn settings_follow_ucode() {
        assert_eq!(ImportSettings::for_ucode(Ucode::F3d).vertex_buffer_size, 16);
        assert_eq!(ImportSettings::default().vertex_buffer_size, 32);
        assert!(ImportSettings::default().ci_images_stored_as_full_color);
    }
}
