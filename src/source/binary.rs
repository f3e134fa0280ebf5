//! ROM front-end. Display lists are walked word by word and each 64-bit
//! command is decoded into the macro the text front-end would have parsed,
//! so both feed the same interpreter.

use std::collections::HashMap;
use std::sync::Arc;

use cgmath::Matrix4;

#[allow(unused_imports)]
use tracing::{trace, debug, error, info, warn};

use crate::command::{Arg, Command};
use crate::error::{F3dError, Result};
use crate::fixed::decode_mtx;
use crate::gbi::{op, Ucode};
use crate::interp::light::LightSet;
use crate::model::{Vertex, VERTEX_SIZE};
use crate::source::{AssetSource, TextureRequest};
use crate::texture::{decode_texture, flip_vertical, TextureEntry};
use crate::{ImportSettings, RomSource};

/// Longest list walked before giving up on finding a terminator.
pub const MAX_LIST_COMMANDS: usize = 1 << 20;

/// Most vertices any microcode loads with one `G_VTX`.
const MAX_VERTEX_LOAD: usize = 64;

/// Maps segment numbers to ROM offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentTable {
    bases: [Option<u32>; 16],
}

impl SegmentTable {
    pub fn new() -> SegmentTable {
        SegmentTable::default()
    }

    pub fn set(&mut self, segment: u8, base: u32) {
        if let Some(slot) = self.bases.get_mut(segment as usize) {
            *slot = Some(base);
        } else {
            warn!(target: "F3D", "segment {} out of range", segment);
        }
    }

    pub fn get(&self, segment: u8) -> Option<u32> {
        self.bases.get(segment as usize).copied().flatten()
    }

    /// ROM offset of a segmented address. The whole top byte is the segment,
    /// so KSEG0 addresses never map.
    pub fn translate(&self, address: u32) -> Option<usize> {
        let segment = (address >> 24) as u8;
        self.get(segment).map(|base| base as usize + (address & 0x00FF_FFFF) as usize)
    }
}

/// Name for data at a ROM offset, e.g. `vtx_00012340`.
fn data_name(prefix: &str, offset: usize) -> String {
    format!("{}_{:08X}", prefix, offset)
}

fn parse_data_name(name: &str, prefix: &str) -> Option<usize> {
    let hex = name.strip_prefix(prefix)?.strip_prefix('_')?;
    usize::from_str_radix(hex, 16).ok()
}

pub struct BinarySource<R: RomSource> {
    rom: R,
    ucode: Ucode,
    scale: f32,
    segments: SegmentTable,
    /// Vertex records needed past each `G_VTX` address.
    vertex_extent: HashMap<usize, usize>,
    vertices: HashMap<usize, Arc<Vec<Vertex>>>,
}

impl<R: RomSource> BinarySource<R> {
    pub fn new(rom: R, segments: SegmentTable, settings: &ImportSettings) -> BinarySource<R> {
        BinarySource {
            rom,
            ucode: settings.ucode,
            scale: if settings.scale != 0.0 { settings.scale } else { 1.0 },
            segments,
            vertex_extent: HashMap::new(),
            vertices: HashMap::new(),
        }
    }

    pub fn segments(&self) -> &SegmentTable {
        &self.segments
    }

    /// List name for a display list at a ROM offset, for starting a traversal.
    pub fn list_name(offset: usize) -> String {
        data_name("dl", offset)
    }

    fn read_list(&mut self, list: &str, start: usize) -> Result<Vec<Command>> {
        let mut decoder = Decoder::new(&self.rom, &self.segments, &mut self.vertex_extent, self.ucode);
        decoder.command_address = start;

        for _ in 0..MAX_LIST_COMMANDS {
            let address = decoder.command_address;
            decoder.command = decoder.rom.read_u64(address).map_err(|_| {
                error!(target: "F3D", "{} runs off the ROM at ${:08X}", list, address);
                F3dError::Unterminated { list: list.to_string() }
            })?;
            decoder.command_op = (decoder.command >> 56) as u8;
            decoder.command_words = (decoder.command >> 32) as u32;
            decoder.command_prefix = format!("{}[${:08X}]:", list, address);
            decoder.command_address += 8;

            let handler = decoder.command_table[decoder.command_op as usize];
            if handler(&mut decoder) == Flow::Stop {
                debug!(target: "F3D", "{}: {} commands", list, decoder.out.len());
                return Ok(decoder.out);
            }
        }

        error!(target: "F3D", "{} has no terminator in {} commands", list, MAX_LIST_COMMANDS);
        Err(F3dError::Unterminated { list: list.to_string() })
    }
}

impl<R: RomSource> AssetSource for BinarySource<R> {
    fn display_list(&mut self, name: &str) -> Result<Vec<Command>> {
        let start = parse_data_name(name, "dl")
            .ok_or_else(|| F3dError::MissingDeclaration { kind: "display list", name: name.to_string() })?;
        self.read_list(name, start)
    }

    fn vertices(&mut self, name: &str) -> Result<Arc<Vec<Vertex>>> {
        let offset = parse_data_name(name, "vtx")
            .ok_or_else(|| F3dError::MissingDeclaration { kind: "vertex list", name: name.to_string() })?;
        let wanted = self.vertex_extent.get(&offset).copied().unwrap_or(MAX_VERTEX_LOAD);
        if let Some(v) = self.vertices.get(&offset) {
            if v.len() >= wanted {
                return Ok(Arc::clone(v));
            }
        }

        let available = self.rom.len().saturating_sub(offset) / VERTEX_SIZE;
        let count = wanted.min(available);
        let bytes = self.rom.read_block(offset, count * VERTEX_SIZE)?;
        let parsed: Arc<Vec<Vertex>> = Arc::new(bytes.chunks_exact(VERTEX_SIZE).map(Vertex::from_be_bytes).collect());
        self.vertices.insert(offset, Arc::clone(&parsed));
        Ok(parsed)
    }

    fn lights(&mut self, name: &str) -> Result<LightSet> {
        let offset = parse_data_name(name, "light")
            .ok_or_else(|| F3dError::MissingDeclaration { kind: "light", name: name.to_string() })?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&self.rom.read_block(offset, 16)?);
        Ok(LightSet::from_light_bytes(name, &bytes))
    }

    fn matrix(&mut self, name: &str) -> Option<Matrix4<f32>> {
        let offset = parse_data_name(name, "mtx")?;
        let mut words = [0u32; 16];
        for (i, w) in words.iter_mut().enumerate() {
            *w = self.rom.read_u32(offset + i * 4).ok()?;
        }
        Some(Matrix4::from_scale(1.0 / self.scale) * decode_mtx(&words))
    }

    fn texture(&mut self, name: &str, request: TextureRequest) -> Result<TextureEntry> {
        let reference = TextureEntry::Reference { name: name.to_string(), width: request.width };
        let offset = match parse_data_name(name, "tex") {
            Some(offset) => offset,
            None => return Ok(reference),
        };

        let width = if request.width == 0 { 16 } else { request.width };
        let length = (width as usize * request.height.max(1) as usize * request.siz.bits() as usize).div_ceil(8);
        let bytes = match self.rom.read_block(offset, length) {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!(target: "F3D", "texture {} ({} bytes) runs off the ROM", name, length);
                return Ok(reference);
            },
        };

        let mut image = decode_texture(&bytes, request.fmt, request.siz, width);
        if !request.is_lut {
            flip_vertical(&mut image);
        }
        Ok(TextureEntry::Image(image))
    }

    /// Calls into unmapped segments are left as raw addresses and skipped.
    fn resolve_dl_name(&self, name: &str) -> Option<String> {
        parse_data_name(name, "dl").map(|_| name.to_string())
    }
}

fn ints(values: &[u64]) -> Vec<Arg> {
    values.iter().map(|v| Arg::Int(*v as i64)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

type DLCommand<'a, R> = fn(&mut Decoder<'a, R>) -> Flow;

struct Decoder<'a, R: RomSource> {
    rom: &'a R,
    segments: &'a SegmentTable,
    vertex_extent: &'a mut HashMap<usize, usize>,
    ucode: Ucode,

    command_table: [DLCommand<'a, R>; 256],
    command_address: usize,
    command: u64,
    command_op: u8,
    command_words: u32,
    command_prefix: String,

    out: Vec<Command>,
}

impl<'a, R: RomSource> Decoder<'a, R> {
    fn new(rom: &'a R, segments: &'a SegmentTable, vertex_extent: &'a mut HashMap<usize, usize>, ucode: Ucode) -> Self {
        let mut decoder = Decoder {
            rom,
            segments,
            vertex_extent,
            ucode,
            command_table: [Decoder::handle_unknown; 256],
            command_address: 0,
            command: 0,
            command_op: 0,
            command_words: 0,
            command_prefix: String::new(),
            out: Vec::new(),
        };
        decoder.install_commands();
        decoder
    }

    fn install_commands(&mut self) {
        if self.ucode.is_ex2_family() {
            self.command_table[op::F3DEX2_NOOP as usize]           = Decoder::handle_noop;
            self.command_table[op::F3DEX2_VTX as usize]            = Decoder::handle_vtx;
            self.command_table[op::F3DEX2_MODIFYVTX as usize]      = Decoder::handle_ignored;
            self.command_table[op::F3DEX2_CULLDL as usize]         = Decoder::handle_ignored;
            self.command_table[op::F3DEX2_BRANCH_Z as usize]       = Decoder::handle_branch_z;
            self.command_table[op::F3DEX2_TRI1 as usize]           = Decoder::handle_tri1;
            self.command_table[op::F3DEX2_TRI2 as usize]           = Decoder::handle_tri2;
            self.command_table[op::F3DEX2_QUAD as usize]           = Decoder::handle_tri2;
            self.command_table[op::F3DEX2_TEXTURE as usize]        = Decoder::handle_texture;
            self.command_table[op::F3DEX2_POPMTX as usize]         = Decoder::handle_popmtx;
            self.command_table[op::F3DEX2_GEOMETRYMODE as usize]   = Decoder::handle_geometrymode;
            self.command_table[op::F3DEX2_MTX as usize]            = Decoder::handle_mtx;
            self.command_table[op::F3DEX2_MOVEWORD as usize]       = Decoder::handle_moveword;
            self.command_table[op::F3DEX2_MOVEMEM as usize]        = Decoder::handle_movemem;
            self.command_table[op::F3DEX2_DL as usize]             = Decoder::handle_displaylist;
            self.command_table[op::F3DEX2_ENDDL as usize]          = Decoder::handle_enddl;
            self.command_table[op::F3DEX2_RDPHALF_1 as usize]      = Decoder::handle_ignored;
            self.command_table[op::F3DEX2_SETOTHERMODE_L as usize] = Decoder::handle_setothermode;
            self.command_table[op::F3DEX2_SETOTHERMODE_H as usize] = Decoder::handle_setothermode;
        } else {
            self.command_table[op::F3D_SPNOOP as usize]            = Decoder::handle_noop;
            self.command_table[op::F3D_MTX as usize]               = Decoder::handle_mtx;
            self.command_table[op::F3D_MOVEMEM as usize]           = Decoder::handle_movemem;
            self.command_table[op::F3D_VTX as usize]               = Decoder::handle_vtx;
            self.command_table[op::F3D_DL as usize]                = Decoder::handle_displaylist;
            self.command_table[op::F3D_TRI1 as usize]              = Decoder::handle_tri1;
            self.command_table[op::F3D_CULLDL as usize]            = Decoder::handle_ignored;
            self.command_table[op::F3D_POPMTX as usize]            = Decoder::handle_popmtx;
            self.command_table[op::F3D_MOVEWORD as usize]          = Decoder::handle_moveword;
            self.command_table[op::F3D_TEXTURE as usize]           = Decoder::handle_texture;
            self.command_table[op::F3D_SETOTHERMODE_H as usize]    = Decoder::handle_setothermode;
            self.command_table[op::F3D_SETOTHERMODE_L as usize]    = Decoder::handle_setothermode;
            self.command_table[op::F3D_ENDDL as usize]             = Decoder::handle_enddl;
            self.command_table[op::F3D_SETGEOMETRYMODE as usize]   = Decoder::handle_geometrymode;
            self.command_table[op::F3D_CLEARGEOMETRYMODE as usize] = Decoder::handle_geometrymode;
            self.command_table[op::F3D_RDPHALF_1 as usize]         = Decoder::handle_ignored;
            if self.ucode == Ucode::F3dex {
                self.command_table[op::F3DEX_MODIFYVTX as usize]   = Decoder::handle_ignored;
                self.command_table[op::F3DEX_TRI2 as usize]        = Decoder::handle_tri2;
            }
        }

        // RDP commands
        self.command_table[op::G_SETCIMG as usize]         = Decoder::handle_ignored;
        self.command_table[op::G_SETZIMG as usize]         = Decoder::handle_ignored;
        self.command_table[op::G_SETTIMG as usize]         = Decoder::handle_settimg;
        self.command_table[op::G_SETCOMBINE as usize]      = Decoder::handle_setcombine;
        self.command_table[op::G_SETENVCOLOR as usize]     = Decoder::handle_setcolor;
        self.command_table[op::G_SETPRIMCOLOR as usize]    = Decoder::handle_setprimcolor;
        self.command_table[op::G_SETBLENDCOLOR as usize]   = Decoder::handle_setcolor;
        self.command_table[op::G_SETFOGCOLOR as usize]     = Decoder::handle_setcolor;
        self.command_table[op::G_SETFILLCOLOR as usize]    = Decoder::handle_setfillcolor;
        self.command_table[op::G_FILLRECT as usize]        = Decoder::handle_ignored;
        self.command_table[op::G_SETTILE as usize]         = Decoder::handle_settile;
        self.command_table[op::G_LOADTILE as usize]        = Decoder::handle_loadtile;
        self.command_table[op::G_LOADBLOCK as usize]       = Decoder::handle_loadtile;
        self.command_table[op::G_SETTILESIZE as usize]     = Decoder::handle_loadtile;
        self.command_table[op::G_LOADTLUT as usize]        = Decoder::handle_loadtlut;
        self.command_table[op::G_RDPSETOTHERMODE as usize] = Decoder::handle_rdpsetothermode;
        self.command_table[op::G_SETPRIMDEPTH as usize]    = Decoder::handle_setprimdepth;
        self.command_table[op::G_SETSCISSOR as usize]      = Decoder::handle_ignored;
        self.command_table[op::G_SETCONVERT as usize]      = Decoder::handle_setconvert;
        self.command_table[op::G_SETKEYR as usize]         = Decoder::handle_setkeyr;
        self.command_table[op::G_SETKEYGB as usize]        = Decoder::handle_setkeygb;
        self.command_table[op::G_RDPFULLSYNC as usize]     = Decoder::handle_ignored;
        self.command_table[op::G_RDPTILESYNC as usize]     = Decoder::handle_ignored;
        self.command_table[op::G_RDPPIPESYNC as usize]     = Decoder::handle_ignored;
        self.command_table[op::G_RDPLOADSYNC as usize]     = Decoder::handle_ignored;
        self.command_table[op::G_TEXRECT as usize]         = Decoder::handle_ignored;
    }

    fn emit(&mut self, name: &str, args: Vec<Arg>) {
        let command = Command::new(name, args);
        trace!(target: "F3D", "{} {}", self.command_prefix, command);
        self.out.push(command);
    }

    /// Name for the data behind a segmented address, or `None` when the
    /// segment is not mapped.
    fn data_name(&self, prefix: &str, address: u32) -> Option<String> {
        self.segments.translate(address).map(|offset| data_name(prefix, offset))
    }

    fn partial(&self, what: &str, address: u32) -> Flow {
        warn!(target: "F3D", "{} {} at 0x{:08X} is in an unmapped segment, DL is partial", self.command_prefix, what, address);
        Flow::Continue
    }

    fn handle_unknown(&mut self) -> Flow {
        warn!(target: "F3D", "{} unknown DL command ${:02X} (${:016X})", self.command_prefix, self.command_op, self.command);
        Flow::Continue
    }

    fn handle_ignored(&mut self) -> Flow {
        trace!(target: "F3D", "{} ignored ${:02X} (${:016X})", self.command_prefix, self.command_op, self.command);
        Flow::Continue
    }

    // read memory until a \0 is encountered, and decode into a printable string
    fn load_string(&self, start: usize, max_len: usize) -> String {
        let mut v: Vec<u8> = Vec::with_capacity(max_len);
        for offset in start..start + max_len {
            match self.rom.read_u8(offset) {
                Ok(0) | Err(_) => break,
                Ok(c) => v.push(c),
            }
        }
        let (res, _enc, _errors) = encoding_rs::EUC_JP.decode(&v);
        res.to_string()
    }

    fn handle_noop(&mut self) -> Flow { // G_NOOP
        let addr = self.command as u32;
        match self.segments.translate(addr) {
            Some(offset) if addr != 0 => {
                let s = self.load_string(offset, 64);
                trace!(target: "F3D", "{} gsDPNoOpString([0x{:08X}] \"{}\")", self.command_prefix, addr, s);
            },
            _ => trace!(target: "F3D", "{} gsDPNoOp()", self.command_prefix),
        }
        Flow::Continue
    }

    fn handle_vtx(&mut self) -> Flow { // G_VTX
        let w0 = self.command_words;
        let addr = self.command as u32;
        let (numv, vbidx) = match self.ucode {
            Ucode::F3d   => (((w0 >> 20) & 0x0F) + 1, (w0 >> 16) & 0x0F),
            Ucode::F3dex => ((w0 >> 10) & 0x3F, ((w0 >> 16) & 0xFF) / 2),
            _ => {
                let numv = (w0 >> 12) & 0xFF;
                (numv, ((w0 >> 1) & 0x7F).wrapping_sub(numv))
            },
        };

        let offset = match self.segments.translate(addr) {
            Some(offset) => offset,
            None => return self.partial("gsSPVertex", addr),
        };
        let extent = self.vertex_extent.entry(offset).or_insert(0);
        *extent = (*extent).max(numv as usize);

        self.emit("gsSPVertex", vec![Arg::Text(data_name("vtx", offset)), Arg::Int(numv as i64), Arg::Int(vbidx as i32 as i64)]);
        Flow::Continue
    }

    fn triangle_indices(&self, word: u32) -> [u64; 3] {
        let divisor = if self.ucode == Ucode::F3d { 10 } else { 2 };
        [(word >> 16) & 0xFF, (word >> 8) & 0xFF, word & 0xFF].map(|v| (v / divisor) as u64)
    }

    fn handle_tri1(&mut self) -> Flow { // G_TRI1
        let word = if self.ucode.is_ex2_family() { self.command_words } else { self.command as u32 };
        let [v0, v1, v2] = self.triangle_indices(word);
        self.emit("gsSP1Triangle", ints(&[v0, v1, v2, 0]));
        Flow::Continue
    }

    fn handle_tri2(&mut self) -> Flow { // G_TRI2, G_QUAD
        let [v0, v1, v2] = self.triangle_indices(self.command_words);
        let [v3, v4, v5] = self.triangle_indices(self.command as u32);
        self.emit("gsSP2Triangles", ints(&[v0, v1, v2, 0, v3, v4, v5, 0]));
        Flow::Continue
    }

    fn handle_displaylist(&mut self) -> Flow { // G_DL
        let is_link = (self.command & 0x00FF_0000_0000_0000) == 0;
        let addr    = self.command as u32;
        let target  = self.data_name("dl", addr).unwrap_or_else(|| format!("0x{:08X}", addr));

        if is_link {
            self.emit("gsSPDisplayList", vec![Arg::Text(target)]);
            Flow::Continue
        } else {
            self.emit("gsSPBranchList", vec![Arg::Text(target)]);
            Flow::Stop
        }
    }

    fn handle_branch_z(&mut self) -> Flow { // G_BRANCH_Z
        // the target was loaded by the preceding G_RDPHALF_1
        let half = self.rom.read_u32(self.command_address.wrapping_sub(12)).unwrap_or(0);
        let target = self.data_name("dl", half).unwrap_or_else(|| format!("0x{:08X}", half));
        let vtx = ((self.command_words >> 12) & 0xFFF) / 5;
        self.emit("gsSPBranchLessZraw", vec![Arg::Text(target), Arg::Int(vtx as i64), Arg::Int(self.command as u32 as i64)]);
        Flow::Continue
    }

    fn handle_enddl(&mut self) -> Flow { // G_ENDDL
        self.emit("gsSPEndDisplayList", vec![]);
        Flow::Stop
    }

    fn handle_geometrymode(&mut self) -> Flow { // G_GEOMETRYMODE, G_SETGEOMETRYMODE, G_CLEARGEOMETRYMODE
        let w1 = self.command as u32;
        match self.command_op {
            op::F3D_SETGEOMETRYMODE if !self.ucode.is_ex2_family() => {
                self.emit("gsSPSetGeometryMode", vec![Arg::Int(w1 as i64)]);
            },
            op::F3D_CLEARGEOMETRYMODE if !self.ucode.is_ex2_family() => {
                self.emit("gsSPClearGeometryMode", vec![Arg::Int(w1 as i64)]);
            },
            _ => {
                let clear = !self.command_words & 0x00FF_FFFF;
                self.emit("gsSPGeometryMode", vec![Arg::Int(clear as i64), Arg::Int(w1 as i64)]);
            },
        }
        Flow::Continue
    }

    fn handle_mtx(&mut self) -> Flow { // G_MTX
        let addr = self.command as u32;
        let (push, mul, proj) = if self.ucode.is_ex2_family() {
            let params = self.command_words as u8;
            ((params & 0x01) == 0, (params & 0x02) == 0, (params & 0x04) != 0)
        } else {
            let params = (self.command_words >> 16) as u8;
            ((params & 0x04) != 0, (params & 0x02) == 0, (params & 0x01) != 0)
        };

        let mut s = String::from("0");
        if push { s.push_str("|G_MTX_PUSH"); } else { s.push_str("|G_MTX_NOPUSH"); }
        if mul  { s.push_str("|G_MTX_MUL"); } else { s.push_str("|G_MTX_LOAD"); }
        if proj { s.push_str("|G_MTX_PROJECTION"); } else { s.push_str("|G_MTX_MODELVIEW"); }

        match self.data_name("mtx", addr) {
            Some(name) => self.emit("gsSPMatrix", vec![Arg::Text(name), Arg::Text(s)]),
            None => return self.partial("gsSPMatrix", addr),
        }
        Flow::Continue
    }

    fn handle_popmtx(&mut self) -> Flow { // G_POPMTX
        self.emit("gsSPPopMatrix", vec![Arg::Text("G_MTX_MODELVIEW".to_string())]);
        Flow::Continue
    }

    fn handle_moveword(&mut self) -> Flow { // G_MOVEWORD
        let w0 = self.command_words;
        let (index, offset) = if self.ucode.is_ex2_family() {
            ((w0 >> 16) & 0xFF, w0 & 0xFFFF)
        } else {
            (w0 & 0xFF, (w0 >> 8) & 0xFFFF)
        };
        let data = self.command as u32;

        match index as u8 {
            op::G_MW_NUMLIGHT => {
                let n = if self.ucode.is_ex2_family() {
                    data as i64 / 24
                } else {
                    ((data.wrapping_sub(0x8000_0000)) as i64 / 32) - 1
                };
                self.emit("gsSPNumLights", vec![Arg::Int(n)]);
            },
            op::G_MW_SEGMENT => {
                // segment bases are RAM addresses; the ROM table is fixed by the caller
                trace!(target: "F3D", "{} gsSPSegment({}, 0x{:08X})", self.command_prefix, offset >> 2, data);
            },
            op::G_MW_LIGHTCOL => {
                let stride = if self.ucode.is_ex2_family() { 0x18 } else { 0x20 };
                if offset % stride == 0 {
                    let light = offset / stride + 1;
                    self.emit("gsSPLightColor", vec![Arg::Text(format!("LIGHT_{}", light)), Arg::Int(data as i64)]);
                }
            },
            _ => {
                trace!(target: "F3D", "{} gsMoveWd({}, 0x{:04X}, 0x{:08X})", self.command_prefix, index, offset, data);
            },
        };
        Flow::Continue
    }

    fn handle_movemem(&mut self) -> Flow { // G_MOVEMEM
        let w0 = self.command_words;
        let addr = self.command as u32;

        let light = if self.ucode.is_ex2_family() {
            let index = w0 & 0xFF;
            let offset = ((w0 >> 8) & 0xFF) * 8;
            // slots 0 and 1 hold the lookat directions
            (index == op::G_MV_LIGHT as u32 && offset >= 48).then(|| offset / 24 - 1)
        } else {
            let index = (w0 >> 16) & 0xFF;
            let first = op::F3D_MV_L0 as u32;
            (first..=first + 14).contains(&index).then(|| (index - first) / 2 + 1)
        };

        match light {
            Some(n) => match self.data_name("light", addr) {
                Some(name) => self.emit("gsSPLight", vec![Arg::Text(name), Arg::Int(n as i64)]),
                None => return self.partial("gsSPLight", addr),
            },
            None => trace!(target: "F3D", "{} gsMoveMem(0x{:08X}, 0x{:08X})", self.command_prefix, w0, addr),
        }
        Flow::Continue
    }

    fn handle_texture(&mut self) -> Flow { // G_TEXTURE
        let w0 = self.command_words;
        let w1 = self.command as u32;
        let level = (w0 >> 11) & 0x07;
        let tile  = (w0 >> 8) & 0x07;
        let on    = if self.ucode.is_ex2_family() { (w0 >> 1) & 0x7F } else { w0 & 0xFF };
        let s     = (w1 >> 16) & 0xFFFF;
        let t     = w1 & 0xFFFF;
        self.emit("gsSPTexture", ints(&[s as u64, t as u64, level as u64, tile as u64, on as u64]));
        Flow::Continue
    }

    fn handle_setothermode(&mut self) -> Flow { // G_SETOTHERMODE_H, G_SETOTHERMODE_L
        let w0 = self.command_words;
        let (shift, len) = if self.ucode.is_ex2_family() {
            let len = (w0 & 0xFF) + 1;
            (32u32.saturating_sub(((w0 >> 8) & 0xFF) + len), len)
        } else {
            ((w0 >> 8) & 0xFF, w0 & 0xFF)
        };
        let which = if self.command_op == self.ucode.setothermode_h() { "G_SETOTHERMODE_H" } else { "G_SETOTHERMODE_L" };
        self.emit("gsSPSetOtherMode", vec![
            Arg::Text(which.to_string()),
            Arg::Int(shift as i64),
            Arg::Int(len as i64),
            Arg::Int(self.command as u32 as i64),
        ]);
        Flow::Continue
    }

    fn handle_settimg(&mut self) -> Flow { // G_SETTIMG
        let w0    = self.command_words;
        let addr  = self.command as u32;
        let fmt   = (w0 >> 21) & 0x07;
        let siz   = (w0 >> 19) & 0x03;
        let width = (w0 & 0x0FFF) + 1;

        let name = match self.data_name("tex", addr) {
            Some(name) => name,
            None => {
                self.partial("gsDPSetTextureImage", addr);
                format!("0x{:08X}", addr)
            },
        };
        self.emit("gsDPSetTextureImage", vec![Arg::Int(fmt as i64), Arg::Int(siz as i64), Arg::Int(width as i64), Arg::Text(name)]);
        Flow::Continue
    }

    fn handle_setcombine(&mut self) -> Flow { // G_SETCOMBINE
        let w0 = self.command_words as u64;
        let w1 = self.command & 0xFFFF_FFFF;
        let f = |w: u64, shift: u32, mask: u64| (w >> shift) & mask;

        let args = [
            // cycle 1: a, b, c, d, Aa, Ab, Ac, Ad
            f(w0, 20, 0xF), f(w1, 28, 0xF), f(w0, 15, 0x1F), f(w1, 15, 0x7),
            f(w0, 12, 0x7), f(w1, 12, 0x7), f(w0, 9, 0x7), f(w1, 9, 0x7),
            // cycle 2
            f(w0, 5, 0xF), f(w1, 24, 0xF), f(w0, 0, 0x1F), f(w1, 6, 0x7),
            f(w1, 21, 0x7), f(w1, 3, 0x7), f(w1, 18, 0x7), f(w1, 0, 0x7),
        ];
        self.emit("gsDPSetCombineLERP", ints(&args));
        Flow::Continue
    }

    fn rgba(&self) -> [u64; 4] {
        let w1 = self.command as u32;
        [(w1 >> 24) & 0xFF, (w1 >> 16) & 0xFF, (w1 >> 8) & 0xFF, w1 & 0xFF].map(|v| v as u64)
    }

    fn handle_setcolor(&mut self) -> Flow { // G_SETENVCOLOR, G_SETBLENDCOLOR, G_SETFOGCOLOR
        let name = match self.command_op {
            op::G_SETENVCOLOR   => "gsDPSetEnvColor",
            op::G_SETBLENDCOLOR => "gsDPSetBlendColor",
            _                   => "gsDPSetFogColor",
        };
        let rgba = self.rgba();
        self.emit(name, ints(&rgba));
        Flow::Continue
    }

    fn handle_setprimcolor(&mut self) -> Flow { // G_SETPRIMCOLOR
        let minlevel = ((self.command_words >> 8) & 0xFF) as u64;
        let lodfrac  = (self.command_words & 0xFF) as u64;
        let [r, g, b, a] = self.rgba();
        self.emit("gsDPSetPrimColor", ints(&[minlevel, lodfrac, r, g, b, a]));
        Flow::Continue
    }

    fn handle_setfillcolor(&mut self) -> Flow { // G_SETFILLCOLOR
        self.emit("gsDPSetFillColor", vec![Arg::Int(self.command as u32 as i64)]);
        Flow::Continue
    }

    fn handle_settile(&mut self) -> Flow { // G_SETTILE
        let w0 = self.command_words as u64;
        let w1 = self.command & 0xFFFF_FFFF;
        let fmt    = (w0 >> 21) & 0x07;
        let siz    = (w0 >> 19) & 0x03;
        let line   = (w0 >> 9) & 0x1FF;
        let tmem   = w0 & 0x1FF;
        let tile   = (w1 >> 24) & 0x07;
        let pal    = (w1 >> 20) & 0x0F;
        let cmt    = (w1 >> 18) & 0x03;
        let maskt  = (w1 >> 14) & 0x0F;
        let shiftt = (w1 >> 10) & 0x0F;
        let cms    = (w1 >> 8) & 0x03;
        let masks  = (w1 >> 4) & 0x0F;
        let shifts = w1 & 0x0F;
        self.emit("gsDPSetTile", ints(&[fmt, siz, line, tmem, tile, pal, cmt, maskt, shiftt, cms, masks, shifts]));
        Flow::Continue
    }

    fn handle_loadtile(&mut self) -> Flow { // G_LOADTILE, G_LOADBLOCK, G_SETTILESIZE
        let w0 = self.command_words as u64;
        let w1 = self.command & 0xFFFF_FFFF;
        let uls  = (w0 >> 12) & 0xFFF;
        let ult  = w0 & 0xFFF;
        let tile = (w1 >> 24) & 0x07;
        let lrs  = (w1 >> 12) & 0xFFF;
        let lrt  = w1 & 0xFFF;
        let name = match self.command_op {
            op::G_LOADTILE  => "gsDPLoadTile",
            op::G_LOADBLOCK => "gsDPLoadBlock",
            _               => "gsDPSetTileSize",
        };
        self.emit(name, ints(&[tile, uls, ult, lrs, lrt]));
        Flow::Continue
    }

    fn handle_loadtlut(&mut self) -> Flow { // G_LOADTLUT
        let w1 = self.command & 0xFFFF_FFFF;
        let tile  = (w1 >> 24) & 0x07;
        let count = (w1 >> 14) & 0x3FF;
        self.emit("gsDPLoadTLUTCmd", ints(&[tile, count]));
        Flow::Continue
    }

    fn handle_rdpsetothermode(&mut self) -> Flow { // G_RDPSETOTHERMODE
        let hi = self.command_words & 0x00FF_FFFF;
        self.emit("gsDPSetOtherMode", vec![Arg::Int(hi as i64), Arg::Int(self.command as u32 as i64)]);
        Flow::Continue
    }

    fn handle_setprimdepth(&mut self) -> Flow { // G_SETPRIMDEPTH
        let w1 = self.command as u32;
        self.emit("gsDPSetPrimDepth", vec![Arg::Int((w1 >> 16) as i16 as i64), Arg::Int(w1 as u16 as i16 as i64)]);
        Flow::Continue
    }

    fn handle_setconvert(&mut self) -> Flow { // G_SETCONVERT
        let w0 = self.command_words;
        let w1 = self.command as u32;
        let s9 = |v: u32| (((v & 0x1FF) as i32) << 23 >> 23) as i64;
        let k = [
            s9(w0 >> 13),
            s9(w0 >> 4),
            s9(((w0 & 0x0F) << 5) | ((w1 >> 27) & 0x1F)),
            s9(w1 >> 18),
            s9(w1 >> 9),
            s9(w1),
        ];
        self.emit("gsDPSetConvert", k.iter().map(|v| Arg::Int(*v)).collect());
        Flow::Continue
    }

    fn handle_setkeyr(&mut self) -> Flow { // G_SETKEYR
        let w1 = self.command & 0xFFFF_FFFF;
        self.emit("gsDPSetKeyR", ints(&[(w1 >> 8) & 0xFF, w1 & 0xFF, (w1 >> 16) & 0xFFF]));
        Flow::Continue
    }

    fn handle_setkeygb(&mut self) -> Flow { // G_SETKEYGB
        let w0 = self.command_words as u64;
        let w1 = self.command & 0xFFFF_FFFF;
        self.emit("gsDPSetKeyGB", ints(&[
            (w1 >> 24) & 0xFF, (w1 >> 16) & 0xFF, (w0 >> 12) & 0xFFF,
            (w1 >> 8) & 0xFF, w1 & 0xFF, w0 & 0xFFF,
        ]));
        Flow::Continue
    }
}
