//! Static GBI tables: opcodes, combiner presets, image formats, geometry and
//! other-mode bits, render-mode presets and the symbol table used by the
//! expression evaluator.

#[allow(unused_imports)]
use tracing::{trace, debug, error, info, warn};

use bitflags::bitflags;

/// RSP microcode family. The families share the RDP half of the GBI but
/// renumber the RSP opcodes and several geometry-mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum Ucode {
    F3d,
    F3dex,
    #[default]
    F3dex2,
    F3dex3,
}

impl Ucode {
    pub fn default_vertex_buffer_size(self) -> usize {
        match self {
            Ucode::F3d    => 16,
            Ucode::F3dex  => 32,
            Ucode::F3dex2 => 32,
            Ucode::F3dex3 => 56,
        }
    }

    /// F3DEX2 and F3DEX3 share the renumbered command set.
    pub fn is_ex2_family(self) -> bool {
        matches!(self, Ucode::F3dex2 | Ucode::F3dex3)
    }

    pub fn setothermode_h(self) -> u8 {
        if self.is_ex2_family() { op::F3DEX2_SETOTHERMODE_H } else { op::F3D_SETOTHERMODE_H }
    }

    pub fn setothermode_l(self) -> u8 {
        if self.is_ex2_family() { op::F3DEX2_SETOTHERMODE_L } else { op::F3D_SETOTHERMODE_L }
    }
}

/// Command opcodes (byte 0 of the command word).
pub mod op {
    // F3D / F3DEX
    pub const F3D_SPNOOP           : u8 = 0x00;
    pub const F3D_MTX              : u8 = 0x01;
    pub const F3D_MOVEMEM          : u8 = 0x03;
    pub const F3D_VTX              : u8 = 0x04;
    pub const F3D_DL               : u8 = 0x06;
    pub const F3D_TRI1             : u8 = 0xBF;
    pub const F3D_CULLDL           : u8 = 0xBE;
    pub const F3D_POPMTX           : u8 = 0xBD;
    pub const F3D_MOVEWORD         : u8 = 0xBC;
    pub const F3D_TEXTURE          : u8 = 0xBB;
    pub const F3D_SETOTHERMODE_H   : u8 = 0xBA;
    pub const F3D_SETOTHERMODE_L   : u8 = 0xB9;
    pub const F3D_ENDDL            : u8 = 0xB8;
    pub const F3D_SETGEOMETRYMODE  : u8 = 0xB7;
    pub const F3D_CLEARGEOMETRYMODE: u8 = 0xB6;
    pub const F3D_RDPHALF_1        : u8 = 0xB4;
    pub const F3DEX_MODIFYVTX      : u8 = 0xB2;
    pub const F3DEX_TRI2           : u8 = 0xB1;

    // F3DEX2 / F3DEX3
    pub const F3DEX2_NOOP          : u8 = 0x00;
    pub const F3DEX2_VTX           : u8 = 0x01;
    pub const F3DEX2_MODIFYVTX     : u8 = 0x02;
    pub const F3DEX2_CULLDL        : u8 = 0x03;
    pub const F3DEX2_BRANCH_Z      : u8 = 0x04;
    pub const F3DEX2_TRI1          : u8 = 0x05;
    pub const F3DEX2_TRI2          : u8 = 0x06;
    pub const F3DEX2_QUAD          : u8 = 0x07;
    pub const F3DEX2_TEXTURE       : u8 = 0xD7;
    pub const F3DEX2_POPMTX        : u8 = 0xD8;
    pub const F3DEX2_GEOMETRYMODE  : u8 = 0xD9;
    pub const F3DEX2_MTX           : u8 = 0xDA;
    pub const F3DEX2_MOVEWORD      : u8 = 0xDB;
    pub const F3DEX2_MOVEMEM       : u8 = 0xDC;
    pub const F3DEX2_DL            : u8 = 0xDE;
    pub const F3DEX2_ENDDL         : u8 = 0xDF;
    pub const F3DEX2_RDPHALF_1     : u8 = 0xE1;
    pub const F3DEX2_SETOTHERMODE_L: u8 = 0xE2;
    pub const F3DEX2_SETOTHERMODE_H: u8 = 0xE3;

    // RDP, shared by every family
    pub const G_SETCIMG        : u8 = 0xFF;
    pub const G_SETZIMG        : u8 = 0xFE;
    pub const G_SETTIMG        : u8 = 0xFD;
    pub const G_SETCOMBINE     : u8 = 0xFC;
    pub const G_SETENVCOLOR    : u8 = 0xFB;
    pub const G_SETPRIMCOLOR   : u8 = 0xFA;
    pub const G_SETBLENDCOLOR  : u8 = 0xF9;
    pub const G_SETFOGCOLOR    : u8 = 0xF8;
    pub const G_SETFILLCOLOR   : u8 = 0xF7;
    pub const G_FILLRECT       : u8 = 0xF6;
    pub const G_SETTILE        : u8 = 0xF5;
    pub const G_LOADTILE       : u8 = 0xF4;
    pub const G_LOADBLOCK      : u8 = 0xF3;
    pub const G_SETTILESIZE    : u8 = 0xF2;
    pub const G_LOADTLUT       : u8 = 0xF0;
    pub const G_RDPSETOTHERMODE: u8 = 0xEF;
    pub const G_SETPRIMDEPTH   : u8 = 0xEE;
    pub const G_SETSCISSOR     : u8 = 0xED;
    pub const G_SETCONVERT     : u8 = 0xEC;
    pub const G_SETKEYR        : u8 = 0xEB;
    pub const G_SETKEYGB       : u8 = 0xEA;
    pub const G_RDPFULLSYNC    : u8 = 0xE9;
    pub const G_RDPTILESYNC    : u8 = 0xE8;
    pub const G_RDPPIPESYNC    : u8 = 0xE7;
    pub const G_RDPLOADSYNC    : u8 = 0xE6;
    pub const G_TEXRECT        : u8 = 0xE4;

    pub const G_MW_NUMLIGHT: u8 = 0x02;
    pub const G_MW_SEGMENT : u8 = 0x06;
    pub const G_MW_LIGHTCOL: u8 = 0x0A;
    pub const G_MV_LIGHT   : u8 = 0x0A; // F3DEX2 index
    pub const F3D_MV_L0    : u8 = 0x86;
}

// ---------------------------------------------------------------------------
// Color combiner
// ---------------------------------------------------------------------------

/// The equation used when a preset name is not recognized (`G_CC_SHADE`).
pub const DEFAULT_COMBINER: [&str; 8] = ["0", "0", "0", "SHADE", "0", "0", "0", "SHADE"];

macro_rules! cc {
    ($($s:ident)*) => { [$(cc!(@ $s)),*] };
    (@ Z) => { "0" };
    (@ $s:ident) => { stringify!($s) };
}

static COMBINER_PRESETS: &[(&str, [&str; 8])] = &[
    ("PRIMITIVE",            cc!(Z Z Z PRIMITIVE Z Z Z PRIMITIVE)),
    ("SHADE",                cc!(Z Z Z SHADE Z Z Z SHADE)),
    ("MODULATEI",            cc!(TEXEL0 Z SHADE Z Z Z Z SHADE)),
    ("MODULATEIDECALA",      cc!(TEXEL0 Z SHADE Z Z Z Z TEXEL0)),
    ("MODULATEIFADE",        cc!(TEXEL0 Z SHADE Z Z Z Z ENVIRONMENT)),
    ("MODULATERGB",          cc!(TEXEL0 Z SHADE Z Z Z Z SHADE)),
    ("MODULATERGBDECALA",    cc!(TEXEL0 Z SHADE Z Z Z Z TEXEL0)),
    ("MODULATERGBFADE",      cc!(TEXEL0 Z SHADE Z Z Z Z ENVIRONMENT)),
    ("MODULATEIA",           cc!(TEXEL0 Z SHADE Z TEXEL0 Z SHADE Z)),
    ("MODULATEIFADEA",       cc!(TEXEL0 Z SHADE Z TEXEL0 Z ENVIRONMENT Z)),
    ("MODULATEFADE",         cc!(TEXEL0 Z SHADE Z ENVIRONMENT Z TEXEL0 Z)),
    ("MODULATERGBA",         cc!(TEXEL0 Z SHADE Z TEXEL0 Z SHADE Z)),
    ("MODULATERGBFADEA",     cc!(TEXEL0 Z SHADE Z TEXEL0 Z ENVIRONMENT Z)),
    ("MODULATEI_PRIM",       cc!(TEXEL0 Z PRIMITIVE Z Z Z Z PRIMITIVE)),
    ("MODULATEIA_PRIM",      cc!(TEXEL0 Z PRIMITIVE Z TEXEL0 Z PRIMITIVE Z)),
    ("MODULATEIDECALA_PRIM", cc!(TEXEL0 Z PRIMITIVE Z Z Z Z TEXEL0)),
    ("MODULATERGB_PRIM",     cc!(TEXEL0 Z PRIMITIVE Z Z Z Z PRIMITIVE)),
    ("MODULATERGBA_PRIM",    cc!(TEXEL0 Z PRIMITIVE Z TEXEL0 Z PRIMITIVE Z)),
    ("MODULATERGBDECALA_PRIM", cc!(TEXEL0 Z PRIMITIVE Z Z Z Z TEXEL0)),
    ("FADE",                 cc!(SHADE Z ENVIRONMENT Z SHADE Z ENVIRONMENT Z)),
    ("FADEA",                cc!(TEXEL0 Z ENVIRONMENT Z TEXEL0 Z ENVIRONMENT Z)),
    ("DECALRGB",             cc!(Z Z Z TEXEL0 Z Z Z SHADE)),
    ("DECALRGBA",            cc!(Z Z Z TEXEL0 Z Z Z TEXEL0)),
    ("DECALFADE",            cc!(Z Z Z TEXEL0 Z Z Z ENVIRONMENT)),
    ("DECALFADEA",           cc!(Z Z Z TEXEL0 TEXEL0 Z ENVIRONMENT Z)),
    ("BLENDI",               cc!(ENVIRONMENT SHADE TEXEL0 SHADE Z Z Z SHADE)),
    ("BLENDIA",              cc!(ENVIRONMENT SHADE TEXEL0 SHADE TEXEL0 Z SHADE Z)),
    ("BLENDIDECALA",         cc!(ENVIRONMENT SHADE TEXEL0 SHADE Z Z Z TEXEL0)),
    ("BLENDRGBA",            cc!(TEXEL0 SHADE TEXEL0_ALPHA SHADE Z Z Z SHADE)),
    ("BLENDRGBDECALA",       cc!(TEXEL0 SHADE TEXEL0_ALPHA SHADE Z Z Z TEXEL0)),
    ("BLENDRGBFADEA",        cc!(TEXEL0 SHADE TEXEL0_ALPHA SHADE Z Z Z ENVIRONMENT)),
    ("ADDRGB",               cc!(TEXEL0 Z TEXEL0 SHADE Z Z Z SHADE)),
    ("ADDRGBDECALA",         cc!(TEXEL0 Z TEXEL0 SHADE Z Z Z TEXEL0)),
    ("ADDRGBFADE",           cc!(TEXEL0 Z TEXEL0 SHADE Z Z Z ENVIRONMENT)),
    ("REFLECTRGB",           cc!(ENVIRONMENT Z TEXEL0 SHADE Z Z Z SHADE)),
    ("REFLECTRGBDECALA",     cc!(ENVIRONMENT Z TEXEL0 SHADE Z Z Z TEXEL0)),
    ("HILITERGB",            cc!(PRIMITIVE SHADE TEXEL0 SHADE Z Z Z SHADE)),
    ("HILITERGBA",           cc!(PRIMITIVE SHADE TEXEL0 SHADE PRIMITIVE SHADE TEXEL0 SHADE)),
    ("HILITERGBDECALA",      cc!(PRIMITIVE SHADE TEXEL0 SHADE Z Z Z TEXEL0)),
    ("SHADEDECALA",          cc!(Z Z Z SHADE Z Z Z TEXEL0)),
    ("SHADEFADEA",           cc!(Z Z Z SHADE Z Z Z ENVIRONMENT)),
    ("BLENDPE",              cc!(PRIMITIVE ENVIRONMENT TEXEL0 ENVIRONMENT TEXEL0 Z SHADE Z)),
    ("BLENDPEDECALA",        cc!(PRIMITIVE ENVIRONMENT TEXEL0 ENVIRONMENT Z Z Z TEXEL0)),
    ("_BLENDPE",             cc!(ENVIRONMENT PRIMITIVE TEXEL0 PRIMITIVE TEXEL0 Z SHADE Z)),
    ("_BLENDPEDECALA",       cc!(ENVIRONMENT PRIMITIVE TEXEL0 PRIMITIVE Z Z Z TEXEL0)),
    ("_TWOCOLORTEX",         cc!(PRIMITIVE SHADE TEXEL0 SHADE Z Z Z SHADE)),
    ("_SPARSEST",            cc!(PRIMITIVE TEXEL0 LOD_FRACTION TEXEL0 PRIMITIVE TEXEL0 LOD_FRACTION TEXEL0)),
    ("TEMPLERP",             cc!(TEXEL1 TEXEL0 PRIM_LOD_FRAC TEXEL0 TEXEL1 TEXEL0 PRIM_LOD_FRAC TEXEL0)),
    ("TRILERP",              cc!(TEXEL1 TEXEL0 LOD_FRACTION TEXEL0 TEXEL1 TEXEL0 LOD_FRACTION TEXEL0)),
    ("INTERFERENCE",         cc!(TEXEL0 Z TEXEL1 Z TEXEL0 Z TEXEL1 Z)),
    ("1CYUV2RGB",            cc!(TEXEL0 K4 K5 TEXEL0 Z Z Z SHADE)),
    ("YUV2RGB",              cc!(TEXEL1 K4 K5 TEXEL1 Z Z Z Z)),
    // second cycle
    ("PASS2",                cc!(Z Z Z COMBINED Z Z Z COMBINED)),
    ("MODULATEI2",           cc!(COMBINED Z SHADE Z Z Z Z SHADE)),
    ("MODULATEIA2",          cc!(COMBINED Z SHADE Z COMBINED Z SHADE Z)),
    ("MODULATERGB2",         cc!(COMBINED Z SHADE Z Z Z Z SHADE)),
    ("MODULATERGBA2",        cc!(COMBINED Z SHADE Z COMBINED Z SHADE Z)),
    ("MODULATEI_PRIM2",      cc!(COMBINED Z PRIMITIVE Z Z Z Z PRIMITIVE)),
    ("MODULATEIA_PRIM2",     cc!(COMBINED Z PRIMITIVE Z COMBINED Z PRIMITIVE Z)),
    ("MODULATERGB_PRIM2",    cc!(COMBINED Z PRIMITIVE Z Z Z Z PRIMITIVE)),
    ("MODULATERGBA_PRIM2",   cc!(COMBINED Z PRIMITIVE Z COMBINED Z PRIMITIVE Z)),
    ("DECALRGB2",            cc!(Z Z Z COMBINED Z Z Z SHADE)),
    ("DECALRGBA2",           cc!(COMBINED SHADE COMBINED_ALPHA SHADE Z Z Z SHADE)),
    ("BLENDI2",              cc!(ENVIRONMENT SHADE COMBINED SHADE Z Z Z SHADE)),
    ("BLENDIA2",             cc!(ENVIRONMENT SHADE COMBINED SHADE COMBINED Z SHADE Z)),
    ("CHROMA_KEY2",          cc!(TEXEL0 CENTER SCALE Z Z Z Z Z)),
    ("HILITERGB2",           cc!(ENVIRONMENT COMBINED TEXEL0 COMBINED Z Z Z SHADE)),
    ("HILITERGBA2",          cc!(ENVIRONMENT COMBINED TEXEL0 COMBINED ENVIRONMENT COMBINED TEXEL0 COMBINED)),
    ("HILITERGBDECALA2",     cc!(ENVIRONMENT COMBINED TEXEL0 COMBINED Z Z Z TEXEL0)),
    ("HILITERGBPASSA2",      cc!(ENVIRONMENT COMBINED TEXEL0 COMBINED Z Z Z COMBINED)),
];

/// Looks up a `G_CC_*` preset. The `G_CC_` prefix is optional.
pub fn combiner_preset(name: &str) -> Option<[&'static str; 8]> {
    let key = name.strip_prefix("G_CC_").unwrap_or(name);
    COMBINER_PRESETS.iter().find(|(n, _)| *n == key).map(|(_, v)| *v)
}

pub fn combiner_preset_names() -> impl Iterator<Item = &'static str> {
    COMBINER_PRESETS.iter().map(|(n, _)| *n)
}

pub fn resolve_combiner_preset(name: &str) -> [&'static str; 8] {
    combiner_preset(name).unwrap_or_else(|| {
        warn!(target: "F3D", "unknown combiner preset {}, using G_CC_SHADE", name);
        DEFAULT_COMBINER
    })
}

const fn pad32(src: &[&'static str]) -> [&'static str; 32] {
    let mut out = ["0"; 32];
    let mut i = 0;
    while i < src.len() {
        out[i] = src[i];
        i += 1;
    }
    out
}

pub static CC_MUX_A: [&str; 32] = pad32(&["COMBINED", "TEXEL0", "TEXEL1", "PRIMITIVE", "SHADE", "ENVIRONMENT", "1", "NOISE"]);
pub static CC_MUX_B: [&str; 32] = pad32(&["COMBINED", "TEXEL0", "TEXEL1", "PRIMITIVE", "SHADE", "ENVIRONMENT", "CENTER", "K4"]);
pub static CC_MUX_C: [&str; 32] = pad32(&[
    "COMBINED", "TEXEL0", "TEXEL1", "PRIMITIVE", "SHADE", "ENVIRONMENT", "SCALE", "COMBINED_ALPHA",
    "TEXEL0_ALPHA", "TEXEL1_ALPHA", "PRIMITIVE_ALPHA", "SHADE_ALPHA", "ENV_ALPHA", "LOD_FRACTION",
    "PRIM_LOD_FRAC", "K5",
]);
pub static CC_MUX_D: [&str; 8] = ["COMBINED", "TEXEL0", "TEXEL1", "PRIMITIVE", "SHADE", "ENVIRONMENT", "1", "0"];
pub static AC_MUX_ABD: [&str; 8] = ["COMBINED", "TEXEL0", "TEXEL1", "PRIMITIVE", "SHADE", "ENVIRONMENT", "1", "0"];
pub static AC_MUX_C: [&str; 8] = ["LOD_FRACTION", "TEXEL0", "TEXEL1", "PRIMITIVE", "SHADE", "ENVIRONMENT", "PRIM_LOD_FRAC", "0"];

/// Maps a mux index to the symbol for combiner slot `slot` (0..8, alpha slots are 4..8).
pub fn combiner_slot_symbol(slot: usize, index: u32) -> &'static str {
    let i = index as usize;
    let table: &[&'static str] = match slot {
        0 => &CC_MUX_A,
        1 => &CC_MUX_B,
        2 => &CC_MUX_C,
        3 => &CC_MUX_D,
        6 => &AC_MUX_C,
        _ => &AC_MUX_ABD,
    };
    table.get(i).copied().unwrap_or("0")
}

/// `G_CCMUX_*` values.
pub fn ccmux_index(token: &str) -> Option<u32> {
    Some(match token {
        "COMBINED"        => 0,
        "TEXEL0"          => 1,
        "TEXEL1"          => 2,
        "PRIMITIVE"       => 3,
        "SHADE"           => 4,
        "ENVIRONMENT"     => 5,
        "CENTER" | "SCALE" | "1" => 6,
        "COMBINED_ALPHA" | "NOISE" | "K4" => 7,
        "TEXEL0_ALPHA"    => 8,
        "TEXEL1_ALPHA"    => 9,
        "PRIMITIVE_ALPHA" => 10,
        "SHADE_ALPHA"     => 11,
        "ENV_ALPHA"       => 12,
        "LOD_FRACTION"    => 13,
        "PRIM_LOD_FRAC"   => 14,
        "K5"              => 15,
        "0"               => 31,
        _ => return None,
    })
}

/// `G_ACMUX_*` values.
pub fn acmux_index(token: &str) -> Option<u32> {
    Some(match token {
        "COMBINED" | "LOD_FRACTION" => 0,
        "TEXEL0"      => 1,
        "TEXEL1"      => 2,
        "PRIMITIVE"   => 3,
        "SHADE"       => 4,
        "ENVIRONMENT" => 5,
        "PRIM_LOD_FRAC" | "1" => 6,
        "0"           => 7,
        _ => return None,
    })
}

// ---------------------------------------------------------------------------
// Image formats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileFormat {
    #[default]
    Rgba,
    Yuv,
    Ci,
    Ia,
    I,
}

impl TileFormat {
    pub fn from_index(v: u32) -> TileFormat {
        match v {
            1 => TileFormat::Yuv,
            2 => TileFormat::Ci,
            3 => TileFormat::Ia,
            0 => TileFormat::Rgba,
            4 => TileFormat::I,
            _ => {
                warn!(target: "F3D", "invalid image format {}, using RGBA", v);
                TileFormat::Rgba
            },
        }
    }

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            TileFormat::Rgba => "RGBA",
            TileFormat::Yuv  => "YUV",
            TileFormat::Ci   => "CI",
            TileFormat::Ia   => "IA",
            TileFormat::I    => "I",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileSize {
    Bits4,
    Bits8,
    #[default]
    Bits16,
    Bits32,
    Dd,
}

impl TileSize {
    pub fn from_index(v: u32) -> TileSize {
        match v {
            0 => TileSize::Bits4,
            1 => TileSize::Bits8,
            2 => TileSize::Bits16,
            3 => TileSize::Bits32,
            5 => TileSize::Dd,
            _ => {
                warn!(target: "F3D", "invalid image size {}, using 16b", v);
                TileSize::Bits16
            },
        }
    }

    pub fn index(self) -> u32 {
        match self {
            TileSize::Bits4  => 0,
            TileSize::Bits8  => 1,
            TileSize::Bits16 => 2,
            TileSize::Bits32 => 3,
            TileSize::Dd     => 5,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            TileSize::Bits4  => 4,
            TileSize::Bits8  => 8,
            TileSize::Bits16 | TileSize::Dd => 16,
            TileSize::Bits32 => 32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TileSize::Bits4  => "4",
            TileSize::Bits8  => "8",
            TileSize::Bits16 => "16",
            TileSize::Bits32 => "32",
            TileSize::Dd     => "DD",
        }
    }

    /// `G_IM_SIZ_*_LINE_BYTES`
    pub fn line_bytes(self) -> u32 {
        match self {
            TileSize::Bits4  => 0,
            TileSize::Bits8  => 1,
            TileSize::Bits16 | TileSize::Dd => 2,
            TileSize::Bits32 => 2,
        }
    }

    /// `G_IM_SIZ_*_LOAD_BLOCK`
    pub fn load_block(self) -> TileSize {
        match self {
            TileSize::Bits32 => TileSize::Bits32,
            _ => TileSize::Bits16,
        }
    }
}

fn parse_small_int(token: &str) -> Option<u32> {
    let t = token.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        t.parse().ok()
    }
}

pub fn resolve_tile_format(token: &str) -> TileFormat {
    let key = token.strip_prefix("G_IM_FMT_").unwrap_or(token);
    match key {
        "RGBA" => TileFormat::Rgba,
        "YUV"  => TileFormat::Yuv,
        "CI"   => TileFormat::Ci,
        "IA"   => TileFormat::Ia,
        "I"    => TileFormat::I,
        _ => match parse_small_int(key) {
            Some(v) => TileFormat::from_index(v),
            None => {
                debug!(target: "F3D", "unknown image format {}, using RGBA", token);
                TileFormat::Rgba
            }
        },
    }
}

pub fn resolve_tile_size(token: &str) -> TileSize {
    let key = token.strip_prefix("G_IM_SIZ_").unwrap_or(token);
    match key {
        "4b"  => TileSize::Bits4,
        "8b"  => TileSize::Bits8,
        "16b" => TileSize::Bits16,
        "32b" => TileSize::Bits32,
        "DD"  => TileSize::Dd,
        _ => match parse_small_int(key) {
            Some(v) => TileSize::from_index(v),
            None => {
                debug!(target: "F3D", "unknown image size {}, using 16b", token);
                TileSize::Bits16
            }
        },
    }
}

pub const G_TX_RENDERTILE: u32 = 0;
pub const G_TX_LOADTILE  : u32 = 7;
pub const G_TX_MIRROR    : u32 = 0x1;
pub const G_TX_CLAMP     : u32 = 0x2;

/// Returns `(clamp, mirror)` for a `G_TX_*` combination or an integer.
pub fn resolve_clamp_mirror(token: &str) -> (bool, bool) {
    let mut value = 0u32;
    for part in token.split('|') {
        let part = part.trim().trim_matches(|c| c == '(' || c == ')');
        value |= match part {
            "G_TX_NOMIRROR" | "G_TX_WRAP" => 0,
            "G_TX_MIRROR" => G_TX_MIRROR,
            "G_TX_CLAMP"  => G_TX_CLAMP,
            other => parse_small_int(other).unwrap_or_else(|| {
                debug!(target: "F3D", "unknown clamp/mirror token {}", other);
                0
            }) & 3,
        };
    }
    (value & G_TX_CLAMP != 0, value & G_TX_MIRROR != 0)
}

// ---------------------------------------------------------------------------
// Geometry mode
// ---------------------------------------------------------------------------

bitflags! {
    /// Microcode-independent geometry mode. Raw command bits are translated
    /// through [`GeometryMode::from_raw`] since the bit positions move
    /// between microcode families.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GeometryMode: u32 {
        const ZBUFFER            = 1 << 0;
        const TEXTURE_ENABLE     = 1 << 1;
        const SHADE              = 1 << 2;
        const CULL_FRONT         = 1 << 3;
        const CULL_BACK          = 1 << 4;
        const FOG                = 1 << 5;
        const LIGHTING           = 1 << 6;
        const TEXTURE_GEN        = 1 << 7;
        const TEXTURE_GEN_LINEAR = 1 << 8;
        const LOD                = 1 << 9;
        const SHADING_SMOOTH     = 1 << 10;
        const CLIPPING           = 1 << 11;
        const AMBOCCLUSION       = 1 << 12;
        const ATTROFFSET_Z_ENABLE  = 1 << 13;
        const ATTROFFSET_ST_ENABLE = 1 << 14;
        const PACKED_NORMALS     = 1 << 15;
        const LIGHTTOALPHA       = 1 << 16;
        const LIGHTING_SPECULAR  = 1 << 17;
        const FRESNEL_COLOR      = 1 << 18;
        const FRESNEL_ALPHA      = 1 << 19;
    }
}

const fn gate(on: bool, bits: u32) -> u32 {
    if on { bits } else { 0 }
}

type GeoBits = [(GeometryMode, &'static str, u32); 20];

const fn geometry_bits(ucode: Ucode) -> GeoBits {
    let ex2 = matches!(ucode, Ucode::F3dex2 | Ucode::F3dex3);
    let ex3 = matches!(ucode, Ucode::F3dex3);
    let clipping = if matches!(ucode, Ucode::F3d) { 0 } else { 0x0080_0000 };
    [
        (GeometryMode::ZBUFFER,            "G_ZBUFFER",            0x0000_0001),
        (GeometryMode::TEXTURE_ENABLE,     "G_TEXTURE_ENABLE",     if ex2 { 0 } else { 0x0000_0002 }),
        (GeometryMode::SHADE,              "G_SHADE",              0x0000_0004),
        (GeometryMode::CULL_FRONT,         "G_CULL_FRONT",         if ex2 { 0x0000_0200 } else { 0x0000_1000 }),
        (GeometryMode::CULL_BACK,          "G_CULL_BACK",          if ex2 { 0x0000_0400 } else { 0x0000_2000 }),
        (GeometryMode::FOG,                "G_FOG",                0x0001_0000),
        (GeometryMode::LIGHTING,           "G_LIGHTING",           0x0002_0000),
        (GeometryMode::TEXTURE_GEN,        "G_TEXTURE_GEN",        0x0004_0000),
        (GeometryMode::TEXTURE_GEN_LINEAR, "G_TEXTURE_GEN_LINEAR", 0x0008_0000),
        (GeometryMode::LOD,                "G_LOD",                0x0010_0000),
        (GeometryMode::SHADING_SMOOTH,     "G_SHADING_SMOOTH",     if ex2 { 0x0020_0000 } else { 0x0000_0200 }),
        (GeometryMode::CLIPPING,           "G_CLIPPING",           clipping),
        (GeometryMode::AMBOCCLUSION,       "G_AMBOCCLUSION",       gate(ex3, 0x0000_0040)),
        (GeometryMode::ATTROFFSET_Z_ENABLE,  "G_ATTROFFSET_Z_ENABLE",  gate(ex3, 0x0000_0080)),
        (GeometryMode::ATTROFFSET_ST_ENABLE, "G_ATTROFFSET_ST_ENABLE", gate(ex3, 0x0000_0100)),
        (GeometryMode::PACKED_NORMALS,     "G_PACKED_NORMALS",     gate(ex3, 0x0000_0800)),
        (GeometryMode::LIGHTTOALPHA,       "G_LIGHTTOALPHA",       gate(ex3, 0x0000_1000)),
        (GeometryMode::LIGHTING_SPECULAR,  "G_LIGHTING_SPECULAR",  gate(ex3, 0x0000_2000)),
        (GeometryMode::FRESNEL_COLOR,      "G_FRESNEL_COLOR",      gate(ex3, 0x0000_4000)),
        (GeometryMode::FRESNEL_ALPHA,      "G_FRESNEL_ALPHA",      gate(ex3, 0x0000_8000)),
    ]
}

static GEO_F3D   : GeoBits = geometry_bits(Ucode::F3d);
static GEO_F3DEX : GeoBits = geometry_bits(Ucode::F3dex);
static GEO_F3DEX2: GeoBits = geometry_bits(Ucode::F3dex2);
static GEO_F3DEX3: GeoBits = geometry_bits(Ucode::F3dex3);

fn geometry_table(ucode: Ucode) -> &'static GeoBits {
    match ucode {
        Ucode::F3d    => &GEO_F3D,
        Ucode::F3dex  => &GEO_F3DEX,
        Ucode::F3dex2 => &GEO_F3DEX2,
        Ucode::F3dex3 => &GEO_F3DEX3,
    }
}

impl GeometryMode {
    /// Translates raw command bits for `ucode`. Bits the microcode does not
    /// define are dropped.
    pub fn from_raw(raw: u32, ucode: Ucode) -> GeometryMode {
        geometry_table(ucode)
            .iter()
            .filter(|(_, _, bits)| *bits != 0 && raw & bits == *bits)
            .fold(GeometryMode::empty(), |acc, (flag, _, _)| acc | *flag)
    }

    pub fn to_raw(self, ucode: Ucode) -> u32 {
        geometry_table(ucode)
            .iter()
            .filter(|(flag, _, _)| self.contains(*flag))
            .fold(0, |acc, (_, _, bits)| acc | bits)
    }
}

fn normalize_geo_name(name: &str) -> String {
    let upper = name.trim().to_ascii_uppercase();
    let stripped = upper.strip_prefix("G_").unwrap_or(&upper);
    stripped.chars().filter(|c| *c != '_').collect()
}

/// Raw bits of a geometry-mode flag for `ucode`. Accepts `G_TEXTURE_GEN`,
/// `texture_gen` and `textureGen` alike. Unknown names give 0.
pub fn resolve_geometry_mode_flag(name: &str, ucode: Ucode) -> u32 {
    let key = normalize_geo_name(name);
    if key == "CULLBOTH" {
        return resolve_geometry_mode_flag("G_CULL_FRONT", ucode) | resolve_geometry_mode_flag("G_CULL_BACK", ucode);
    }
    geometry_table(ucode)
        .iter()
        .find(|(_, n, _)| normalize_geo_name(n) == key)
        .map(|(_, _, bits)| *bits)
        .unwrap_or(0)
}

/// Name of the single geometry-mode flag with raw bits `mask`.
pub fn geometry_mode_flag_name(mask: u32, ucode: Ucode) -> Option<&'static str> {
    geometry_table(ucode)
        .iter()
        .find(|(_, _, bits)| *bits != 0 && *bits == mask)
        .map(|(_, n, _)| *n)
}

// ---------------------------------------------------------------------------
// Other modes
// ---------------------------------------------------------------------------

pub const G_MDSFT_ALPHACOMPARE: u32 = 0;
pub const G_MDSFT_ZSRCSEL     : u32 = 2;
pub const G_MDSFT_RENDERMODE  : u32 = 3;
pub const G_MDSFT_BLENDER     : u32 = 16;

pub const G_MDSFT_ALPHADITHER : u32 = 4;
pub const G_MDSFT_RGBDITHER   : u32 = 6;
pub const G_MDSFT_COMBKEY     : u32 = 8;
pub const G_MDSFT_TEXTCONV    : u32 = 9;
pub const G_MDSFT_TEXTFILT    : u32 = 12;
pub const G_MDSFT_TEXTLUT     : u32 = 14;
pub const G_MDSFT_TEXTLOD     : u32 = 16;
pub const G_MDSFT_TEXTDETAIL  : u32 = 17;
pub const G_MDSFT_TEXTPERSP   : u32 = 19;
pub const G_MDSFT_CYCLETYPE   : u32 = 20;
pub const G_MDSFT_COLORDITHER : u32 = 22;
pub const G_MDSFT_PIPELINE    : u32 = 23;

pub const G_TT_NONE  : u32 = 0;
pub const G_TT_RGBA16: u32 = 2 << G_MDSFT_TEXTLUT;
pub const G_TT_IA16  : u32 = 3 << G_MDSFT_TEXTLUT;

/// An other-mode field: its shift and the symbol for each value.
#[derive(Debug)]
pub struct OtherModeField {
    pub name: &'static str,
    pub shift: u32,
    pub values: &'static [&'static str],
}

impl OtherModeField {
    pub fn mask(&self) -> u32 {
        (self.values.len() as u32).next_power_of_two() - 1
    }

    pub fn decode(&self, flags: u32) -> &'static str {
        let i = ((flags >> self.shift) & self.mask()) as usize;
        self.values.get(i).copied().unwrap_or(self.values[0])
    }
}

pub static OTHER_MODE_H: &[OtherModeField] = &[
    OtherModeField { name: "G_MDSFT_ALPHADITHER", shift: G_MDSFT_ALPHADITHER, values: &["G_AD_PATTERN", "G_AD_NOTPATTERN", "G_AD_NOISE", "G_AD_DISABLE"] },
    OtherModeField { name: "G_MDSFT_RGBDITHER",   shift: G_MDSFT_RGBDITHER,   values: &["G_CD_MAGICSQ", "G_CD_BAYER", "G_CD_NOISE", "G_CD_DISABLE"] },
    OtherModeField { name: "G_MDSFT_COMBKEY",     shift: G_MDSFT_COMBKEY,     values: &["G_CK_NONE", "G_CK_KEY"] },
    OtherModeField { name: "G_MDSFT_TEXTCONV",    shift: G_MDSFT_TEXTCONV,    values: &["G_TC_CONV", "G_TC_CONV", "G_TC_CONV", "G_TC_CONV", "G_TC_CONV", "G_TC_FILTCONV", "G_TC_FILT"] },
    OtherModeField { name: "G_MDSFT_TEXTFILT",    shift: G_MDSFT_TEXTFILT,    values: &["G_TF_POINT", "G_TF_POINT", "G_TF_BILERP", "G_TF_AVERAGE"] },
    OtherModeField { name: "G_MDSFT_TEXTLUT",     shift: G_MDSFT_TEXTLUT,     values: &["G_TT_NONE", "G_TT_NONE", "G_TT_RGBA16", "G_TT_IA16"] },
    OtherModeField { name: "G_MDSFT_TEXTLOD",     shift: G_MDSFT_TEXTLOD,     values: &["G_TL_TILE", "G_TL_LOD"] },
    OtherModeField { name: "G_MDSFT_TEXTDETAIL",  shift: G_MDSFT_TEXTDETAIL,  values: &["G_TD_CLAMP", "G_TD_SHARPEN", "G_TD_DETAIL"] },
    OtherModeField { name: "G_MDSFT_TEXTPERSP",   shift: G_MDSFT_TEXTPERSP,   values: &["G_TP_NONE", "G_TP_PERSP"] },
    OtherModeField { name: "G_MDSFT_CYCLETYPE",   shift: G_MDSFT_CYCLETYPE,   values: &["G_CYC_1CYCLE", "G_CYC_2CYCLE", "G_CYC_COPY", "G_CYC_FILL"] },
    OtherModeField { name: "G_MDSFT_COLORDITHER", shift: G_MDSFT_COLORDITHER, values: &["G_CD_DISABLE", "G_CD_ENABLE"] },
    OtherModeField { name: "G_MDSFT_PIPELINE",    shift: G_MDSFT_PIPELINE,    values: &["G_PM_NPRIMITIVE", "G_PM_1PRIMITIVE"] },
];

pub static OTHER_MODE_L: &[OtherModeField] = &[
    OtherModeField { name: "G_MDSFT_ALPHACOMPARE", shift: G_MDSFT_ALPHACOMPARE, values: &["G_AC_NONE", "G_AC_THRESHOLD", "G_AC_THRESHOLD", "G_AC_DITHER"] },
    OtherModeField { name: "G_MDSFT_ZSRCSEL",      shift: G_MDSFT_ZSRCSEL,      values: &["G_ZS_PIXEL", "G_ZS_PRIM"] },
];

pub fn other_mode_field(shift: u32, high: bool) -> Option<&'static OtherModeField> {
    let table = if high { OTHER_MODE_H } else { OTHER_MODE_L };
    table.iter().find(|f| f.shift == shift)
}

/// Value of an other-mode symbol such as `G_CYC_2CYCLE`, already shifted.
fn other_mode_value(name: &str) -> Option<u32> {
    OTHER_MODE_H
        .iter()
        .chain(OTHER_MODE_L.iter())
        .find_map(|f| f.values.iter().position(|v| *v == name).map(|i| (i as u32) << f.shift))
}

// ---------------------------------------------------------------------------
// Render mode
// ---------------------------------------------------------------------------

pub const AA_EN        : u32 = 0x8;
pub const Z_CMP        : u32 = 0x10;
pub const Z_UPD        : u32 = 0x20;
pub const IM_RD        : u32 = 0x40;
pub const CLR_ON_CVG   : u32 = 0x80;
pub const CVG_DST_CLAMP: u32 = 0;
pub const CVG_DST_WRAP : u32 = 0x100;
pub const CVG_DST_FULL : u32 = 0x200;
pub const CVG_DST_SAVE : u32 = 0x300;
pub const ZMODE_OPA    : u32 = 0;
pub const ZMODE_INTER  : u32 = 0x400;
pub const ZMODE_XLU    : u32 = 0x800;
pub const ZMODE_DEC    : u32 = 0xC00;
pub const CVG_X_ALPHA  : u32 = 0x1000;
pub const ALPHA_CVG_SEL: u32 = 0x2000;
pub const FORCE_BL     : u32 = 0x4000;
pub const TEX_EDGE     : u32 = 0;

pub const G_BL_CLR_IN : u32 = 0;
pub const G_BL_CLR_MEM: u32 = 1;
pub const G_BL_CLR_BL : u32 = 2;
pub const G_BL_CLR_FOG: u32 = 3;
pub const G_BL_1MA    : u32 = 0;
pub const G_BL_A_MEM  : u32 = 1;
pub const G_BL_A_IN   : u32 = 0;
pub const G_BL_A_FOG  : u32 = 1;
pub const G_BL_A_SHADE: u32 = 2;
pub const G_BL_1      : u32 = 2;
pub const G_BL_0      : u32 = 3;

const G_AC_DITHER: u32 = 3;

pub const fn gbl_c1(p: u32, a: u32, m: u32, b: u32) -> u32 {
    (p << 30) | (a << 26) | (m << 22) | (b << 18)
}

pub const fn gbl_c2(p: u32, a: u32, m: u32, b: u32) -> u32 {
    (p << 28) | (a << 24) | (m << 20) | (b << 16)
}

/// A `G_RM_*` preset: non-blender flags plus the blender inputs for one cycle.
#[derive(Debug)]
pub struct RenderModePreset {
    pub name: &'static str,
    pub flags: u32,
    pub blend: [u32; 4],
    /// Only the cycle-1 blender is defined (`G_RM_FOG_SHADE_A` and friends).
    pub blend_only: bool,
}

impl RenderModePreset {
    pub fn value(&self, cycle: u32) -> u32 {
        let [p, a, m, b] = self.blend;
        if cycle == 2 { self.flags | gbl_c2(p, a, m, b) } else { self.flags | gbl_c1(p, a, m, b) }
    }
}

macro_rules! rm {
    ($name:literal, $flags:expr, [$p:ident, $a:ident, $m:ident, $b:ident]) => {
        RenderModePreset { name: $name, flags: $flags, blend: [$p, $a, $m, $b], blend_only: false }
    };
    (blend $name:literal, [$p:ident, $a:ident, $m:ident, $b:ident]) => {
        RenderModePreset { name: $name, flags: 0, blend: [$p, $a, $m, $b], blend_only: true }
    };
}

const IN: u32 = G_BL_CLR_IN;
const MEM: u32 = G_BL_CLR_MEM;
const BL: u32 = G_BL_CLR_BL;
const FOG: u32 = G_BL_CLR_FOG;
const A_IN: u32 = G_BL_A_IN;
const A_FOG: u32 = G_BL_A_FOG;
const A_SHADE: u32 = G_BL_A_SHADE;
const A_MEM: u32 = G_BL_A_MEM;
const MA1: u32 = G_BL_1MA;
const ONE: u32 = G_BL_1;
const ZERO: u32 = G_BL_0;
const ACS: u32 = ALPHA_CVG_SEL;
const CXA: u32 = CVG_X_ALPHA;
const FBL: u32 = FORCE_BL;
const COC: u32 = CLR_ON_CVG;

pub static RENDER_MODE_PRESETS: &[RenderModePreset] = &[
    rm!("AA_ZB_OPA_SURF",  AA_EN | Z_CMP | Z_UPD | IM_RD | CVG_DST_CLAMP | ZMODE_OPA | ACS, [IN, A_IN, MEM, A_MEM]),
    rm!("RA_ZB_OPA_SURF",  AA_EN | Z_CMP | Z_UPD | CVG_DST_CLAMP | ZMODE_OPA | ACS, [IN, A_IN, MEM, A_MEM]),
    rm!("AA_ZB_XLU_SURF",  AA_EN | Z_CMP | IM_RD | CVG_DST_WRAP | COC | FBL | ZMODE_XLU, [IN, A_IN, MEM, MA1]),
    rm!("AA_ZB_OPA_DECAL", AA_EN | Z_CMP | IM_RD | CVG_DST_WRAP | ACS | ZMODE_DEC, [IN, A_IN, MEM, A_MEM]),
    rm!("RA_ZB_OPA_DECAL", AA_EN | Z_CMP | CVG_DST_WRAP | ACS | ZMODE_DEC, [IN, A_IN, MEM, A_MEM]),
    rm!("AA_ZB_XLU_DECAL", AA_EN | Z_CMP | IM_RD | CVG_DST_WRAP | COC | FBL | ZMODE_DEC, [IN, A_IN, MEM, MA1]),
    rm!("AA_ZB_OPA_INTER", AA_EN | Z_CMP | Z_UPD | IM_RD | CVG_DST_CLAMP | ACS | ZMODE_INTER, [IN, A_IN, MEM, A_MEM]),
    rm!("RA_ZB_OPA_INTER", AA_EN | Z_CMP | Z_UPD | CVG_DST_CLAMP | ACS | ZMODE_INTER, [IN, A_IN, MEM, A_MEM]),
    rm!("AA_ZB_XLU_INTER", AA_EN | Z_CMP | IM_RD | CVG_DST_WRAP | COC | FBL | ZMODE_INTER, [IN, A_IN, MEM, MA1]),
    rm!("AA_ZB_XLU_LINE",  AA_EN | Z_CMP | IM_RD | CVG_DST_CLAMP | CXA | ACS | FBL | ZMODE_XLU, [IN, A_IN, MEM, MA1]),
    rm!("AA_ZB_DEC_LINE",  AA_EN | Z_CMP | IM_RD | CVG_DST_SAVE | CXA | ACS | FBL | ZMODE_DEC, [IN, A_IN, MEM, MA1]),
    rm!("AA_ZB_TEX_EDGE",  AA_EN | Z_CMP | Z_UPD | IM_RD | CVG_DST_CLAMP | CXA | ACS | ZMODE_OPA | TEX_EDGE, [IN, A_IN, MEM, A_MEM]),
    rm!("AA_ZB_TEX_INTER", AA_EN | Z_CMP | Z_UPD | IM_RD | CVG_DST_CLAMP | CXA | ACS | ZMODE_INTER | TEX_EDGE, [IN, A_IN, MEM, A_MEM]),
    rm!("AA_ZB_SUB_SURF",  AA_EN | Z_CMP | Z_UPD | IM_RD | CVG_DST_FULL | ZMODE_OPA | ACS, [IN, A_IN, MEM, A_MEM]),
    rm!("AA_ZB_PCL_SURF",  AA_EN | Z_CMP | Z_UPD | IM_RD | CVG_DST_CLAMP | ZMODE_OPA | G_AC_DITHER, [IN, A_IN, MEM, MA1]),
    rm!("AA_ZB_OPA_TERR",  AA_EN | Z_CMP | Z_UPD | IM_RD | CVG_DST_CLAMP | ZMODE_OPA | ACS, [IN, A_IN, MEM, MA1]),
    rm!("AA_ZB_TEX_TERR",  AA_EN | Z_CMP | Z_UPD | IM_RD | CVG_DST_CLAMP | CXA | ACS | ZMODE_OPA | TEX_EDGE, [IN, A_IN, MEM, MA1]),
    rm!("AA_ZB_SUB_TERR",  AA_EN | Z_CMP | Z_UPD | IM_RD | CVG_DST_FULL | ZMODE_OPA | ACS, [IN, A_IN, MEM, MA1]),
    rm!("AA_OPA_SURF",     AA_EN | IM_RD | CVG_DST_CLAMP | ZMODE_OPA | ACS, [IN, A_IN, MEM, A_MEM]),
    rm!("RA_OPA_SURF",     AA_EN | CVG_DST_CLAMP | ZMODE_OPA | ACS, [IN, A_IN, MEM, A_MEM]),
    rm!("AA_XLU_SURF",     AA_EN | IM_RD | CVG_DST_WRAP | COC | FBL | ZMODE_OPA, [IN, A_IN, MEM, MA1]),
    rm!("AA_XLU_LINE",     AA_EN | IM_RD | CVG_DST_CLAMP | CXA | ACS | FBL | ZMODE_OPA, [IN, A_IN, MEM, MA1]),
    rm!("AA_DEC_LINE",     AA_EN | IM_RD | CVG_DST_FULL | CXA | ACS | FBL | ZMODE_OPA, [IN, A_IN, MEM, MA1]),
    rm!("AA_TEX_EDGE",     AA_EN | IM_RD | CVG_DST_CLAMP | CXA | ACS | ZMODE_OPA | TEX_EDGE, [IN, A_IN, MEM, A_MEM]),
    rm!("AA_SUB_SURF",     AA_EN | IM_RD | CVG_DST_FULL | ZMODE_OPA | ACS, [IN, A_IN, MEM, A_MEM]),
    rm!("AA_PCL_SURF",     AA_EN | IM_RD | CVG_DST_CLAMP | ZMODE_OPA | G_AC_DITHER, [IN, A_IN, MEM, MA1]),
    rm!("AA_OPA_TERR",     AA_EN | IM_RD | CVG_DST_CLAMP | ZMODE_OPA | ACS, [IN, A_IN, MEM, MA1]),
    rm!("AA_TEX_TERR",     AA_EN | IM_RD | CVG_DST_CLAMP | CXA | ACS | ZMODE_OPA | TEX_EDGE, [IN, A_IN, MEM, MA1]),
    rm!("AA_SUB_TERR",     AA_EN | IM_RD | CVG_DST_FULL | ZMODE_OPA | ACS, [IN, A_IN, MEM, MA1]),
    rm!("ZB_OPA_SURF",     Z_CMP | Z_UPD | CVG_DST_FULL | ACS | ZMODE_OPA, [IN, A_IN, MEM, A_MEM]),
    rm!("ZB_XLU_SURF",     Z_CMP | IM_RD | CVG_DST_FULL | FBL | ZMODE_XLU, [IN, A_IN, MEM, MA1]),
    rm!("ZB_OPA_DECAL",    Z_CMP | CVG_DST_FULL | ACS | ZMODE_DEC, [IN, A_IN, MEM, A_MEM]),
    rm!("ZB_XLU_DECAL",    Z_CMP | IM_RD | CVG_DST_FULL | FBL | ZMODE_DEC, [IN, A_IN, MEM, MA1]),
    rm!("ZB_CLD_SURF",     Z_CMP | IM_RD | CVG_DST_SAVE | FBL | ZMODE_XLU, [IN, A_IN, MEM, MA1]),
    rm!("ZB_OVL_SURF",     Z_CMP | IM_RD | CVG_DST_SAVE | FBL | ZMODE_DEC, [IN, A_IN, MEM, MA1]),
    rm!("ZB_PCL_SURF",     Z_CMP | Z_UPD | CVG_DST_FULL | ZMODE_OPA | G_AC_DITHER, [IN, ZERO, IN, ONE]),
    rm!("OPA_SURF",        CVG_DST_CLAMP | FBL | ZMODE_OPA, [IN, ZERO, IN, ONE]),
    rm!("XLU_SURF",        IM_RD | CVG_DST_FULL | FBL | ZMODE_OPA, [IN, A_IN, MEM, MA1]),
    rm!("TEX_EDGE",        CVG_DST_CLAMP | CXA | ACS | FBL | ZMODE_OPA | TEX_EDGE | AA_EN, [IN, ZERO, IN, ONE]),
    rm!("CLD_SURF",        IM_RD | CVG_DST_SAVE | FBL | ZMODE_OPA, [IN, A_IN, MEM, MA1]),
    rm!("PCL_SURF",        CVG_DST_FULL | FBL | ZMODE_OPA | G_AC_DITHER, [IN, ZERO, IN, ONE]),
    rm!("ADD",             IM_RD | CVG_DST_SAVE | FBL | ZMODE_OPA, [IN, A_FOG, MEM, ONE]),
    rm!("NOOP",            0, [IN, A_IN, IN, MA1]),
    rm!("VISCVG",          IM_RD | FBL, [IN, ZERO, BL, A_MEM]),
    rm!("OPA_CI",          CVG_DST_CLAMP | ZMODE_OPA, [IN, ZERO, IN, ONE]),
    rm!(blend "FOG_SHADE_A", [FOG, A_SHADE, IN, MA1]),
    rm!(blend "FOG_PRIM_A",  [FOG, A_FOG, IN, MA1]),
    rm!(blend "PASS",        [IN, ZERO, IN, ONE]),
];

/// Value of `G_RM_NAME` (cycle 1) or `G_RM_NAME2` (cycle 2).
pub fn render_mode_value(name: &str) -> Option<u32> {
    let key = name.strip_prefix("G_RM_")?;
    if let Some(p) = RENDER_MODE_PRESETS.iter().find(|p| p.name == key) {
        return Some(p.value(1));
    }
    let base = key.strip_suffix('2')?;
    RENDER_MODE_PRESETS
        .iter()
        .find(|p| p.name == base && !p.blend_only)
        .map(|p| p.value(2))
}

/// Masks `flags` down to what a preset for `cycle` defines.
pub fn render_mode_mask(flags: u32, cycle: u32, blend_only: bool) -> u32 {
    let non_blend = if blend_only { 0 } else { ((1u32 << 13) - 1) << 3 };
    let blend = if cycle == 2 {
        (3 << 28) | (3 << 24) | (3 << 20) | (3 << 16)
    } else {
        (3u32 << 30) | (3 << 26) | (3 << 22) | (3 << 18)
    };
    flags & (non_blend | blend)
}

/// First preset in table order whose masked value matches `flags` for `cycle`.
/// Returns the full `G_RM_*` name.
pub fn find_render_mode_preset(flags: u32, cycle: u32) -> Option<String> {
    RENDER_MODE_PRESETS
        .iter()
        .filter(|p| cycle == 1 || !p.blend_only)
        .find(|p| {
            render_mode_mask(p.value(cycle), cycle, p.blend_only) == render_mode_mask(flags, cycle, p.blend_only)
        })
        .map(|p| if cycle == 2 { format!("G_RM_{}2", p.name) } else { format!("G_RM_{}", p.name) })
}

pub static BLEND_COLOR: [&str; 4] = ["G_BL_CLR_IN", "G_BL_CLR_MEM", "G_BL_CLR_BL", "G_BL_CLR_FOG"];
pub static BLEND_ALPHA: [&str; 4] = ["G_BL_A_IN", "G_BL_A_FOG", "G_BL_A_SHADE", "G_BL_0"];
pub static BLEND_MIX  : [&str; 4] = ["G_BL_1MA", "G_BL_A_MEM", "G_BL_1", "G_BL_0"];
pub static CVG_DST    : [&str; 4] = ["CVG_DST_CLAMP", "CVG_DST_WRAP", "CVG_DST_FULL", "CVG_DST_SAVE"];
pub static ZMODE      : [&str; 4] = ["ZMODE_OPA", "ZMODE_INTER", "ZMODE_XLU", "ZMODE_DEC"];

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

fn image_symbol(name: &str) -> Option<i64> {
    let rest = name.strip_prefix("G_IM_")?;
    if let Some(fmt) = rest.strip_prefix("FMT_") {
        return match fmt {
            "RGBA" | "YUV" | "CI" | "IA" | "I" => Some(resolve_tile_format(fmt).index() as i64),
            _ => None,
        };
    }
    let rest = rest.strip_prefix("SIZ_")?;
    let (siz, suffix) = match rest.find('_') {
        Some(i) => (&rest[..i], &rest[i + 1..]),
        None => (rest, ""),
    };
    let size = match siz {
        "4b" | "8b" | "16b" | "32b" | "DD" => resolve_tile_size(siz),
        _ => return None,
    };
    let bytes = match size {
        TileSize::Bits4 => 0,
        TileSize::Bits8 => 1,
        TileSize::Bits16 | TileSize::Dd => 2,
        TileSize::Bits32 => 4,
    };
    Some(match suffix {
        "" => size.index() as i64,
        "BYTES" => bytes,
        "TILE_BYTES" | "LINE_BYTES" => size.line_bytes() as i64,
        "LOAD_BLOCK" => size.load_block().index() as i64,
        "SHIFT" => match size { TileSize::Bits4 => 2, TileSize::Bits8 => 1, _ => 0 },
        "INCR" => match size { TileSize::Bits4 => 3, TileSize::Bits8 => 1, _ => 0 },
        _ => return None,
    })
}

fn trailing_number(name: &str, prefix: &str) -> Option<i64> {
    name.strip_prefix(prefix)?.parse().ok()
}

/// Symbol table for the expression evaluator.
pub fn resolve_symbol(name: &str, ucode: Ucode) -> Option<i64> {
    let ex2 = ucode.is_ex2_family();
    let fixed: Option<u32> = match name {
        "G_ON" | "TRUE" => Some(1),
        "G_OFF" | "FALSE" | "NULL" => Some(0),
        "G_TX_LOADTILE" => Some(G_TX_LOADTILE),
        "G_TX_RENDERTILE" => Some(G_TX_RENDERTILE),
        "G_TX_NOMIRROR" | "G_TX_WRAP" | "G_TX_NOMASK" | "G_TX_NOLOD" => Some(0),
        "G_TX_MIRROR" => Some(G_TX_MIRROR),
        "G_TX_CLAMP" => Some(G_TX_CLAMP),
        "G_TEXTURE_IMAGE_FRAC" => Some(2),
        "G_MDSFT_ALPHACOMPARE" => Some(G_MDSFT_ALPHACOMPARE),
        "G_MDSFT_ZSRCSEL" => Some(G_MDSFT_ZSRCSEL),
        "G_MDSFT_RENDERMODE" => Some(G_MDSFT_RENDERMODE),
        "G_MDSFT_BLENDER" => Some(G_MDSFT_BLENDER),
        "G_MDSFT_ALPHADITHER" => Some(G_MDSFT_ALPHADITHER),
        "G_MDSFT_RGBDITHER" => Some(G_MDSFT_RGBDITHER),
        "G_MDSFT_COMBKEY" => Some(G_MDSFT_COMBKEY),
        "G_MDSFT_TEXTCONV" => Some(G_MDSFT_TEXTCONV),
        "G_MDSFT_TEXTFILT" => Some(G_MDSFT_TEXTFILT),
        "G_MDSFT_TEXTLUT" => Some(G_MDSFT_TEXTLUT),
        "G_MDSFT_TEXTLOD" => Some(G_MDSFT_TEXTLOD),
        "G_MDSFT_TEXTDETAIL" => Some(G_MDSFT_TEXTDETAIL),
        "G_MDSFT_TEXTPERSP" => Some(G_MDSFT_TEXTPERSP),
        "G_MDSFT_CYCLETYPE" => Some(G_MDSFT_CYCLETYPE),
        "G_MDSFT_COLORDITHER" => Some(G_MDSFT_COLORDITHER),
        "G_MDSFT_PIPELINE" => Some(G_MDSFT_PIPELINE),
        "AA_EN" => Some(AA_EN),
        "Z_CMP" => Some(Z_CMP),
        "Z_UPD" => Some(Z_UPD),
        "IM_RD" => Some(IM_RD),
        "CLR_ON_CVG" => Some(CLR_ON_CVG),
        "CVG_DST_CLAMP" => Some(CVG_DST_CLAMP),
        "CVG_DST_WRAP" => Some(CVG_DST_WRAP),
        "CVG_DST_FULL" => Some(CVG_DST_FULL),
        "CVG_DST_SAVE" => Some(CVG_DST_SAVE),
        "ZMODE_OPA" => Some(ZMODE_OPA),
        "ZMODE_INTER" => Some(ZMODE_INTER),
        "ZMODE_XLU" => Some(ZMODE_XLU),
        "ZMODE_DEC" => Some(ZMODE_DEC),
        "CVG_X_ALPHA" => Some(CVG_X_ALPHA),
        "ALPHA_CVG_SEL" => Some(ALPHA_CVG_SEL),
        "FORCE_BL" => Some(FORCE_BL),
        "TEX_EDGE" => Some(TEX_EDGE),
        "G_BL_CLR_IN" => Some(G_BL_CLR_IN),
        "G_BL_CLR_MEM" => Some(G_BL_CLR_MEM),
        "G_BL_CLR_BL" => Some(G_BL_CLR_BL),
        "G_BL_CLR_FOG" => Some(G_BL_CLR_FOG),
        "G_BL_1MA" => Some(G_BL_1MA),
        "G_BL_A_MEM" => Some(G_BL_A_MEM),
        "G_BL_A_IN" => Some(G_BL_A_IN),
        "G_BL_A_FOG" => Some(G_BL_A_FOG),
        "G_BL_A_SHADE" => Some(G_BL_A_SHADE),
        "G_BL_1" => Some(G_BL_1),
        "G_BL_0" => Some(G_BL_0),
        "G_SETOTHERMODE_H" => Some(ucode.setothermode_h() as u32),
        "G_SETOTHERMODE_L" => Some(ucode.setothermode_l() as u32),
        "G_MTX_MODELVIEW" | "G_MTX_MUL" | "G_MTX_NOPUSH" => Some(0),
        "G_MTX_LOAD" => Some(0x02),
        "G_MTX_PROJECTION" => Some(if ex2 { 0x04 } else { 0x01 }),
        "G_MTX_PUSH" => Some(if ex2 { 0x01 } else { 0x04 }),
        _ => None,
    };
    if let Some(v) = fixed {
        return Some(v as i64);
    }

    if name.starts_with("G_IM_") {
        return image_symbol(name);
    }
    if let Some(token) = name.strip_prefix("G_CCMUX_") {
        return ccmux_index(token).map(i64::from);
    }
    if let Some(token) = name.strip_prefix("G_ACMUX_") {
        return acmux_index(token).map(i64::from);
    }
    if name.starts_with("G_RM_") {
        return render_mode_value(name).map(i64::from);
    }
    if let Some(n) = trailing_number(name, "LIGHT_") {
        return Some(n);
    }
    if let Some(n) = trailing_number(name, "NUMLIGHTS_") {
        return Some(n);
    }
    if let Some(v) = other_mode_value(name) {
        return Some(v as i64);
    }
    if name.starts_with("G_") {
        let bits = resolve_geometry_mode_flag(name, ucode);
        let known = normalize_geo_name(name) == "CULLBOTH"
            || geometry_table(ucode).iter().any(|(_, n, _)| *n == name);
        if known {
            return Some(bits as i64);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_has_eight_slots() {
        for name in combiner_preset_names() {
            let cc = resolve_combiner_preset(name);
            assert_eq!(cc.len(), 8);
            if cc[3] == "0" && cc[7] == "0" {
                let color_empty = cc[..4].iter().all(|s| *s == "0");
                let alpha_empty = cc[4..].iter().all(|s| *s == "0");
                assert!(color_empty || alpha_empty, "{} has both D slots 0", name);
            }
        }
    }

    #[test]
    fn unknown_combiner_defaults_to_shade() {
        assert_eq!(resolve_combiner_preset("G_CC_NOT_A_PRESET"), DEFAULT_COMBINER);
        assert_eq!(resolve_combiner_preset("G_CC_MODULATEIA"), resolve_combiner_preset("MODULATEIA"));
    }

    #[test]
    fn tile_tokens() {
        assert_eq!(resolve_tile_format("G_IM_FMT_CI"), TileFormat::Ci);
        assert_eq!(resolve_tile_format("3"), TileFormat::Ia);
        assert_eq!(resolve_tile_format("bogus"), TileFormat::Rgba);
        assert_eq!(resolve_tile_format("G_IM_FMT_YUV"), TileFormat::Yuv);
        assert_eq!(resolve_tile_size("G_IM_SIZ_4b"), TileSize::Bits4);
        assert_eq!(resolve_tile_size("G_IM_SIZ_DD"), TileSize::Dd);
        assert_eq!(resolve_tile_size("nope"), TileSize::Bits16);
        assert_eq!(resolve_tile_size("3"), TileSize::Bits32);
        assert_eq!(resolve_tile_size("5"), TileSize::Dd);
        // only 0-3 and DD are sizes
        assert_eq!(TileSize::from_index(4), TileSize::Bits16);
        assert_eq!(TileSize::from_index(7), TileSize::Bits16);
        assert_eq!(TileFormat::from_index(6), TileFormat::Rgba);
    }

    #[test]
    fn clamp_mirror_combinations() {
        assert_eq!(resolve_clamp_mirror("G_TX_WRAP | G_TX_NOMIRROR"), (false, false));
        assert_eq!(resolve_clamp_mirror("G_TX_CLAMP|G_TX_MIRROR"), (true, true));
        assert_eq!(resolve_clamp_mirror("2"), (true, false));
        assert_eq!(resolve_clamp_mirror("1"), (false, true));
    }

    #[test]
    fn geometry_names_normalize() {
        let expected = resolve_geometry_mode_flag("G_TEXTURE_GEN", Ucode::F3dex2);
        assert_eq!(expected, 0x0004_0000);
        assert_eq!(resolve_geometry_mode_flag("texture_gen", Ucode::F3dex2), expected);
        assert_eq!(resolve_geometry_mode_flag("textureGen", Ucode::F3dex2), expected);
        assert_eq!(geometry_mode_flag_name(expected, Ucode::F3dex2), Some("G_TEXTURE_GEN"));
    }

    #[test]
    fn geometry_bits_depend_on_ucode() {
        assert_eq!(resolve_geometry_mode_flag("G_CULL_BACK", Ucode::F3d), 0x2000);
        assert_eq!(resolve_geometry_mode_flag("G_CULL_BACK", Ucode::F3dex2), 0x0400);
        assert_eq!(resolve_geometry_mode_flag("G_PACKED_NORMALS", Ucode::F3dex2), 0);
        assert_eq!(resolve_geometry_mode_flag("G_PACKED_NORMALS", Ucode::F3dex3), 0x0800);

        let raw = 0x0000_0404 | 0x0002_0000;
        let mode = GeometryMode::from_raw(raw, Ucode::F3dex2);
        assert_eq!(mode, GeometryMode::SHADE | GeometryMode::CULL_BACK | GeometryMode::LIGHTING);
        assert_eq!(mode.to_raw(Ucode::F3dex2), raw);
        assert_eq!(mode.to_raw(Ucode::F3d), 0x0000_2004 | 0x0002_0000);
    }

    #[test]
    fn render_mode_presets_are_recognized() {
        let c1 = render_mode_value("G_RM_AA_ZB_OPA_SURF").unwrap();
        let c2 = render_mode_value("G_RM_AA_ZB_OPA_SURF2").unwrap();
        let flags = c1 | c2;
        assert_eq!(find_render_mode_preset(flags, 1).as_deref(), Some("G_RM_AA_ZB_OPA_SURF"));
        assert_eq!(find_render_mode_preset(flags, 2).as_deref(), Some("G_RM_AA_ZB_OPA_SURF2"));

        let fog = render_mode_value("G_RM_FOG_SHADE_A").unwrap() | render_mode_value("G_RM_AA_ZB_XLU_SURF2").unwrap();
        assert_eq!(find_render_mode_preset(fog, 1).as_deref(), Some("G_RM_FOG_SHADE_A"));
        assert_eq!(find_render_mode_preset(fog, 2).as_deref(), Some("G_RM_AA_ZB_XLU_SURF2"));
        assert_eq!(render_mode_value("G_RM_PASS2"), None);
    }

    #[test]
    fn symbols() {
        assert_eq!(resolve_symbol("G_IM_SIZ_16b_LOAD_BLOCK", Ucode::F3dex2), Some(2));
        assert_eq!(resolve_symbol("G_IM_SIZ_32b_LINE_BYTES", Ucode::F3dex2), Some(2));
        assert_eq!(resolve_symbol("G_IM_SIZ_4b_INCR", Ucode::F3dex2), Some(3));
        assert_eq!(resolve_symbol("G_CYC_2CYCLE", Ucode::F3dex2), Some(1 << 20));
        assert_eq!(resolve_symbol("G_TT_RGBA16", Ucode::F3dex2), Some(G_TT_RGBA16 as i64));
        assert_eq!(resolve_symbol("G_AC_DITHER", Ucode::F3dex2), Some(3));
        assert_eq!(resolve_symbol("G_TF_BILERP", Ucode::F3dex2), Some(2 << 12));
        assert_eq!(resolve_symbol("G_SETOTHERMODE_H", Ucode::F3d), Some(0xBA));
        assert_eq!(resolve_symbol("G_SETOTHERMODE_H", Ucode::F3dex2), Some(0xE3));
        assert_eq!(resolve_symbol("G_MTX_PUSH", Ucode::F3d), Some(4));
        assert_eq!(resolve_symbol("G_CCMUX_TEXEL0", Ucode::F3dex2), Some(1));
        assert_eq!(resolve_symbol("G_ACMUX_0", Ucode::F3dex2), Some(7));
        assert_eq!(resolve_symbol("LIGHT_3", Ucode::F3dex2), Some(3));
        assert_eq!(resolve_symbol("G_SHADE", Ucode::F3dex2), Some(4));
        assert_eq!(resolve_symbol("G_NOT_A_THING", Ucode::F3dex2), None);
    }

    #[test]
    fn mux_tables() {
        assert_eq!(combiner_slot_symbol(2, 13), "LOD_FRACTION");
        assert_eq!(combiner_slot_symbol(0, 31), "0");
        assert_eq!(combiner_slot_symbol(6, 0), "LOD_FRACTION");
        assert_eq!(combiner_slot_symbol(4, 7), "0");
        assert_eq!(combiner_slot_symbol(3, 7), "0");
    }
}
