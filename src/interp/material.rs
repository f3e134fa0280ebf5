//! The material accumulator: every RDP/RSP register that ends up in a
//! frozen material.

use std::hash::{Hash, Hasher};

#[allow(unused_imports)]
use tracing::{trace, debug, error, info, warn};

use crate::gbi::{self, GeometryMode, OTHER_MODE_H, OTHER_MODE_L};
use crate::interp::light::Light;

/// Fixed-size float array compared and hashed by bit pattern, so states
/// containing colors can key the material cache.
#[derive(Debug, Clone, Copy)]
pub struct Floats<const N: usize>(pub [f32; N]);

impl<const N: usize> Default for Floats<N> {
    fn default() -> Self {
        Floats([0.0; N])
    }
}

impl<const N: usize> PartialEq for Floats<N> {
    fn eq(&self, other: &Self) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl<const N: usize> Eq for Floats<N> {}

impl<const N: usize> Hash for Floats<N> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for v in self.0.iter() {
            v.to_bits().hash(state);
        }
    }
}

impl<const N: usize> From<[f32; N]> for Floats<N> {
    fn from(v: [f32; N]) -> Self {
        Floats(v)
    }
}

/// One texture axis. `low`/`high` are in quarter texels (10.2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TileAxis {
    pub clamp: bool,
    pub mirror: bool,
    pub mask: u32,
    pub shift: u32,
    pub low: i64,
    pub high: i64,
}

impl TileAxis {
    pub fn low_texels(&self) -> f32 {
        self.low as f32 / 4.0
    }

    pub fn high_texels(&self) -> f32 {
        self.high as f32 / 4.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureSlot {
    /// Cached decoded image, by texture name.
    pub image: Option<String>,
    /// Named placeholder used when pixel data is unavailable.
    pub reference: Option<String>,
    pub reference_size: [u32; 2],
    pub pal_reference: Option<(String, u32)>,
    pub format: String,
    pub ci_format: &'static str,
    pub set: bool,
    pub s: TileAxis,
    pub t: TileAxis,
}

impl Default for TextureSlot {
    fn default() -> Self {
        Self {
            image: None,
            reference: None,
            reference_size: [32, 32],
            pal_reference: None,
            format: "RGBA16".to_string(),
            ci_format: "RGBA16",
            set: false,
            s: TileAxis::default(),
            t: TileAxis::default(),
        }
    }
}

impl TextureSlot {
    pub fn is_ci(&self) -> bool {
        self.format.starts_with("CI")
    }

    /// Drops the palette interpretation: CI4 becomes I4, CI8 becomes I8.
    pub fn downgrade_ci(&mut self) {
        if self.is_ci() {
            self.format.remove(0);
        }
    }
}

/// Decoded render-mode word.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderModeFlags {
    pub aa_en: bool,
    pub z_cmp: bool,
    pub z_upd: bool,
    pub im_rd: bool,
    pub clr_on_cvg: bool,
    pub cvg_dst: &'static str,
    pub zmode: &'static str,
    pub cvg_x_alpha: bool,
    pub alpha_cvg_sel: bool,
    pub force_bl: bool,
    /// P, A, M, B blender inputs per cycle.
    pub blend1: [&'static str; 4],
    pub blend2: [&'static str; 4],
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderMode {
    /// Preset names for both cycles, when the word matches known presets.
    pub preset: Option<(String, String)>,
    pub flags: RenderModeFlags,
}

impl RenderMode {
    pub fn from_flags(flags: u32) -> RenderMode {
        let c1 = gbi::render_mode_mask(flags, 1, false);
        let c2 = gbi::render_mode_mask(flags, 2, false);

        let preset = match (gbi::find_render_mode_preset(flags, 1), gbi::find_render_mode_preset(flags, 2)) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        };

        let dict = |table: &[&'static str; 4], shift: u32| table[((c1 >> shift) & 3) as usize];
        let dict2 = |table: &[&'static str; 4], shift: u32| table[((c2 >> shift) & 3) as usize];

        RenderMode {
            preset,
            flags: RenderModeFlags {
                aa_en        : c1 & gbi::AA_EN != 0,
                z_cmp        : c1 & gbi::Z_CMP != 0,
                z_upd        : c1 & gbi::Z_UPD != 0,
                im_rd        : c1 & gbi::IM_RD != 0,
                clr_on_cvg   : c1 & gbi::CLR_ON_CVG != 0,
                cvg_dst      : gbi::CVG_DST[((c1 & gbi::CVG_DST_SAVE) >> 8) as usize],
                zmode        : gbi::ZMODE[((c1 & gbi::ZMODE_DEC) >> 10) as usize],
                cvg_x_alpha  : c1 & gbi::CVG_X_ALPHA != 0,
                alpha_cvg_sel: c1 & gbi::ALPHA_CVG_SEL != 0,
                force_bl     : c1 & gbi::FORCE_BL != 0,
                blend1: [dict(&gbi::BLEND_COLOR, 30), dict(&gbi::BLEND_ALPHA, 26), dict(&gbi::BLEND_COLOR, 22), dict(&gbi::BLEND_MIX, 18)],
                blend2: [dict2(&gbi::BLEND_COLOR, 28), dict2(&gbi::BLEND_ALPHA, 24), dict2(&gbi::BLEND_COLOR, 20), dict2(&gbi::BLEND_MIX, 16)],
            },
        }
    }

    pub fn is_advanced(&self) -> bool {
        self.preset.is_none()
    }
}

impl Default for RenderMode {
    fn default() -> Self {
        let opa = gbi::render_mode_value("G_RM_AA_ZB_OPA_SURF").unwrap_or(0)
            | gbi::render_mode_value("G_RM_AA_ZB_OPA_SURF2").unwrap_or(0);
        RenderMode::from_flags(opa)
    }
}

/// Lights captured into a material when the combiner reads shade.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaterialLights {
    pub ambient: Floats<4>,
    pub lights: Vec<Light>,
}

/// F3DEX3-only material registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Ex3Extras {
    /// Ambient, directional and point factors.
    pub ao: Option<Floats<3>>,
    /// `(hi, lo)` dot-product bounds.
    pub fresnel: Option<Floats<2>>,
    pub attr_offset_st: Option<Floats<2>>,
    pub attr_offset_z: Option<i64>,
    pub fog_position: Option<[i64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaterialState {
    pub combiner1: [String; 8],
    pub combiner2: [String; 8],
    pub geometry_mode: GeometryMode,
    other_mode_h: [&'static str; 12],
    other_mode_l: [&'static str; 2],
    pub render_mode: RenderMode,
    pub tex: [TextureSlot; 2],

    pub prim_color: Option<Floats<4>>,
    /// `(lod_min, lod_frac)` as fractions of 255.
    pub prim_lod: Option<Floats<2>>,
    pub env_color: Option<Floats<4>>,
    pub blend_color: Option<Floats<4>>,
    pub fog_color: Option<Floats<4>>,
    pub key: bool,
    pub convert: Option<Floats<6>>,
    pub lights: Option<MaterialLights>,

    pub tex_scale: Floats<2>,
    pub mipmaps: u32,
    pub clip_ratio: Option<i64>,
    pub ex3: Ex3Extras,
}

fn combiner_strings(slots: [&str; 8]) -> [String; 8] {
    slots.map(|s| s.to_string())
}

impl Default for MaterialState {
    fn default() -> Self {
        Self {
            combiner1: combiner_strings(gbi::DEFAULT_COMBINER),
            combiner2: combiner_strings(gbi::DEFAULT_COMBINER),
            geometry_mode: GeometryMode::ZBUFFER
                | GeometryMode::SHADE
                | GeometryMode::CULL_BACK
                | GeometryMode::LIGHTING
                | GeometryMode::SHADING_SMOOTH,
            other_mode_h: std::array::from_fn(|i| OTHER_MODE_H[i].values[0]),
            other_mode_l: std::array::from_fn(|i| OTHER_MODE_L[i].values[0]),
            render_mode: RenderMode::default(),
            tex: [TextureSlot::default(), TextureSlot::default()],
            prim_color: None,
            prim_lod: None,
            env_color: None,
            blend_color: None,
            fog_color: None,
            key: false,
            convert: None,
            lights: None,
            tex_scale: Floats([1.0, 1.0]),
            mipmaps: 1,
            clip_ratio: None,
            ex3: Ex3Extras::default(),
        }
    }
}

impl MaterialState {
    fn other_mode_slot(&mut self, field: &str) -> Option<&mut &'static str> {
        if let Some(i) = OTHER_MODE_H.iter().position(|f| f.name == field) {
            return self.other_mode_h.get_mut(i);
        }
        OTHER_MODE_L.iter().position(|f| f.name == field).and_then(|i| self.other_mode_l.get_mut(i))
    }

    /// Current symbol of an other-mode field, e.g. `G_MDSFT_CYCLETYPE`.
    pub fn other_mode(&self, field: &str) -> Option<&'static str> {
        if let Some(i) = OTHER_MODE_H.iter().position(|f| f.name == field) {
            return Some(self.other_mode_h[i]);
        }
        OTHER_MODE_L.iter().position(|f| f.name == field).map(|i| self.other_mode_l[i])
    }

    /// Sets an other-mode field to one of its symbols. Returns false when the
    /// field or value is not known.
    pub fn set_other_mode(&mut self, field: &str, value: &str) -> bool {
        let table = OTHER_MODE_H.iter().chain(OTHER_MODE_L.iter()).find(|f| f.name == field);
        let canonical = match table.and_then(|f| f.values.iter().find(|v| **v == value)) {
            Some(v) => *v,
            None => return false,
        };
        match self.other_mode_slot(field) {
            Some(slot) => {
                *slot = canonical;
                true
            },
            None => false,
        }
    }

    /// Decodes a field from a raw other-mode word.
    pub fn set_other_mode_raw(&mut self, field: &gbi::OtherModeField, flags: u32) {
        let value = field.decode(flags);
        if let Some(slot) = self.other_mode_slot(field.name) {
            *slot = value;
        }
    }

    pub fn is_two_cycle(&self) -> bool {
        self.other_mode("G_MDSFT_CYCLETYPE") == Some("G_CYC_2CYCLE")
    }

    /// Whether any combiner slot reads one of `symbols`. In two-cycle mode
    /// the second cycle is checked too, with TEXEL0 and TEXEL1 swapped.
    pub fn combiner_uses(&self, symbols: &[&str]) -> bool {
        let two_cycle = self.is_two_cycle();
        symbols.iter().any(|sym| {
            let swapped = if sym.starts_with("TEXEL") {
                if sym.contains('0') { sym.replace('0', "1") } else { sym.replace('1', "0") }
            } else {
                sym.to_string()
            };
            self.combiner1.iter().any(|s| s == sym) || (two_cycle && self.combiner2.iter().any(|s| *s == swapped))
        })
    }

    pub fn uses_texel(&self, index: usize) -> bool {
        if index == 0 {
            self.combiner_uses(&["TEXEL0", "TEXEL0_ALPHA"])
        } else {
            self.combiner_uses(&["TEXEL1", "TEXEL1_ALPHA"])
        }
    }

    pub fn uses_shade(&self) -> bool {
        self.combiner_uses(&["SHADE", "SHADE_ALPHA"])
    }

    pub fn set_combiners(&mut self, cycle1: [&str; 8], cycle2: [&str; 8]) {
        self.combiner1 = combiner_strings(cycle1);
        self.combiner2 = combiner_strings(cycle2);
    }

    /// Applies the TEXTLUT field: the palette format for CI textures, or no
    /// palette at all, in which case CI formats read as intensity.
    pub fn apply_tlut_mode(&mut self) {
        let mode = self.other_mode("G_MDSFT_TEXTLUT").unwrap_or("G_TT_NONE");
        for slot in self.tex.iter_mut() {
            match mode {
                "G_TT_IA16" => slot.ci_format = "IA16",
                "G_TT_RGBA16" => slot.ci_format = "RGBA16",
                _ => slot.downgrade_ci(),
            }
        }
    }

    pub fn set_render_mode(&mut self, flags: u32) {
        self.render_mode = RenderMode::from_flags(flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn float_keys_hash_by_bits() {
        let mut map = HashMap::new();
        map.insert(Floats([0.5f32, 1.0]), 1);
        assert_eq!(map.get(&Floats([0.5, 1.0])), Some(&1));
        assert_eq!(map.get(&Floats([0.5, 1.0000001])), None);
    }

    #[test]
    fn default_render_mode_is_a_preset() {
        let rm = RenderMode::default();
        assert_eq!(rm.preset, Some(("G_RM_AA_ZB_OPA_SURF".to_string(), "G_RM_AA_ZB_OPA_SURF2".to_string())));
        assert!(rm.flags.aa_en && rm.flags.z_cmp && rm.flags.z_upd);
        assert_eq!(rm.flags.zmode, "ZMODE_OPA");
        assert_eq!(rm.flags.blend1, ["G_BL_CLR_IN", "G_BL_A_IN", "G_BL_CLR_MEM", "G_BL_A_MEM"]);
    }

    #[test]
    fn raw_render_mode_without_preset() {
        let rm = RenderMode::from_flags(gbi::Z_CMP | gbi::ZMODE_XLU | gbi::FORCE_BL);
        assert!(rm.is_advanced());
        assert!(rm.flags.z_cmp && rm.flags.force_bl && !rm.flags.z_upd);
        assert_eq!(rm.flags.zmode, "ZMODE_XLU");
    }

    #[test]
    fn other_mode_symbols() {
        let mut mat = MaterialState::default();
        assert_eq!(mat.other_mode("G_MDSFT_CYCLETYPE"), Some("G_CYC_1CYCLE"));
        assert!(mat.set_other_mode("G_MDSFT_CYCLETYPE", "G_CYC_2CYCLE"));
        assert!(mat.is_two_cycle());
        assert!(!mat.set_other_mode("G_MDSFT_CYCLETYPE", "G_TF_POINT"));
        assert!(mat.set_other_mode("G_MDSFT_ZSRCSEL", "G_ZS_PRIM"));
        assert_eq!(mat.other_mode("G_MDSFT_ZSRCSEL"), Some("G_ZS_PRIM"));
    }

    #[test]
    fn second_cycle_swaps_texels() {
        let mut mat = MaterialState::default();
        let shade = gbi::DEFAULT_COMBINER;
        mat.set_combiners(shade, ["TEXEL0", "0", "SHADE", "0", "0", "0", "0", "1"]);
        assert!(!mat.uses_texel(0));
        assert!(!mat.uses_texel(1));
        mat.set_other_mode("G_MDSFT_CYCLETYPE", "G_CYC_2CYCLE");
        assert!(mat.uses_texel(1));
        assert!(!mat.uses_texel(0));
        assert!(mat.uses_shade());
    }

    #[test]
    fn tlut_none_downgrades_ci() {
        let mut mat = MaterialState::default();
        mat.tex[0].format = "CI8".to_string();
        mat.tex[1].format = "CI4".to_string();
        mat.set_other_mode("G_MDSFT_TEXTLUT", "G_TT_RGBA16");
        mat.apply_tlut_mode();
        assert_eq!(mat.tex[0].format, "CI8");
        mat.set_other_mode("G_MDSFT_TEXTLUT", "G_TT_IA16");
        mat.apply_tlut_mode();
        assert_eq!(mat.tex[1].ci_format, "IA16");
        mat.set_other_mode("G_MDSFT_TEXTLUT", "G_TT_NONE");
        mat.apply_tlut_mode();
        assert_eq!(mat.tex[0].format, "I8");
        assert_eq!(mat.tex[1].format, "I4");
    }
}
