//! The display-list interpreter: walks commands from an `AssetSource`,
//! tracks RSP/RDP state and emits triangles tagged with frozen materials.

pub mod light;
pub mod material;
pub mod tile;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use cgmath::{Matrix4, Vector3, Vector4};

#[allow(unused_imports)]
use tracing::{trace, debug, error, info, warn};

use crate::command::{Arg, Command};
use crate::error::{F3dError, Result};
use crate::fixed::{
    convert_f3d_uv, float_from_u16, gamma_inverse_rgba, normal_matrix, normalize_or_zero, signed_byte_normal,
    srgb_to_linear, unpack_normal,
};
use crate::gbi::{self, GeometryMode, TileFormat, TileSize, Ucode};
use crate::model::{ImportedMesh, MeshBuilder, OutputVertex, TextureInfo};
use crate::source::{AssetSource, TextureRequest};
use crate::texture::{apply_palette, TextureEntry};
use crate::{ImportSettings, Tweakables};

use self::light::{LightSet, MAX_LIGHTS};
use self::material::{Floats, MaterialLights, MaterialState, TileAxis};
use self::tile::{Tile, TileBounds, MAX_TILE_WORDS, TILE_COUNT, TLUT_TMEM};

/// Deepest call stack before a list is assumed to call itself forever.
pub const MAX_CALL_DEPTH: usize = 1 << 16;

/// Widest texture the load macros accept; `gsDPSetTextureImage` has a
/// 12-bit width field.
const MAX_TEXTURE_DIM: i64 = 0x1000;

/// Name the root transform is stored under by [`F3dContext::import`].
pub const ROOT_TRANSFORM: &str = "root";

struct Frame {
    name: String,
    commands: Arc<[Command]>,
    cursor: isize,
}

pub struct F3dContext<S: AssetSource> {
    settings: ImportSettings,
    tweakables: Tweakables,
    source: S,

    frames: Vec<Frame>,
    lists: HashMap<String, Arc<[Command]>>,

    tiles: [Tile; TILE_COUNT],
    tile_sizes: [TileBounds; TILE_COUNT],
    material: MaterialState,
    material_changed: bool,
    last_material: usize,

    lights: LightSet,
    num_lights: usize,
    lights_set: bool,

    current_transform: String,
    matrices: HashMap<String, Matrix4<f32>>,

    tmem: HashMap<u32, String>,
    current_texture: String,
    textures: HashMap<String, TextureEntry>,
    tlut_applied: HashSet<String>,

    mesh: MeshBuilder,
    command_prefix: String,
}

/// Splits a `gsSPVertex` data reference (`&name[3]`, `name + 3`,
/// `&name[1] + 2`) into the declaration name and a vertex offset.
fn parse_vertex_reference(param: &str, ucode: Ucode) -> Result<(String, usize)> {
    let malformed = |detail: &str| F3dError::malformed("gsSPVertex", format!("{} in {}", detail, param));

    let s = param.trim().trim_start_matches('&');
    let end = s.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_')).unwrap_or(s.len());
    let (name, mut rest) = (&s[..end], s[end..].trim_start());
    if name.is_empty() {
        return Err(malformed("missing name"));
    }

    let mut offset = 0i64;
    if let Some(inner) = rest.strip_prefix('[') {
        let close = inner.find(']').ok_or_else(|| malformed("unclosed index"))?;
        offset += crate::command::eval_expr(&inner[..close], ucode).map_err(|e| malformed(&e))?;
        rest = inner[close + 1..].trim_start();
    }
    if let Some(add) = rest.strip_prefix('+') {
        offset += crate::command::eval_expr(add, ucode).map_err(|e| malformed(&e))?;
    }
    if offset < 0 {
        return Err(malformed("negative offset"));
    }
    Ok((name.to_string(), offset as usize))
}

/// Python-style floor division, used for the fresnel dot-product bounds.
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
}

fn other_mode_field_named(name: &str) -> Option<&'static gbi::OtherModeField> {
    gbi::OTHER_MODE_H.iter().chain(gbi::OTHER_MODE_L.iter()).find(|f| f.name == name)
}

impl<S: AssetSource> F3dContext<S> {
    pub fn new(source: S, settings: ImportSettings) -> F3dContext<S> {
        let mesh = MeshBuilder::new(settings.vertex_buffer_size);
        F3dContext {
            settings,
            tweakables: Tweakables::default(),
            source,

            frames: Vec::new(),
            lists: HashMap::new(),

            tiles: Default::default(),
            tile_sizes: [TileBounds::default(); TILE_COUNT],
            material: MaterialState::default(),
            material_changed: true,
            last_material: 0,

            lights: LightSet::default(),
            num_lights: 0,
            lights_set: false,

            current_transform: ROOT_TRANSFORM.to_string(),
            matrices: HashMap::new(),

            tmem: HashMap::new(),
            current_texture: String::new(),
            textures: HashMap::new(),
            tlut_applied: HashSet::new(),

            mesh,
            command_prefix: String::new(),
        }
    }

    pub fn set_tweakables(&mut self, tweakables: Tweakables) {
        self.tweakables = tweakables;
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// The material accumulator as the next triangle would freeze it.
    pub fn material(&self) -> &MaterialState {
        &self.material
    }

    pub fn mesh(&self) -> &MeshBuilder {
        &self.mesh
    }

    pub fn tiles(&self) -> &[Tile; TILE_COUNT] {
        &self.tiles
    }

    pub fn tile_sizes(&self) -> &[TileBounds; TILE_COUNT] {
        &self.tile_sizes
    }

    pub fn lights(&self) -> &LightSet {
        &self.lights
    }

    pub fn num_lights(&self) -> usize {
        self.num_lights
    }

    pub fn current_transform(&self) -> &str {
        &self.current_transform
    }

    pub fn texture(&self, name: &str) -> Option<&TextureEntry> {
        self.textures.get(name)
    }

    pub fn textures(&self) -> impl Iterator<Item = (&String, &TextureEntry)> {
        self.textures.iter()
    }

    pub fn add_matrix(&mut self, name: &str, matrix: Matrix4<f32>) {
        self.matrices.insert(name.to_string(), matrix);
    }

    /// The transform every import starts under: a uniform `1 / scale`.
    pub fn root_transform(&self) -> Matrix4<f32> {
        let scale = if self.settings.scale != 0.0 { self.settings.scale } else { 1.0 };
        Matrix4::from_scale(1.0 / scale)
    }

    /// Clears per-traversal state and runs `name` under the root transform.
    pub fn import(&mut self, name: &str) -> Result<ImportedMesh> {
        self.clear_geometry();
        let root = self.root_transform();
        self.parse_display_list(name, root, ROOT_TRANSFORM)?;
        Ok(self.build())
    }

    /// Runs the list `name` with `transform` stored under `limb_name`.
    /// Geometry accumulates across calls until [`clear_geometry`].
    ///
    /// [`clear_geometry`]: F3dContext::clear_geometry
    pub fn parse_display_list(&mut self, name: &str, transform: Matrix4<f32>, limb_name: &str) -> Result<()> {
        self.add_matrix(limb_name, transform);
        self.set_current_transform(limb_name, "G_MTX_NOPUSH | G_MTX_LOAD | G_MTX_MODELVIEW")?;

        let list = match self.source.resolve_dl_name(name) {
            Some(list) => list,
            None => {
                debug!(target: "F3D", "skipping display list {}", name);
                return Ok(());
            },
        };
        let commands = self.load_list(&list)?;
        self.process_commands(&list, commands)
    }

    pub fn build(&self) -> ImportedMesh {
        let textures = self
            .textures
            .iter()
            .map(|(name, entry)| {
                let info = match entry {
                    TextureEntry::Image(img) => TextureInfo { width: img.width, height: img.height },
                    TextureEntry::Reference { width, .. } => TextureInfo { width: *width, height: 0 },
                };
                (name.clone(), info)
            })
            .collect::<BTreeMap<_, _>>();
        self.mesh.build(textures)
    }

    /// Resets everything tied to one traversal. Frozen materials, decoded
    /// textures, applied palettes and matrices are kept.
    pub fn clear_geometry(&mut self) {
        self.mesh.clear_geometry();
        self.frames.clear();
        self.lists.clear();

        self.tiles = Default::default();
        self.tile_sizes = [TileBounds::default(); TILE_COUNT];
        self.material = MaterialState::default();
        self.material_changed = true;
        self.last_material = 0;

        self.lights = LightSet::default();
        self.num_lights = 0;
        self.lights_set = false;

        self.current_transform = ROOT_TRANSFORM.to_string();
        self.tmem.clear();
        self.current_texture.clear();
    }

    /// Drops texture and color registers between limbs so one limb's
    /// material does not leak into the next.
    pub fn clear_material(&mut self) {
        let mat = &mut self.material;
        mat.prim_color = None;
        mat.prim_lod = None;
        mat.env_color = None;
        mat.blend_color = None;
        mat.key = false;
        mat.convert = None;
        mat.lights = None;
        mat.tex = Default::default();

        self.tmem.clear();
        self.tiles = Default::default();
        self.tile_sizes = [TileBounds::default(); TILE_COUNT];

        self.lights = LightSet::default();
        self.num_lights = 0;
        self.lights_set = false;
        self.material_changed = true;
    }

    fn load_list(&mut self, name: &str) -> Result<Arc<[Command]>> {
        if let Some(list) = self.lists.get(name) {
            return Ok(Arc::clone(list));
        }
        let list: Arc<[Command]> = self.source.display_list(name)?.into();
        self.lists.insert(name.to_string(), Arc::clone(&list));
        Ok(list)
    }

    fn process_commands(&mut self, name: &str, commands: Arc<[Command]>) -> Result<()> {
        self.frames.push(Frame { name: name.to_string(), commands, cursor: 0 });

        while let Some(frame) = self.frames.last() {
            let cursor = frame.cursor;
            if cursor < 0 || cursor as usize >= frame.commands.len() {
                error!(target: "F3D", "display list {} has no end command", frame.name);
                return Err(F3dError::Unterminated { list: frame.name.clone() });
            }
            if self.frames.len() > MAX_CALL_DEPTH {
                error!(target: "F3D", "call stack depth {} at {}", self.frames.len(), frame.name);
                return Err(F3dError::CallStackOverflow { list: frame.name.clone(), depth: self.frames.len() });
            }

            let command = frame.commands[cursor as usize].clone();
            let depth = self.frames.len() - 1;
            let mut spacing = String::new();
            for _ in 0..depth.min(32) { spacing.push_str("  "); }
            self.command_prefix = format!("{}[{}]:{}", frame.name, cursor, spacing);

            trace!(target: "F3D", "{} {}", self.command_prefix, command);
            self.process_command(&command)?;

            // calls leave the new frame at -1 so this lands it on 0
            if let Some(top) = self.frames.last_mut() {
                top.cursor += 1;
            }
        }
        Ok(())
    }

    fn process_command(&mut self, command: &Command) -> Result<()> {
        match self.dispatch(command) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                error!(target: "F3D", "{} {}: {}", self.command_prefix, command.name, e);
                Err(e)
            },
            Err(e) => {
                warn!(target: "F3D", "{} skipping {}: {}", self.command_prefix, command.name, e);
                Ok(())
            },
        }
    }

    fn dispatch(&mut self, command: &Command) -> Result<()> {
        if self.control_command(command)? {
            return Ok(());
        }
        if self.material_command(command)? {
            self.material_changed = true;
            return Ok(());
        }
        if self.texture_command(command)? {
            self.material_changed = true;
            return Ok(());
        }
        trace!(target: "F3D", "{} {} not handled", self.command_prefix, command.name);
        Ok(())
    }

    fn int(&self, command: &Command, i: usize) -> Result<i64> {
        command.int(i, self.settings.ucode)
    }

    fn ints<const N: usize>(&self, command: &Command, start: usize) -> Result<[i64; N]> {
        let mut out = [0i64; N];
        for (i, v) in out.iter_mut().enumerate() {
            *v = self.int(command, start + i)?;
        }
        Ok(out)
    }

    // ---------------------------------------------------------------------
    // control flow and geometry
    // ---------------------------------------------------------------------

    fn control_command(&mut self, command: &Command) -> Result<bool> {
        match command.name.as_str() {
            "gsSPVertex" => {
                command.expect_args(3)?;
                let (name, offset) = parse_vertex_reference(&command.text(0)?, self.settings.ucode)?;
                let count = self.int(command, 1)?;
                let start = self.int(command, 2)?;
                if count < 0 || start < 0 {
                    return Err(F3dError::malformed(&command.name, format!("count {} start {}", count, start)));
                }
                let data = self.source.vertices(&name)?;
                self.mesh.add_vertices(count as usize, start as usize, &name, offset, &data, &self.current_transform)?;
            },
            "gsSPMatrix" => {
                command.expect_args(2)?;
                let name = command.text(0)?;
                let flags = command.text(1)?;
                self.set_current_transform(&name, &flags)?;
            },
            "gsSPPopMatrix" => {
                debug!(target: "F3D", "{} gsSPPopMatrix not handled", self.command_prefix);
            },
            "gsSP1Triangle" => {
                let indices: [i64; 3] = self.ints(command, 0)?;
                self.add_triangle(&indices)?;
            },
            "gsSP2Triangles" => {
                let first: [i64; 3] = self.ints(command, 0)?;
                let second: [i64; 3] = self.ints(command, 4)?;
                self.add_triangle(&[first[0], first[1], first[2], second[0], second[1], second[2]])?;
            },
            "gsSP1Quadrangle" => {
                let [v0, v1, v2, v3]: [i64; 4] = self.ints(command, 0)?;
                self.add_triangle(&[v0, v1, v2, v0, v2, v3])?;
            },
            "gsSPDisplayList" => self.call_list(command, false)?,
            name if name.starts_with("gsSPBranch") => self.call_list(command, true)?,
            "gsSPEndDisplayList" => {
                self.frames.pop();
            },
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn call_list(&mut self, command: &Command, branch: bool) -> Result<()> {
        let target = command.text(0)?;
        let name = match self.source.resolve_dl_name(&target) {
            Some(name) => name,
            None => {
                warn!(target: "F3D", "{} {} target {} cannot be resolved, DL is partial", self.command_prefix, command.name, target);
                // a branch is the last command of its list
                if branch {
                    self.frames.pop();
                }
                return Ok(());
            },
        };

        let commands = self.load_list(&name)?;
        if branch {
            self.frames.pop();
        }
        self.frames.push(Frame { name, commands, cursor: -1 });
        Ok(())
    }

    fn set_current_transform(&mut self, name: &str, flags: &str) -> Result<()> {
        let tokens: Vec<&str> = flags.split('|').map(|t| t.trim()).collect();
        let (projection, load) = if tokens.iter().any(|t| t.starts_with("G_MTX_")) {
            (tokens.contains(&"G_MTX_PROJECTION"), tokens.contains(&"G_MTX_LOAD"))
        } else {
            let raw = crate::command::eval_expr(flags, self.settings.ucode)
                .map_err(|e| F3dError::malformed("gsSPMatrix", e))?;
            let projection_bit = if self.settings.ucode.is_ex2_family() { 0x04 } else { 0x01 };
            (raw & projection_bit != 0, raw & 0x02 != 0)
        };

        if projection {
            debug!(target: "F3D", "{} projection matrix {} ignored", self.command_prefix, name);
            return Ok(());
        }

        if !self.matrices.contains_key(name) {
            match self.source.matrix(name) {
                Some(m) => self.add_matrix(name, m),
                None => return Err(F3dError::MissingTransform { name: name.to_string() }),
            }
        }

        if load {
            self.current_transform = name.to_string();
        } else {
            let current = self
                .matrices
                .get(&self.current_transform)
                .copied()
                .ok_or_else(|| F3dError::MissingTransform { name: self.current_transform.clone() })?;
            let m = self.matrices.get(name).copied().ok_or_else(|| F3dError::MissingTransform { name: name.to_string() })?;
            let composed = format!("{}_x_{}", name, self.current_transform);
            // matrices are stored for column vectors, so the new matrix applies first
            self.add_matrix(&composed, current * m);
            self.current_transform = composed;
        }
        Ok(())
    }

    fn add_triangle(&mut self, indices: &[i64]) -> Result<()> {
        if self.material_changed {
            for index in 0..2 {
                let tmem = self.tiles[index].tmem;
                if let Some(name) = self.tmem.get(&tmem).cloned() {
                    self.load_texture(&name, index, false, 0);
                    self.apply_tile_to_material(index, &name);
                }
            }
            self.material.apply_tlut_mode();
            self.apply_lights();
            self.apply_tlut_to_index(0);
            self.apply_tlut_to_index(1);

            self.last_material = self.mesh.get_or_create_material(&self.material);
            self.material_changed = false;
        }

        let verts = indices.iter().map(|i| self.transformed_vertex(*i)).collect::<Result<Vec<_>>>()?;
        self.mesh.add_triangle(verts, self.last_material);
        Ok(())
    }

    fn texture_dimensions(&self) -> [f32; 2] {
        for slot in self.material.tex.iter() {
            if let Some(TextureEntry::Image(img)) = slot.image.as_ref().and_then(|n| self.textures.get(n)) {
                return [img.width as f32, img.height as f32];
            }
            if slot.reference.is_some() {
                return [slot.reference_size[0] as f32, slot.reference_size[1] as f32];
            }
        }
        [32.0, 32.0]
    }

    fn transformed_vertex(&self, index: i64) -> Result<(OutputVertex, String)> {
        let slot = usize::try_from(index).map_err(|_| F3dError::OutOfRange {
            what: "vertex index".to_string(),
            start: 0,
            end: 0,
            len: self.mesh.vertex_buffer.len(),
        })?;
        let buffered = self.mesh.buffer_vertex(slot)?;
        let transform = self
            .matrices
            .get(&buffered.transform)
            .copied()
            .ok_or_else(|| F3dError::MissingTransform { name: buffered.transform.clone() })?;
        let vertex = &buffered.vertex;

        let [x, y, z] = vertex.position.map(|v| v as f32);
        let position = transform * Vector4::new(x, y, z, 1.0);

        let dims = self.texture_dimensions();
        let u = convert_f3d_uv(vertex.texcoord[0], dims[0]);
        let v = 1.0 - convert_f3d_uv(vertex.texcoord[1], dims[1]);

        let lighting = self.material.geometry_mode.contains(GeometryMode::LIGHTING);
        let packed = self.settings.ucode == Ucode::F3dex3 && self.material.geometry_mode.contains(GeometryMode::PACKED_NORMALS);
        let color = if !lighting || packed {
            vertex.rgb().map(|c| c as f32 / 255.0)
        } else {
            [1.0, 1.0, 1.0]
        };

        let normal = if lighting {
            let n = if packed { unpack_normal(vertex.flag) } else { signed_byte_normal(vertex.rgb()) };
            normalize_or_zero((normal_matrix(&transform) * n.extend(0.0)).truncate())
        } else {
            Vector3::new(0.0, 0.0, 0.0)
        };

        let out = OutputVertex {
            position: [position.x, position.y, position.z],
            uv: [u, v],
            color,
            normal: [normal.x, normal.y, normal.z],
            alpha: vertex.alpha() as f32 / 255.0,
        };
        Ok((out, buffered.transform.clone()))
    }

    // ---------------------------------------------------------------------
    // material registers
    // ---------------------------------------------------------------------

    fn material_command(&mut self, command: &Command) -> Result<bool> {
        let name = command.name.as_str();
        match name {
            "gsSPClipRatio" => self.material.clip_ratio = Some(self.int(command, 0)?),
            "gsSPNumLights" | "gsSPLight" | "gsSPLightColor" => {
                if self.tweakables.disable_lighting {
                    return Ok(true);
                }
                match name {
                    "gsSPNumLights" => self.num_lights = (self.int(command, 0)?.max(0) as usize).min(MAX_LIGHTS),
                    "gsSPLight" => self.set_light(command)?,
                    _ => self.set_light_color(command)?,
                }
            },
            _ if name.starts_with("gsSPSetLights") => {
                if !self.tweakables.disable_lighting {
                    self.set_lights(command)?;
                }
            },

            "gsSPAmbOcclusionAmb" | "gsSPAmbOcclusionDir" | "gsSPAmbOcclusionPoint"
            | "gsSPAmbOcclusionAmbDir" | "gsSPAmbOcclusionDirPoint" | "gsSPAmbOcclusion" => {
                let mut ao = self.material.ex3.ao.unwrap_or(Floats([1.0; 3]));
                let slots: &[usize] = match name {
                    "gsSPAmbOcclusionAmb"      => &[0],
                    "gsSPAmbOcclusionDir"      => &[1],
                    "gsSPAmbOcclusionPoint"    => &[2],
                    "gsSPAmbOcclusionAmbDir"   => &[0, 1],
                    "gsSPAmbOcclusionDirPoint" => &[1, 2],
                    _                          => &[0, 1, 2],
                };
                for (i, slot) in slots.iter().enumerate() {
                    ao.0[*slot] = float_from_u16(self.int(command, i)?);
                }
                self.material.ex3.ao = Some(ao);
            },
            "gsSPFresnel" => {
                let scale = self.int(command, 0)? as i16 as i64;
                let offset = self.int(command, 1)? as i16 as i64;
                if scale == 0 {
                    return Err(F3dError::malformed(name, "zero scale"));
                }
                let hi = floor_div((0x7F - offset) << 15, scale) as f32 / 0x7FFF as f32;
                let lo = floor_div((0x00 - offset) << 15, scale) as f32 / 0x7FFF as f32;
                self.material.ex3.fresnel = Some(Floats([hi, lo]));
            },
            "gsSPAttrOffsetST" => {
                let s = self.int(command, 0)? as i16 as f32 / 32.0;
                let t = self.int(command, 1)? as i16 as f32 / 32.0;
                self.material.ex3.attr_offset_st = Some(Floats([s, t]));
            },
            "gsSPAttrOffsetZ" => self.material.ex3.attr_offset_z = Some(self.int(command, 0)? as i16 as i64),
            "gsSPFogFactor" => {},
            "gsSPFogPosition" => self.material.ex3.fog_position = Some(self.ints(command, 0)?),

            "gsSPTexture" | "gsSPTextureL" => {
                let [s, t, level]: [i64; 3] = self.ints(command, 0)?;
                self.material.tex_scale = if s == 0xFFFF && t == 0xFFFF {
                    Floats([1.0, 1.0])
                } else {
                    Floats([float_from_u16(s), float_from_u16(t)])
                };
                self.material.mipmaps = (level.max(0) + 1) as u32;
            },

            "gsSPSetGeometryMode" => {
                let flags = self.geometry_flags(command, 0)?;
                self.material.geometry_mode.insert(flags);
            },
            "gsSPClearGeometryMode" => {
                let flags = self.geometry_flags(command, 0)?;
                self.material.geometry_mode.remove(flags);
            },
            "gsSPLoadGeometryMode" => {
                self.material.geometry_mode = self.geometry_flags(command, 0)?;
            },
            "gsSPGeometryMode" => {
                let clear = self.geometry_flags(command, 0)?;
                let set = self.geometry_flags(command, 1)?;
                self.material.geometry_mode.remove(clear);
                self.material.geometry_mode.insert(set);
            },

            "gsSPSetOtherMode" => self.set_other_mode_flags(command)?,
            "gsDPPipelineMode"      => self.set_other_mode_field(command, &["G_MDSFT_PIPELINE"])?,
            "gsDPSetCycleType"      => self.set_other_mode_field(command, &["G_MDSFT_CYCLETYPE"])?,
            "gsDPSetTexturePersp"   => self.set_other_mode_field(command, &["G_MDSFT_TEXTPERSP"])?,
            "gsDPSetTextureDetail"  => self.set_other_mode_field(command, &["G_MDSFT_TEXTDETAIL"])?,
            "gsDPSetTextureLOD"     => self.set_other_mode_field(command, &["G_MDSFT_TEXTLOD"])?,
            "gsDPSetTextureFilter"  => self.set_other_mode_field(command, &["G_MDSFT_TEXTFILT"])?,
            "gsDPSetTextureConvert" => self.set_other_mode_field(command, &["G_MDSFT_TEXTCONV"])?,
            "gsDPSetCombineKey"     => self.set_other_mode_field(command, &["G_MDSFT_COMBKEY"])?,
            "gsDPSetColorDither"    => self.set_other_mode_field(command, &["G_MDSFT_RGBDITHER", "G_MDSFT_COLORDITHER"])?,
            "gsDPSetAlphaDither"    => self.set_other_mode_field(command, &["G_MDSFT_ALPHADITHER"])?,
            "gsDPSetAlphaCompare"   => self.set_other_mode_field(command, &["G_MDSFT_ALPHACOMPARE"])?,
            "gsDPSetDepthSource"    => self.set_other_mode_field(command, &["G_MDSFT_ZSRCSEL"])?,
            "gsDPSetTextureLUT" => {
                self.set_other_mode_field(command, &["G_MDSFT_TEXTLUT"])?;
                self.material.apply_tlut_mode();
            },

            "gsDPSetRenderMode" => {
                let flags = self.int(command, 0)? | self.int(command, 1)?;
                self.material.set_render_mode(flags as u32);
            },
            "gsDPSetTextureImage" => {
                let image = command.text(3)?;
                self.current_texture = image.trim_start_matches('&').to_string();
            },
            "gsDPSetCombineMode" => {
                command.expect_args(2)?;
                let cycle1 = gbi::resolve_combiner_preset(&command.text(0)?);
                let cycle2 = gbi::resolve_combiner_preset(&command.text(1)?);
                self.material.set_combiners(cycle1, cycle2);
            },
            "gsDPSetCombineLERP" => self.set_combine_lerp(command)?,

            "gsDPSetEnvColor" => self.material.env_color = Some(Floats(gamma_inverse_rgba(self.ints(command, 0)?))),
            "gsDPSetBlendColor" => self.material.blend_color = Some(Floats(gamma_inverse_rgba(self.ints(command, 0)?))),
            "gsDPSetFogColor" => self.material.fog_color = Some(Floats(gamma_inverse_rgba(self.ints(command, 0)?))),
            "gsDPSetPrimColor" => {
                let [lod_min, lod_frac]: [i64; 2] = self.ints(command, 0)?;
                let rgba: [i64; 4] = self.ints(command, 2)?;
                self.material.prim_lod = Some(Floats([lod_min as f32 / 255.0, lod_frac as f32 / 255.0]));
                self.material.prim_color = Some(Floats(gamma_inverse_rgba(rgba)));
            },
            "gsDPSetFillColor" | "gsDPSetPrimDepth" => {},
            "gsDPSetOtherMode" => {
                debug!(target: "F3D", "{} gsDPSetOtherMode not handled", self.command_prefix);
            },
            "gsDPSetConvert" | "DPSetConvert" => {
                let k: [i64; 6] = self.ints(command, 0)?;
                self.material.convert = Some(Floats(k.map(|v| srgb_to_linear(v as f32 / 255.0))));
            },
            "gsDPSetKeyR" | "DPSetKeyR" | "gsDPSetKeyGB" | "DPSetKeyGB" => self.material.key = true,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn geometry_flags(&self, command: &Command, i: usize) -> Result<GeometryMode> {
        let raw = self.int(command, i)?;
        Ok(GeometryMode::from_raw(raw as u32, self.settings.ucode))
    }

    /// `gsSPSetOtherMode(which, shift, len, data)`: every field whose shift
    /// falls inside `[shift, shift + len)` is decoded from `data`.
    fn set_other_mode_flags(&mut self, command: &Command) -> Result<()> {
        let [which, shift, len, data]: [i64; 4] = self.ints(command, 0)?;
        let (shift, len, data) = (shift as u32, len as u32, data as u32);
        let high = which as u8 == self.settings.ucode.setothermode_h();
        let covers = |field_shift: u32| shift <= field_shift && field_shift < shift + len;

        let table = if high { gbi::OTHER_MODE_H } else { gbi::OTHER_MODE_L };
        for field in table.iter().filter(|f| covers(f.shift)) {
            self.material.set_other_mode_raw(field, data);
            if field.shift == gbi::G_MDSFT_TEXTLUT && high {
                self.material.apply_tlut_mode();
            }
        }
        if !high && covers(gbi::G_MDSFT_RENDERMODE) {
            self.material.set_render_mode(data);
        }
        Ok(())
    }

    /// Sets an other-mode field from a symbol, falling back to a raw value.
    fn set_other_mode_field(&mut self, command: &Command, fields: &[&str]) -> Result<()> {
        let value = command.text(0)?;
        if fields.iter().any(|f| self.material.set_other_mode(f, &value)) {
            return Ok(());
        }
        let raw = self.int(command, 0)?;
        let field = fields
            .first()
            .and_then(|f| other_mode_field_named(f))
            .ok_or_else(|| F3dError::Unsupported { command: command.name.clone() })?;
        self.material.set_other_mode_raw(field, raw as u32);
        Ok(())
    }

    fn set_combine_lerp(&mut self, command: &Command) -> Result<()> {
        command.expect_args(16)?;
        let symbol = |slot: usize, arg: &Arg| -> String {
            match arg {
                Arg::Int(v) => gbi::combiner_slot_symbol(slot % 8, *v as u32).to_string(),
                Arg::Text(s) => s.trim().to_string(),
            }
        };
        let slots: Vec<String> = command.args.iter().take(16).enumerate().map(|(i, a)| symbol(i, a)).collect();
        let cycle1: [&str; 8] = std::array::from_fn(|i| slots[i].as_str());
        let cycle2: [&str; 8] = std::array::from_fn(|i| slots[8 + i].as_str());
        self.material.set_combiners(cycle1, cycle2);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // lights
    // ---------------------------------------------------------------------

    fn light_slot(&self, command: &Command, index: i64) -> Result<usize> {
        if !(1..=MAX_LIGHTS as i64 + 1).contains(&index) {
            return Err(F3dError::malformed(&command.name, format!("light index {}", index)));
        }
        Ok(index as usize)
    }

    /// `gsSPLight(ref, n)`. Text sources reference a member of a `Lights*`
    /// declaration (`name.l[1]`, `name.a`); ROM sources point at a single
    /// `Light`, which becomes ambient when `n` is one past the light count.
    fn set_light(&mut self, command: &Command) -> Result<()> {
        let reference = command.text(0)?;
        let index = self.light_slot(command, self.int(command, 1)?)?;

        let reference = reference.trim_start_matches('&');
        match reference.split_once('.') {
            Some((name, member)) => {
                let set = self.source.lights(name)?;
                if let Some(l) = member.strip_prefix('l') {
                    let i = match l.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
                        Some(i) => crate::command::eval_expr(i, self.settings.ucode)
                            .map_err(|e| F3dError::malformed(&command.name, e))? as usize,
                        None => 0,
                    };
                    if i >= MAX_LIGHTS {
                        return Err(F3dError::malformed(&command.name, format!("light {}", i)));
                    }
                    self.num_lights = self.num_lights.max(i + 1);
                    self.lights.lights[i] = set.lights[i];
                } else {
                    self.lights.ambient = set.ambient;
                }
            },
            None => {
                let set = self.source.lights(reference)?;
                if index == self.num_lights + 1 {
                    self.lights.ambient = set.ambient;
                } else {
                    let slot = self.directional_slot(command, index)?;
                    self.lights.lights[slot] = set.lights[0];
                    self.num_lights = self.num_lights.max(index);
                }
            },
        }
        self.lights_set = true;
        Ok(())
    }

    fn set_light_color(&mut self, command: &Command) -> Result<()> {
        let index = self.light_slot(command, self.int(command, 0)?)?;
        let color = self.int(command, 1)? as u32;

        let rgb = Floats([24, 16, 8].map(|s| ((color >> s) & 0xFF) as f32 / 255.0));
        if index != self.num_lights + 1 {
            let slot = self.directional_slot(command, index)?;
            self.lights.lights[slot].color = rgb;
        } else {
            self.lights.ambient = rgb;
        }
        if self.num_lights < index - 1 {
            self.num_lights = index - 1;
        }
        self.lights_set = true;
        Ok(())
    }

    /// Array slot for light `index` when it is not the ambient light.
    fn directional_slot(&self, command: &Command, index: usize) -> Result<usize> {
        match index.checked_sub(1) {
            Some(slot) if slot < MAX_LIGHTS => Ok(slot),
            _ => Err(F3dError::malformed(&command.name, format!("light {} is past the {} directional lights", index, MAX_LIGHTS))),
        }
    }

    /// `gsSPSetLights1(name)` and friends load a whole declaration.
    fn set_lights(&mut self, command: &Command) -> Result<()> {
        let count = match command.name["gsSPSetLights".len()..].chars().next() {
            Some(c) if c.is_ascii_digit() => c as usize - '0' as usize,
            Some('N') | Some('n') => MAX_LIGHTS,
            _ => return Err(F3dError::Unsupported { command: command.name.clone() }),
        };
        let name = command.text(0)?;
        self.lights = self.source.lights(name.trim_start_matches('&'))?;
        self.num_lights = count.min(MAX_LIGHTS);
        self.lights_set = true;
        Ok(())
    }

    fn apply_lights(&mut self) {
        let lighting = self.material.geometry_mode.contains(GeometryMode::LIGHTING);
        if !(self.lights_set && lighting && self.material.uses_shade()) {
            return;
        }
        let a = self.lights.ambient.0;
        self.material.lights = Some(MaterialLights {
            ambient: Floats([a[0], a[1], a[2], 1.0]),
            lights: self.lights.lights[..self.num_lights.min(MAX_LIGHTS)].to_vec(),
        });
    }

    // ---------------------------------------------------------------------
    // tiles and textures
    // ---------------------------------------------------------------------

    fn texture_command(&mut self, command: &Command) -> Result<bool> {
        let name = command.name.as_str();
        match name {
            "gsDPSetTileSize" => {
                let tile = self.tile_index(command, 0)?;
                let [uls, ult, lrs, lrt]: [i64; 4] = self.ints(command, 1)?;
                self.tile_sizes[tile] = TileBounds { uls, ult, lrs, lrt };
            },
            "gsDPLoadTile" | "gsDPLoadBlock" => {
                let tile = self.tile_index(command, 0)?;
                self.load_tile(tile);
            },
            "gsDPSetTile" => {
                command.expect_args(12)?;
                let tile = self.tile_index(command, 4)?;
                self.tiles[tile] = self.tile_from_args(command, [0, 1, 2, 3, 5, 6, 7, 8, 9, 10, 11])?;
            },
            "gsDPLoadTLUTCmd" => {
                let tile = self.tile_index(command, 0)?;
                let count = self.int(command, 1)?;
                if !(0..=0x3FF).contains(&count) {
                    return Err(F3dError::malformed(name, format!("count {}", count)));
                }
                self.load_tlut(tile, count);
            },
            "gsDPLoadTLUT_pal16" => self.load_tlut_pal(&command.text(1)?, 15),
            "gsDPLoadTLUT_pal256" => self.load_tlut_pal(&command.text(0)?, 255),
            _ if name.starts_with("gsDPLoad") => {
                let is_4bit = name.contains("4b");
                let a = &command.args;
                let four_bit = || Arg::Text("G_IM_SIZ_4b".to_string());
                let render = || [Arg::Int(0), Arg::Text("G_TX_RENDERTILE".to_string())];
                let params: Vec<Arg> = if name.starts_with("gsDPLoadTextureBlock") {
                    command.expect_args(if is_4bit { 11 } else { 12 })?;
                    if is_4bit {
                        [vec![a[0].clone()], render().to_vec(), vec![a[1].clone(), four_bit()], a[2..].to_vec()].concat()
                    } else {
                        [vec![a[0].clone()], render().to_vec(), a[1..].to_vec()].concat()
                    }
                } else if name.starts_with("gsDPLoadMultiBlock") {
                    command.expect_args(if is_4bit { 13 } else { 14 })?;
                    if is_4bit {
                        [a[..4].to_vec(), vec![four_bit()], a[4..].to_vec()].concat()
                    } else {
                        a.clone()
                    }
                } else if name.starts_with("gsDPLoadTextureTile") {
                    command.expect_args(if is_4bit { 15 } else { 16 })?;
                    if is_4bit {
                        [vec![a[0].clone()], render().to_vec(), vec![a[1].clone(), four_bit()], a[2..4].to_vec(), a[8..].to_vec()].concat()
                    } else {
                        [vec![a[0].clone()], render().to_vec(), a[1..5].to_vec(), a[9..].to_vec()].concat()
                    }
                } else if name.starts_with("gsDPLoadMultiTile") {
                    command.expect_args(if is_4bit { 17 } else { 18 })?;
                    if is_4bit {
                        [a[..4].to_vec(), vec![four_bit()], a[4..6].to_vec(), a[10..].to_vec()].concat()
                    } else {
                        [a[..7].to_vec(), a[11..].to_vec()].concat()
                    }
                } else {
                    return Ok(false);
                };
                self.load_multi_block(&Command::new(name, params), is_4bit)?;
            },
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn tile_index(&self, command: &Command, i: usize) -> Result<usize> {
        let tile = self.int(command, i)?;
        if !(0..TILE_COUNT as i64).contains(&tile) {
            return Err(F3dError::malformed(&command.name, format!("tile {}", tile)));
        }
        Ok(tile as usize)
    }

    fn tile_format(&self, command: &Command, i: usize) -> Result<TileFormat> {
        Ok(match self.int(command, i) {
            Ok(v) => TileFormat::from_index(v as u32),
            Err(_) => gbi::resolve_tile_format(&command.text(i)?),
        })
    }

    fn tile_size(&self, command: &Command, i: usize) -> Result<TileSize> {
        Ok(match self.int(command, i) {
            Ok(v) => TileSize::from_index(v as u32),
            Err(_) => gbi::resolve_tile_size(&command.text(i)?),
        })
    }

    /// Builds a tile from `gsDPSetTile`-ordered arguments. `at` gives the
    /// argument positions of fmt, siz, line, tmem, pal, cmt, maskt, shiftt,
    /// cms, masks and shifts.
    fn tile_from_args(&self, command: &Command, at: [usize; 11]) -> Result<Tile> {
        let int = |i: usize| -> Result<u32> { Ok(self.int(command, i)? as u32) };
        let words = |i: usize, what: &str| -> Result<u32> {
            let v = self.int(command, i)?;
            if !(0..=MAX_TILE_WORDS as i64).contains(&v) {
                return Err(F3dError::malformed(&command.name, format!("{} {} does not fit 9 bits", what, v)));
            }
            Ok(v as u32)
        };
        Ok(Tile {
            fmt: self.tile_format(command, at[0])?,
            siz: self.tile_size(command, at[1])?,
            line: words(at[2], "line")?,
            tmem: words(at[3], "tmem")?,
            palette: int(at[4])?,
            cmt: gbi::resolve_clamp_mirror(&command.text(at[5])?),
            maskt: int(at[6])?,
            shiftt: int(at[7])?,
            cms: gbi::resolve_clamp_mirror(&command.text(at[8])?),
            masks: int(at[9])?,
            shifts: int(at[10])?,
        })
    }

    fn load_tile(&mut self, tile: usize) {
        // decoding waits until a triangle needs the tile
        let tmem = self.tiles[tile].tmem;
        self.tmem.insert(tmem, self.current_texture.clone());
    }

    fn load_tlut(&mut self, tile: usize, count: i64) {
        let name = self.current_texture.clone();
        self.tmem.insert(self.tiles[tile].tmem, name.clone());
        self.load_texture(&name, tile, true, count.max(0) as u32);
    }

    fn load_tlut_pal(&mut self, name: &str, count: i64) {
        self.current_texture = name.trim_start_matches('&').to_string();
        let load_tile = gbi::G_TX_LOADTILE as usize;
        self.tiles[load_tile] = Tile { line: 0, tmem: TLUT_TMEM, ..Default::default() };
        self.load_tlut(load_tile, count);
    }

    /// Shared expansion of the texture load macros. Arguments are
    /// `timg, tmem, rtile, fmt, siz, width, height, pal, cms, cmt, masks,
    /// maskt, shifts, shiftt`.
    fn load_multi_block(&mut self, command: &Command, is_4bit: bool) -> Result<()> {
        command.expect_args(14)?;
        let siz = self.tile_size(command, 4)?;
        let width = self.int(command, 5)?;
        let height = self.int(command, 6)?;
        let render_tile = self.tile_index(command, 2)?;
        for (what, v) in [("width", width), ("height", height)] {
            if !(1..=MAX_TEXTURE_DIM).contains(&v) {
                return Err(F3dError::malformed(&command.name, format!("{} {}", what, v)));
            }
        }

        let line = if is_4bit {
            ((width >> 1) + 7) >> 3
        } else {
            ((width * siz.line_bytes() as i64) + 7) >> 3
        };
        if line > MAX_TILE_WORDS as i64 {
            return Err(F3dError::malformed(&command.name, format!("line {} does not fit 9 bits", line)));
        }
        let load_siz = if is_4bit { TileSize::Bits16 } else { siz.load_block() };

        self.current_texture = command.text(0)?.trim_start_matches('&').to_string();

        let mut tile = self.tile_from_args(command, [3, 4, 1, 1, 7, 9, 11, 13, 8, 10, 12])?;
        let load_tile = gbi::G_TX_LOADTILE as usize;
        self.tiles[load_tile] = Tile { siz: load_siz, line: 0, palette: 0, ..tile.clone() };
        self.load_tile(load_tile);

        tile.line = line as u32;
        tile.palette = 0;
        self.tiles[render_tile] = tile;
        self.tile_sizes[render_tile] = TileBounds { uls: 0, ult: 0, lrs: (width - 1) << 2, lrt: (height - 1) << 2 };
        Ok(())
    }

    /// Decodes `name` through the tile's format, once per name.
    fn load_texture(&mut self, name: &str, tile_index: usize, is_lut: bool, count: u32) {
        if self.textures.contains_key(name) {
            return;
        }
        let tile = &self.tiles[tile_index];
        let request = if is_lut {
            let fmt = match self.material.other_mode("G_MDSFT_TEXTLUT") {
                Some("G_TT_IA16") => TileFormat::Ia,
                _ => TileFormat::Rgba,
            };
            TextureRequest { fmt, siz: TileSize::Bits16, width: 16, height: (count + 1).div_ceil(16), is_lut }
        } else {
            TextureRequest {
                fmt: tile.fmt,
                siz: tile.siz,
                width: tile.texel_width(),
                height: self.tile_sizes[tile_index].reference_size()[1],
                is_lut,
            }
        };

        let entry = if self.tweakables.disable_textures {
            TextureEntry::Reference { name: name.to_string(), width: request.width }
        } else {
            match self.source.texture(name, request) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(target: "F3D", "{} texture {} not loaded: {}", self.command_prefix, name, e);
                    TextureEntry::Reference { name: name.to_string(), width: request.width }
                },
            }
        };
        debug!(target: "F3D", "{} loaded texture {} ({:?})", self.command_prefix, name, request);
        self.textures.insert(name.to_string(), entry);
    }

    fn apply_tile_to_material(&mut self, index: usize, name: &str) {
        let tile = &self.tiles[index];
        let bounds = self.tile_sizes[index];
        let slot = &mut self.material.tex[index];

        match self.textures.get(name) {
            Some(TextureEntry::Image(_)) => {
                slot.image = Some(name.to_string());
                slot.reference = None;
            },
            _ => {
                slot.image = None;
                slot.reference = Some(name.to_string());
                slot.reference_size = bounds.reference_size();
            },
        }
        slot.set = true;
        slot.format = tile.format_name();

        slot.s = TileAxis { clamp: tile.cms.0, mirror: tile.cms.1, mask: tile.masks, shift: tile.shifts, low: bounds.uls, high: bounds.lrs };
        slot.t = TileAxis { clamp: tile.cmt.0, mirror: tile.cmt.1, mask: tile.maskt, shift: tile.shiftt, low: bounds.ult, high: bounds.lrt };
    }

    /// Applies the palette at TMEM 256 to a CI texture slot. Reference
    /// palettes are recorded on the slot instead.
    fn apply_tlut_to_index(&mut self, index: usize) {
        if !self.material.tex[index].is_ci() {
            return;
        }
        let tlut_name = match self.tmem.get(&TLUT_TMEM) {
            Some(name) => name.clone(),
            None => {
                debug!(target: "F3D", "{} no TLUT loaded for tex{}", self.command_prefix, index);
                return;
            },
        };
        let tlut = match self.textures.get(&tlut_name) {
            Some(entry) => entry.clone(),
            None => return,
        };
        let uses_texel = self.material.uses_texel(index);
        let slot = &mut self.material.tex[index];

        if tlut.is_reference() || slot.reference.is_some() {
            if slot.reference.is_none() {
                slot.reference = slot.image.clone();
            }
            slot.pal_reference = Some(match &tlut {
                TextureEntry::Reference { name, width } => (name.clone(), *width),
                TextureEntry::Image(img) => (tlut_name.clone(), (img.width * img.height).min(256)),
            });
        }

        let palette = match &tlut {
            TextureEntry::Image(img) => img,
            TextureEntry::Reference { .. } => return,
        };
        let image = match (&slot.image, slot.set) {
            (Some(image), true) => image.clone(),
            _ => return,
        };
        let full_color_file = self.source.is_image_file(&image) && self.settings.ci_images_stored_as_full_color;
        if !uses_texel || self.tlut_applied.contains(&image) || full_color_file {
            return;
        }

        if let Some(TextureEntry::Image(target)) = self.textures.get_mut(&image) {
            debug!(target: "F3D", "{} applying TLUT {} to {}", self.command_prefix, tlut_name, image);
            apply_palette(target, palette);
            self.tlut_applied.insert(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::CSource;

    fn context(text: &str) -> F3dContext<CSource> {
        let settings = ImportSettings::default();
        let source = CSource::new(text, &settings).unwrap();
        F3dContext::new(source, settings)
    }

    #[test]
    fn vertex_references() {
        let u = Ucode::F3dex2;
        assert_eq!(parse_vertex_reference("&verts[3]", u).unwrap(), ("verts".to_string(), 3));
        assert_eq!(parse_vertex_reference("verts + 3", u).unwrap(), ("verts".to_string(), 3));
        assert_eq!(parse_vertex_reference("&verts[1] + 2", u).unwrap(), ("verts".to_string(), 3));
        assert_eq!(parse_vertex_reference("vtx_00001000", u).unwrap(), ("vtx_00001000".to_string(), 0));
        assert!(parse_vertex_reference("&[3]", u).is_err());
    }

    #[test]
    fn floor_division() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(-8, 2), -4);
    }

    #[test]
    fn geometry_mode_commands() {
        let mut ctx = context("");
        let set = Command::new("gsSPSetGeometryMode", vec!["G_FOG | G_TEXTURE_GEN".into()]);
        ctx.process_command(&set).unwrap();
        assert!(ctx.material().geometry_mode.contains(GeometryMode::FOG | GeometryMode::TEXTURE_GEN));

        let both = Command::new("gsSPGeometryMode", vec!["G_FOG".into(), "G_CULL_FRONT".into()]);
        ctx.process_command(&both).unwrap();
        assert!(!ctx.material().geometry_mode.contains(GeometryMode::FOG));
        assert!(ctx.material().geometry_mode.contains(GeometryMode::CULL_FRONT));

        let load = Command::new("gsSPLoadGeometryMode", vec!["G_ZBUFFER".into()]);
        ctx.process_command(&load).unwrap();
        assert_eq!(ctx.material().geometry_mode, GeometryMode::ZBUFFER);
    }

    #[test]
    fn other_mode_fields() {
        let mut ctx = context("");
        // G_SETOTHERMODE_H covering CYCLETYPE with G_CYC_2CYCLE
        let cmd = Command::new("gsSPSetOtherMode", vec![
            "G_SETOTHERMODE_H".into(),
            Arg::Int(20),
            Arg::Int(2),
            Arg::Int(1 << 20),
        ]);
        ctx.process_command(&cmd).unwrap();
        assert_eq!(ctx.material().other_mode("G_MDSFT_CYCLETYPE"), Some("G_CYC_2CYCLE"));
        assert_eq!(ctx.material().other_mode("G_MDSFT_TEXTFILT"), Some("G_TF_POINT"));

        let cmd = Command::new("gsDPSetTextureFilter", vec!["G_TF_BILERP".into()]);
        ctx.process_command(&cmd).unwrap();
        assert_eq!(ctx.material().other_mode("G_MDSFT_TEXTFILT"), Some("G_TF_BILERP"));
    }

    #[test]
    fn render_mode_and_combiner() {
        let mut ctx = context("");
        let cmd = Command::new("gsDPSetRenderMode", vec!["G_RM_AA_ZB_XLU_SURF".into(), "G_RM_AA_ZB_XLU_SURF2".into()]);
        ctx.process_command(&cmd).unwrap();
        assert!(ctx.material().render_mode.preset.is_some());
        assert_eq!(ctx.material().render_mode.flags.zmode, "ZMODE_XLU");

        let cmd = Command::new("gsDPSetCombineMode", vec!["G_CC_MODULATERGBA".into(), "G_CC_NOT_A_MODE".into()]);
        ctx.process_command(&cmd).unwrap();
        assert_eq!(ctx.material().combiner1[0], "TEXEL0");
        assert_eq!(ctx.material().combiner2[3], "SHADE");

        let lerp: Vec<Arg> = [1, 15, 4, 7, 1, 7, 4, 7].iter().chain([0, 0, 0, 4, 0, 0, 0, 4].iter()).map(|v| Arg::Int(*v)).collect();
        ctx.process_command(&Command::new("gsDPSetCombineLERP", lerp)).unwrap();
        assert_eq!(ctx.material().combiner1[..4], ["TEXEL0", "0", "SHADE", "0"]);
        assert_eq!(ctx.material().combiner2[3], "SHADE");
    }

    #[test]
    fn malformed_operands_are_skipped() {
        let mut ctx = context("");
        let before = ctx.material().clone();
        let cmd = Command::new("gsDPSetEnvColor", vec!["0xGG".into(), "0".into(), "0".into(), "0".into()]);
        assert!(ctx.process_command(&cmd).is_ok());
        assert_eq!(ctx.material().env_color, before.env_color);
        let short = Command::new("gsDPSetPrimColor", vec![Arg::Int(0)]);
        assert!(ctx.process_command(&short).is_ok());
        assert_eq!(ctx.material().prim_color, None);
    }

    #[test]
    fn texture_scale() {
        let mut ctx = context("");
        let cmd = Command::new("gsSPTexture", vec![Arg::Int(0xFFFF), Arg::Int(0xFFFF), Arg::Int(0), Arg::Int(0), Arg::Int(1)]);
        ctx.process_command(&cmd).unwrap();
        assert_eq!(ctx.material().tex_scale, Floats([1.0, 1.0]));
        let cmd = Command::new("gsSPTexture", vec![Arg::Int(0x8000), Arg::Int(0x4000), Arg::Int(2), Arg::Int(0), Arg::Int(1)]);
        ctx.process_command(&cmd).unwrap();
        assert_eq!(ctx.material().tex_scale, Floats([0.5, 0.25]));
        assert_eq!(ctx.material().mipmaps, 3);
    }

    #[test]
    fn light_color_and_count() {
        let mut ctx = context("");
        ctx.process_command(&Command::new("gsSPNumLights", vec!["NUMLIGHTS_1".into()])).unwrap();
        ctx.process_command(&Command::new("gsSPLightColor", vec!["LIGHT_1".into(), Arg::Int(0xFF00_0000)])).unwrap();
        ctx.process_command(&Command::new("gsSPLightColor", vec!["LIGHT_2".into(), Arg::Int(0x00FF_0000)])).unwrap();
        assert_eq!(ctx.num_lights(), 1);
        assert_eq!(ctx.lights().lights[0].color, Floats([1.0, 0.0, 0.0]));
        assert_eq!(ctx.lights().ambient, Floats([0.0, 1.0, 0.0]));
    }

    #[test]
    fn lights_can_be_disabled() {
        let mut ctx = context("");
        ctx.set_tweakables(Tweakables { disable_lighting: true, ..Default::default() });
        ctx.process_command(&Command::new("gsSPLightColor", vec!["LIGHT_1".into(), Arg::Int(0xFF00_0000)])).unwrap();
        assert_eq!(ctx.lights().lights[0].color, Floats([0.0, 0.0, 0.0]));
    }

    #[test]
    fn load_texture_block_sets_tiles() {
        let mut ctx = context("");
        let args: Vec<Arg> = [
            "tex", "G_IM_FMT_RGBA", "G_IM_SIZ_16b", "32", "16", "0",
            "G_TX_WRAP | G_TX_NOMIRROR", "G_TX_CLAMP", "5", "4", "G_TX_NOLOD", "G_TX_NOLOD",
        ].iter().map(|s| Arg::from(*s)).collect();
        ctx.process_command(&Command::new("gsDPLoadTextureBlock", args)).unwrap();

        let tiles = ctx.tiles();
        assert_eq!(tiles[7].siz, TileSize::Bits16);
        assert_eq!(tiles[0].line, 8);
        assert_eq!(tiles[0].cmt, (true, false));
        assert_eq!(tiles[0].masks, 5);
        assert_eq!(tiles[0].maskt, 4);
        assert_eq!(ctx.tile_sizes()[0], TileBounds { uls: 0, ult: 0, lrs: 31 << 2, lrt: 15 << 2 });
        assert_eq!(ctx.tmem.get(&0).map(|s| s.as_str()), Some("tex"));
    }

    #[test]
    fn load_texture_tile_4b_argument_order() {
        let mut ctx = context("");
        let args: Vec<Arg> = [
            "tex", "G_IM_FMT_CI", "16", "8", "0", "0", "15", "7", "0",
            "G_TX_CLAMP", "G_TX_MIRROR", "4", "3", "G_TX_NOLOD", "G_TX_NOLOD",
        ].iter().map(|s| Arg::from(*s)).collect();
        ctx.process_command(&Command::new("gsDPLoadTextureTile_4b", args)).unwrap();

        let tile = &ctx.tiles()[0];
        assert_eq!(tile.fmt, TileFormat::Ci);
        assert_eq!(tile.siz, TileSize::Bits4);
        assert_eq!(tile.cms, (true, false));
        assert_eq!(tile.cmt, (false, true));
        assert_eq!((tile.masks, tile.maskt), (4, 3));
        assert_eq!(ctx.tile_sizes()[0].lrs, 15 << 2);
    }

    #[test]
    fn light_past_the_directional_slots_is_skipped() {
        let mut ctx = context("");
        ctx.process_command(&Command::new("gsSPNumLights", vec!["NUMLIGHTS_1".into()])).unwrap();
        let before = ctx.lights().clone();
        ctx.process_command(&Command::new("gsSPLightColor", vec!["LIGHT_8".into(), Arg::Int(0xFF00_00FF)])).unwrap();
        assert_eq!(ctx.num_lights(), 1);
        assert_eq!(ctx.lights().lights, before.lights);
        assert_eq!(ctx.lights().ambient, before.ambient);

        // with seven lights, LIGHT_8 is the ambient slot
        ctx.process_command(&Command::new("gsSPNumLights", vec!["NUMLIGHTS_7".into()])).unwrap();
        ctx.process_command(&Command::new("gsSPLightColor", vec!["LIGHT_8".into(), Arg::Int(0x00FF_0000)])).unwrap();
        assert_eq!(ctx.lights().ambient, Floats([0.0, 1.0, 0.0]));
    }

    #[test]
    fn oversized_tile_line_is_skipped() {
        let mut ctx = context("");
        let args: Vec<Arg> = [
            "G_IM_FMT_RGBA", "G_IM_SIZ_16b", "0x40000000", "0", "G_TX_RENDERTILE", "0",
            "G_TX_CLAMP", "5", "G_TX_NOLOD", "G_TX_CLAMP", "5", "G_TX_NOLOD",
        ].iter().map(|s| Arg::from(*s)).collect();
        ctx.process_command(&Command::new("gsDPSetTile", args)).unwrap();
        assert_eq!(ctx.tiles()[0], Tile::default());

        let args: Vec<Arg> = [
            "G_IM_FMT_RGBA", "G_IM_SIZ_16b", "0", "512", "G_TX_RENDERTILE", "0",
            "G_TX_CLAMP", "5", "G_TX_NOLOD", "G_TX_CLAMP", "5", "G_TX_NOLOD",
        ].iter().map(|s| Arg::from(*s)).collect();
        ctx.process_command(&Command::new("gsDPSetTile", args)).unwrap();
        assert_eq!(ctx.tiles()[0], Tile::default());
    }

    #[test]
    fn oversized_texture_load_is_skipped() {
        let mut ctx = context("");
        let args: Vec<Arg> = [
            "tex", "G_IM_FMT_RGBA", "G_IM_SIZ_16b", "0x7FFFFFFF", "16", "0",
            "G_TX_WRAP", "G_TX_CLAMP", "5", "4", "G_TX_NOLOD", "G_TX_NOLOD",
        ].iter().map(|s| Arg::from(*s)).collect();
        ctx.process_command(&Command::new("gsDPLoadTextureBlock", args)).unwrap();
        assert_eq!(ctx.tiles()[0], Tile::default());
        assert_eq!(ctx.tiles()[7], Tile::default());

        // 1024 texels of 16b need 256 words of line
        let args: Vec<Arg> = [
            "tex", "G_IM_FMT_RGBA", "G_IM_SIZ_16b", "1024", "1", "0",
            "G_TX_WRAP", "G_TX_CLAMP", "0", "0", "G_TX_NOLOD", "G_TX_NOLOD",
        ].iter().map(|s| Arg::from(*s)).collect();
        ctx.process_command(&Command::new("gsDPLoadTextureBlock", args)).unwrap();
        assert_eq!(ctx.tiles()[0].line, 256);
    }
}
