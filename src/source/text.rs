//! C source front-end. Declarations are located by pattern over the whole
//! text blob, the same way a reader would grep a decomp's `.c` files.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cgmath::Matrix4;
use regex::Regex;

#[allow(unused_imports)]
use tracing::{trace, debug, error, info, warn};

use crate::command::{eval_expr, Arg, Command};
use crate::error::{F3dError, Result};
use crate::fixed::decode_mtx;
use crate::gbi::Ucode;
use crate::interp::light::LightSet;
use crate::model::Vertex;
use crate::source::{AssetSource, TextureRequest};
use crate::texture::{decode_texture, flip_vertical, TextureEntry};
use crate::ImportSettings;

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| F3dError::malformed("pattern", e.to_string()))
}

const VTX_FIELD: &str = r"([^,}]*)";

/// Splits a `Gfx` body into macro invocations. Only the outermost
/// parentheses delimit a macro; commas between macros are dropped.
pub fn parse_macro_list(data: &str) -> Vec<Command> {
    let mut commands = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut name: Option<String> = None;

    for (end, c) in data.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => continue,
        }

        if name.is_none() {
            if depth > 0 {
                let n = data[start..end].trim();
                name = Some(n.strip_prefix(',').unwrap_or(n).trim().to_string());
                start = end + 1;
            }
        } else if depth == 0 {
            if let Some(n) = name.take() {
                let args = parse_macro_args(&data[start..end]).into_iter().map(Arg::Text).collect();
                commands.push(Command::new(n, args));
            }
            start = end + 1;
        }
    }
    commands
}

/// Splits macro arguments on top-level commas and removes all whitespace.
pub fn parse_macro_args(data: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, b) in data.bytes().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {},
        }
        let last = i == data.len() - 1;
        if (b == b',' || last) && depth == 0 {
            let end = if b == b',' { i } else { data.len() };
            params.push(data[start..end].split_whitespace().collect::<String>());
            start = i + 1;
        }
    }
    params
}

/// Removes `//` and `/* */` comments, leaving string literals alone.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(n) = chars.next() {
                        out.push(n);
                    }
                },
                '"' => in_string = false,
                _ => {},
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            },
            ('/', Some('/')) => {
                while let Some(&n) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
            },
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                out.push(' ');
            },
            _ => out.push(c),
        }
    }
    out
}

/// Bytes per element of a C texture array type.
fn element_size(c_type: &str) -> usize {
    match c_type {
        "u8" | "s8" | "char" | "Texture" => 1,
        "u16" | "s16" | "short" => 2,
        "u32" | "s32" | "int" => 4,
        _ => 8,
    }
}

pub struct CSource {
    text: String,
    ucode: Ucode,
    base_path: Option<PathBuf>,
    vertices: HashMap<String, Arc<Vec<Vertex>>>,
    matrices: HashMap<String, Matrix4<f32>>,
    image_files: HashSet<String>,
}

impl CSource {
    pub fn new(text: &str, settings: &ImportSettings) -> Result<CSource> {
        let text = strip_comments(text);
        let matrices = parse_matrices(&text, settings.ucode, settings.scale)?;
        debug!(target: "F3D", "C source: {} bytes, {} matrices", text.len(), matrices.len());

        Ok(CSource {
            text,
            ucode: settings.ucode,
            base_path: settings.base_path.clone(),
            vertices: HashMap::new(),
            matrices,
            image_files: HashSet::new(),
        })
    }

    /// Concatenates the given files. Missing files are skipped.
    pub fn from_files<P: AsRef<Path>>(paths: &[P], settings: &ImportSettings) -> Result<CSource> {
        let mut text = String::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                warn!(target: "F3D", "skipping missing file {}", path.display());
                continue;
            }
            text.push_str(&std::fs::read_to_string(path)?);
            text.push('\n');
        }
        CSource::new(&text, settings)
    }

    pub fn matrix_names(&self) -> impl Iterator<Item = &str> {
        self.matrices.keys().map(|k| k.as_str())
    }

    fn eval(&self, what: &str, value: &str) -> Result<i64> {
        eval_expr(value, self.ucode).map_err(|detail| F3dError::malformed(what, detail))
    }

    fn include_path(&self, include: &str, kind: &'static str) -> Result<PathBuf> {
        let base = self.base_path.as_ref().ok_or_else(|| F3dError::MissingDeclaration {
            kind,
            name: format!("{} (no base path)", include),
        })?;
        let relative = base.join(include);
        if relative.exists() {
            return Ok(relative);
        }
        let file_name = Path::new(include).file_name().unwrap_or_default();
        Ok(base.join(file_name))
    }

    fn parse_vertices(&self, name: &str) -> Result<Vec<Vertex>> {
        let pattern = format!(r"(?s)Vtx\s*{}\s*\[\s*[0-9x]*\s*\]\s*=\s*\{{([^;]*);", regex::escape(name));
        let caps = regex(&pattern)?
            .captures(&self.text)
            .ok_or_else(|| F3dError::MissingDeclaration { kind: "vertex list", name: name.to_string() })?;
        let mut data = caps[1].to_string();

        let include = regex(r#"#include\s*"([^"]*)""#)?.captures(&data).map(|c| c[1].to_string());
        if let Some(include) = include {
            let path = self.include_path(&include, "vertex include")?;
            data = std::fs::read_to_string(&path).map_err(|_| F3dError::MissingDeclaration {
                kind: "vertex include",
                name: path.display().to_string(),
            })?;
        }

        let f = VTX_FIELD;
        let patterns = [
            // decomp: {{{x, y, z}, flag, {s, t}, {r, g, b, a}}}
            format!(r"\{{\s*\{{\s*\{{{f},{f},{f}\}}\s*,{f},\s*\{{{f},{f}\}}\s*,\s*\{{{f},{f},{f},{f}\}}\s*\}}\s*\}}"),
            // nusys: {x, y, z, flag, s, t, r, g, b, a}
            format!(r"\{{\s*{f},{f},{f},{f},{f},{f},{f},{f},{f},{f}\s*\}}"),
        ];

        for pattern in patterns.iter() {
            let mut out = Vec::new();
            for caps in regex(pattern)?.captures_iter(&data) {
                let mut values = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|m| self.eval(name, m.as_str().trim()))
                    .collect::<Result<Vec<i64>>>()?;
                if values.len() == 9 {
                    values.insert(3, 0);
                }
                if values.len() != 10 {
                    return Err(F3dError::malformed(name, format!("vertex with {} fields", values.len())));
                }
                out.push(Vertex::new(
                    [values[0] as i16, values[1] as i16, values[2] as i16],
                    values[3] as u16,
                    [values[4] as i16, values[5] as i16],
                    [values[6] as u8, values[7] as u8, values[8] as u8, values[9] as u8],
                ));
            }
            if !out.is_empty() {
                return Ok(out);
            }
        }
        Ok(Vec::new())
    }

    fn load_image_include(&mut self, name: &str, include: &str, width: u32, is_lut: bool) -> Result<TextureEntry> {
        let png = match include.strip_suffix("inc.c") {
            Some(stem) => format!("{}png", stem),
            None => include.to_string(),
        };
        let path = match self.include_path(&png, "texture include") {
            Ok(path) => path,
            Err(e) => {
                warn!(target: "F3D", "{}: {}", name, e);
                return Ok(TextureEntry::Reference { name: name.to_string(), width });
            },
        };

        #[cfg(feature = "png")]
        {
            return match crate::texture::DecodedTexture::load_png(&path, is_lut) {
                Ok(image) => {
                    self.image_files.insert(name.to_string());
                    Ok(TextureEntry::Image(image))
                },
                Err(e) => {
                    warn!(target: "F3D", "cannot load {}: {}", path.display(), e);
                    Ok(TextureEntry::Reference { name: name.to_string(), width })
                },
            };
        }

        #[cfg(not(feature = "png"))]
        {
            let _ = is_lut;
            warn!(target: "F3D", "image support disabled, {} stays a reference", path.display());
            Ok(TextureEntry::Reference { name: name.to_string(), width })
        }
    }
}

fn parse_matrices(text: &str, ucode: Ucode, scale: f32) -> Result<HashMap<String, Matrix4<f32>>> {
    let scale = if scale != 0.0 { scale } else { 1.0 };
    let mut out = HashMap::new();

    for caps in regex(r"(?s)Mtx\s*([a-zA-Z0-9_]+)\s*=\s*\{(.*?)\}\s*;")?.captures_iter(text) {
        let name = format!("&{}", &caps[1]);
        let values = caps[2]
            .split(',')
            .map(|v| v.trim().trim_matches(|c| c == '{' || c == '}').trim())
            .filter(|v| !v.is_empty())
            .map(|v| eval_expr(v, ucode).map_err(|detail| F3dError::malformed(&name, detail)))
            .collect::<Result<Vec<i64>>>()?;

        let words: [u32; 16] = match values.iter().map(|v| *v as u32).collect::<Vec<u32>>().try_into() {
            Ok(words) => words,
            Err(_) => {
                warn!(target: "F3D", "matrix {} has {} values, skipping", name, values.len());
                continue;
            },
        };
        out.insert(name, Matrix4::from_scale(1.0 / scale) * decode_mtx(&words));
    }
    Ok(out)
}

impl AssetSource for CSource {
    fn display_list(&mut self, name: &str) -> Result<Vec<Command>> {
        let pattern = format!(r"Gfx\s*{}\s*\[\s*\w*\s*\]\s*=\s*\{{([^}}]*)\}}", regex::escape(name));
        let caps = regex(&pattern)?
            .captures(&self.text)
            .ok_or_else(|| F3dError::MissingDeclaration { kind: "display list", name: name.to_string() })?;
        Ok(parse_macro_list(&caps[1]))
    }

    fn vertices(&mut self, name: &str) -> Result<Arc<Vec<Vertex>>> {
        if let Some(v) = self.vertices.get(name) {
            return Ok(Arc::clone(v));
        }
        let parsed = Arc::new(self.parse_vertices(name)?);
        trace!(target: "F3D", "parsed {} vertices from {}", parsed.len(), name);
        self.vertices.insert(name.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    fn lights(&mut self, name: &str) -> Result<LightSet> {
        let pattern = format!(r"(?s)Lights([0-9n])\s*{}\s*=\s*gdSPDefLights[0-9n]\s*\(([^)]*)\)\s*;", regex::escape(name));
        let caps = regex(&pattern)?
            .captures(&self.text)
            .ok_or_else(|| F3dError::MissingDeclaration { kind: "lights", name: name.to_string() })?;
        let values = caps[2]
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| self.eval(name, v))
            .collect::<Result<Vec<i64>>>()?;
        LightSet::from_values(name, &values)
    }

    fn matrix(&mut self, name: &str) -> Option<Matrix4<f32>> {
        self.matrices.get(name).copied()
    }

    fn texture(&mut self, name: &str, request: TextureRequest) -> Result<TextureEntry> {
        let bare = name.strip_prefix('&').unwrap_or(name);
        let pattern = format!(
            r"(?s)([A-Za-z0-9_]+)\s*{}\s*\[\s*[0-9a-fA-Fx]*\s*\]\s*=\s*\{{([^}}]*)\s*\}}\s*;",
            regex::escape(bare)
        );
        let caps = match regex(&pattern)?.captures(&self.text) {
            Some(caps) => caps,
            None => {
                debug!(target: "F3D", "cannot find texture named {}", name);
                return Ok(TextureEntry::Reference { name: name.to_string(), width: request.width });
            },
        };
        let c_type = caps[1].to_string();
        let data = caps[2].to_string();

        if let Some(include) = regex(r#"(?s)#include\s*"(.*?)""#)?.captures(&data) {
            return self.load_image_include(name, &include[1], request.width, request.is_lut);
        }

        let size = element_size(&c_type);
        let mut bytes = Vec::new();
        for value in data.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            let v = self.eval(name, value)? as u64;
            bytes.extend_from_slice(&v.to_be_bytes()[8 - size..]);
        }

        let mut image = decode_texture(&bytes, request.fmt, request.siz, request.width);
        if !request.is_lut {
            flip_vertical(&mut image);
        }
        Ok(TextureEntry::Image(image))
    }

    fn is_image_file(&self, name: &str) -> bool {
        self.image_files.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gbi::{TileFormat, TileSize};

    const SOURCE: &str = r#"
Vtx cube_vtx[3] = {
    {{{ -10, 0, 10 }, 0, { 0, 0 }, { 0xFF, 0x00, 0x00, 0xFF }}},
    {{{ 10, 0, 10 }, 0, { 992, 0 }, { 0x00, 0xFF, 0x00, 0xFF }}},
    {{{ 10, 0, -10 }, 0, { 992, 992 }, { 0x00, 0x00, 0xFF, 0x80 }}},
};

Vtx nusys_vtx[] = {
    { 1, 2, 3, 0, 4, 5, 6, 7, 8, 9 },
};

Lights1 cube_lights = gdSPDefLights1(
    0x3F, 0x3F, 0x3F,
    0xFF, 0xFF, 0xFF, 0x28, 0x28, 0x28);

u8 ci_tex[] = { 0x00, 0x01, 0x02, 0x03 };

Mtx ident = {
    0x00010000, 0x00000000, 0x00000001, 0x00000000,
    0x00000000, 0x00010000, 0x00000000, 0x00000001,
    0x00000000, 0x00000000, 0x00000000, 0x00000000,
    0x00000000, 0x00000000, 0x00000000, 0x00000000,
};

/* gsSPEndDisplayList() */
Gfx cube_dl[] = {
    gsDPPipeSync(),
    gsSPVertex(cube_vtx + 0, 3, 0), // load
    gsDPSetCombineMode(G_CC_SHADE, G_CC_SHADE),
    gsSP1Triangle(0, 1, 2, 0),
    gsSPEndDisplayList(),
};
"#;

    fn source() -> CSource {
        CSource::new(SOURCE, &ImportSettings::default()).unwrap()
    }

    #[test]
    fn macro_list_nesting() {
        let cmds = parse_macro_list("gsDPSetTile(G_IM_FMT_RGBA, (4 + 4) * 2, 0), gsSPEndDisplayList()");
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].name, "gsDPSetTile");
        assert_eq!(cmds[0].args, vec![Arg::from("G_IM_FMT_RGBA"), Arg::from("(4+4)*2"), Arg::from("0")]);
        assert_eq!(cmds[1].name, "gsSPEndDisplayList");
        assert!(cmds[1].args.is_empty());
    }

    #[test]
    fn macro_args() {
        assert_eq!(parse_macro_args(" a , b (1, 2) ,c"), vec!["a", "b(1,2)", "c"]);
        assert_eq!(parse_macro_args("x,"), vec!["x"]);
        assert!(parse_macro_args("").is_empty());
    }

    #[test]
    fn comments_are_stripped() {
        let s = strip_comments("a /* b */ c // d\n#include \"x//y.inc.c\"");
        assert_eq!(s, "a   c \n#include \"x//y.inc.c\"");
    }

    #[test]
    fn display_list_lookup() {
        let mut src = source();
        let cmds = src.display_list("cube_dl").unwrap();
        let names: Vec<_> = cmds.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["gsDPPipeSync", "gsSPVertex", "gsDPSetCombineMode", "gsSP1Triangle", "gsSPEndDisplayList"]);
        assert!(matches!(src.display_list("nope"), Err(F3dError::MissingDeclaration { .. })));
    }

    #[test]
    fn vertex_formats() {
        let mut src = source();
        let verts = src.vertices("cube_vtx").unwrap();
        assert_eq!(verts.len(), 3);
        assert_eq!(verts[0].position, [-10, 0, 10]);
        assert_eq!(verts[1].texcoord, [992, 0]);
        assert_eq!(verts[2].color_or_normal, [0, 0, 0xFF, 0x80]);

        let verts = src.vertices("nusys_vtx").unwrap();
        assert_eq!(verts.len(), 1);
        assert_eq!(verts[0].texcoord, [4, 5]);
        assert_eq!(verts[0].color_or_normal, [6, 7, 8, 9]);

        assert!(src.vertices("missing_vtx").unwrap_err().is_fatal());
    }

    #[test]
    fn lights_declaration() {
        let mut src = source();
        let set = src.lights("cube_lights").unwrap();
        assert_eq!(set.count, 1);
        assert_eq!(set.lights[0].color.0[0], 1.0);
    }

    #[test]
    fn texture_array_and_reference() {
        let mut src = source();
        let req = TextureRequest { fmt: TileFormat::Ci, siz: TileSize::Bits8, width: 2, height: 2, is_lut: false };
        match src.texture("ci_tex", req).unwrap() {
            TextureEntry::Image(img) => {
                assert_eq!((img.width, img.height), (2, 2));
                // bottom-up rows: the first stored row is the last declared one
                assert_eq!(img.rgba[0], 2.0 / 255.0);
            },
            other => panic!("unexpected {:?}", other),
        }
        assert!(src.texture("no_such_tex", req).unwrap().is_reference());
        assert!(!src.is_image_file("ci_tex"));
    }

    #[test]
    fn matrices_are_keyed_by_address() {
        let src = source();
        assert_eq!(src.matrix_names().collect::<Vec<_>>(), vec!["&ident"]);
        let mut src = src;
        let m = src.matrix("&ident").unwrap();
        assert_eq!(m, Matrix4::from_scale(1.0));
    }
}
