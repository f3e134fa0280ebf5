//! Output model: the vertex buffer, emitted vertices and triangles, and the
//! deduplicated material list.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[allow(unused_imports)]
use tracing::{trace, debug, error, info, warn};

use crate::error::{F3dError, Result};
use crate::interp::material::MaterialState;

/// An N64 `Vtx` as loaded by `G_VTX`. The last four bytes hold either a
/// prelit color or a signed normal plus alpha, depending on lighting; the
/// flag word carries F3DEX3 packed normals.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [i16; 3],
    pub flag: u16,
    pub texcoord: [i16; 2],
    pub color_or_normal: [u8; 4],
}

pub const VERTEX_SIZE: usize = std::mem::size_of::<Vertex>();

impl Vertex {
    pub fn new(position: [i16; 3], flag: u16, texcoord: [i16; 2], color_or_normal: [u8; 4]) -> Vertex {
        Vertex { position, flag, texcoord, color_or_normal }
    }

    /// Decodes a 16-byte big-endian record.
    pub fn from_be_bytes(bytes: &[u8]) -> Vertex {
        let mut v: Vertex = bytemuck::pod_read_unaligned(&bytes[..VERTEX_SIZE]);
        v.position = v.position.map(i16::from_be);
        v.flag = u16::from_be(v.flag);
        v.texcoord = v.texcoord.map(i16::from_be);
        v
    }

    pub fn rgb(&self) -> [u8; 3] {
        [self.color_or_normal[0], self.color_or_normal[1], self.color_or_normal[2]]
    }

    pub fn alpha(&self) -> u8 {
        self.color_or_normal[3]
    }
}

/// A vertex buffer slot: the vertex plus the transform active when it was loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferVertex {
    pub vertex: Vertex,
    pub transform: String,
}

/// Final vertex with the transform, UV scaling and color/normal split applied.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OutputVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 3],
    pub normal: [f32; 3],
    pub alpha: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub indices: [u32; 3],
    pub material: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
}

/// Result of one traversal.
#[derive(Debug, Clone)]
pub struct ImportedMesh {
    pub vertices: Vec<OutputVertex>,
    pub triangles: Vec<Triangle>,
    pub materials: Vec<Arc<MaterialState>>,
    pub textures: BTreeMap<String, TextureInfo>,
    /// Output vertex indices by the transform they were loaded under.
    pub limb_groups: BTreeMap<String, Vec<u32>>,
    pub vertex_buffer: Vec<Option<BufferVertex>>,
}

impl ImportedMesh {
    /// Vertex data as raw bytes, for handing to a GPU buffer or a file.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }
}

pub struct MeshBuilder {
    pub vertex_buffer: Vec<Option<BufferVertex>>,
    vertices: Vec<OutputVertex>,
    triangles: Vec<Triangle>,
    materials: Vec<Arc<MaterialState>>,
    // survives clear_geometry so repeated imports share frozen materials
    material_dict: HashMap<MaterialState, Arc<MaterialState>>,
    limb_groups: BTreeMap<String, Vec<u32>>,
}

impl MeshBuilder {
    pub fn new(buffer_size: usize) -> MeshBuilder {
        MeshBuilder {
            vertex_buffer: vec![None; buffer_size],
            vertices: Vec::new(),
            triangles: Vec::new(),
            materials: Vec::new(),
            material_dict: HashMap::new(),
            limb_groups: BTreeMap::new(),
        }
    }

    /// Copies `count` vertices from `data[offset..]` into buffer slots
    /// starting at `start`, tagging them with `transform`.
    pub fn add_vertices(&mut self, count: usize, start: usize, source_name: &str, offset: usize, data: &[Vertex], transform: &str) -> Result<()> {
        if start + count > self.vertex_buffer.len() {
            return Err(F3dError::OutOfRange {
                what: format!("vertex buffer of size {} too small", self.vertex_buffer.len()),
                start,
                end: start + count,
                len: self.vertex_buffer.len(),
            });
        }
        if offset + count > data.len() {
            return Err(F3dError::OutOfRange {
                what: format!("vertex data {} read out of bounds", source_name),
                start: offset,
                end: offset + count,
                len: data.len(),
            });
        }

        for (slot, vertex) in self.vertex_buffer[start..start + count].iter_mut().zip(&data[offset..offset + count]) {
            *slot = Some(BufferVertex { vertex: *vertex, transform: transform.to_string() });
        }
        Ok(())
    }

    pub fn buffer_vertex(&self, index: usize) -> Result<&BufferVertex> {
        let len = self.vertex_buffer.len();
        self.vertex_buffer
            .get(index)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| F3dError::OutOfRange { what: "vertex buffer slot not loaded".to_string(), start: index, end: index + 1, len })
    }

    /// Appends resolved vertices and one triangle per three of them, all
    /// tagged with `material`.
    pub fn add_triangle(&mut self, verts: Vec<(OutputVertex, String)>, material: usize) {
        let base = self.vertices.len() as u32;
        for (i, (vertex, group)) in verts.into_iter().enumerate() {
            self.limb_groups.entry(group).or_default().push(base + i as u32);
            self.vertices.push(vertex);
        }

        let added = self.vertices.len() as u32 - base;
        for t in 0..added / 3 {
            let first = base + 3 * t;
            self.triangles.push(Triangle { indices: [first, first + 1, first + 2], material });
        }
    }

    /// Index of the material equal to `state`, freezing a copy when it has
    /// not been seen before.
    pub fn get_or_create_material(&mut self, state: &MaterialState) -> usize {
        if let Some(frozen) = self.material_dict.get(state) {
            if let Some(i) = self.materials.iter().position(|m| Arc::ptr_eq(m, frozen)) {
                return i;
            }
            // frozen by an earlier import
            self.materials.push(Arc::clone(frozen));
            return self.materials.len() - 1;
        }

        let frozen = Arc::new(state.clone());
        self.material_dict.insert(state.clone(), Arc::clone(&frozen));
        self.materials.push(frozen);
        debug!(target: "F3D", "new material {}", self.materials.len() - 1);
        self.materials.len() - 1
    }

    pub fn materials(&self) -> &[Arc<MaterialState>] {
        &self.materials
    }

    pub fn vertices(&self) -> &[OutputVertex] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Resets per-import output. Frozen materials stay cached.
    pub fn clear_geometry(&mut self) {
        self.vertex_buffer.iter_mut().for_each(|slot| *slot = None);
        self.vertices.clear();
        self.triangles.clear();
        self.materials.clear();
        self.limb_groups.clear();
    }

    pub fn build(&self, textures: BTreeMap<String, TextureInfo>) -> ImportedMesh {
        ImportedMesh {
            vertices: self.vertices.clone(),
            triangles: self.triangles.clone(),
            materials: self.materials.clone(),
            textures,
            limb_groups: self.limb_groups.clone(),
            vertex_buffer: self.vertex_buffer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(n: usize) -> Vec<Vertex> {
        (0..n).map(|i| Vertex::new([i as i16, 0, 0], 0, [0, 0], [255; 4])).collect()
    }

    #[test]
    fn vertex_layout() {
        assert_eq!(VERTEX_SIZE, 16);
        let bytes = [0x00, 0x01, 0xFF, 0xFE, 0x00, 0x03, 0x12, 0x34, 0x00, 0x20, 0xFF, 0xE0, 1, 2, 3, 4];
        let v = Vertex::from_be_bytes(&bytes);
        assert_eq!(v.position, [1, -2, 3]);
        assert_eq!(v.flag, 0x1234);
        assert_eq!(v.texcoord, [32, -32]);
        assert_eq!(v.rgb(), [1, 2, 3]);
        assert_eq!(v.alpha(), 4);
    }

    #[test]
    fn buffer_bounds() {
        let mut mesh = MeshBuilder::new(32);
        let verts = data(8);
        assert!(matches!(mesh.add_vertices(5, 30, "v", 0, &verts, "root"), Err(F3dError::OutOfRange { .. })));
        assert!(mesh.add_vertices(2, 30, "v", 0, &verts, "root").is_ok());
        assert!(matches!(mesh.add_vertices(4, 0, "v", 6, &verts, "root"), Err(F3dError::OutOfRange { .. })));
        assert_eq!(mesh.buffer_vertex(31).unwrap().vertex.position[0], 1);
        assert!(mesh.buffer_vertex(0).is_err());
        assert!(mesh.buffer_vertex(40).is_err());
    }

    #[test]
    fn material_is_idempotent() {
        let mut mesh = MeshBuilder::new(32);
        let a = MaterialState::default();
        let mut b = MaterialState::default();
        b.key = true;
        assert_eq!(mesh.get_or_create_material(&a), 0);
        assert_eq!(mesh.get_or_create_material(&a), 0);
        assert_eq!(mesh.get_or_create_material(&b), 1);
        assert_eq!(mesh.get_or_create_material(&a), 0);
        assert_eq!(mesh.materials().len(), 2);

        // cached across imports, re-listed on first use
        mesh.clear_geometry();
        assert_eq!(mesh.get_or_create_material(&b), 0);
        assert_eq!(mesh.materials().len(), 1);
    }

    #[test]
    fn triangles_and_groups() {
        let mut mesh = MeshBuilder::new(32);
        let v = OutputVertex::default();
        let verts = (0..6).map(|i| (v, if i < 3 { "a".to_string() } else { "b".to_string() })).collect();
        mesh.add_triangle(verts, 0);
        assert_eq!(mesh.triangles().len(), 2);
        assert_eq!(mesh.triangles()[1].indices, [3, 4, 5]);
        let out = mesh.build(BTreeMap::new());
        assert_eq!(out.limb_groups["a"], vec![0, 1, 2]);
        assert_eq!(out.limb_groups["b"], vec![3, 4, 5]);
        assert_eq!(out.vertex_bytes().len(), 6 * std::mem::size_of::<OutputVertex>());
    }
}
