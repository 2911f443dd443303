use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::Serialize;

use super::{BlendMode, DepthMode, NodeType, KN5_MAGIC, KN5_VERSION};
use crate::scene::ShaderProperty;

const MAX_NODE_DEPTH: usize = 256;
const VERTEX_SIZE: usize = 11 * 4;

/// A parsed KN5 container.
#[derive(Debug, Clone, PartialEq)]
pub struct Kn5File {
    pub version: u32,
    pub textures: Vec<Kn5Texture>,
    pub materials: Vec<Kn5Material>,
    pub root: Kn5Node,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Kn5Texture {
    pub active: i32,
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Kn5Material {
    pub name: String,
    pub shader_name: String,
    pub alpha_blend_mode: BlendMode,
    pub alpha_tested: bool,
    pub depth_mode: DepthMode,
    pub properties: Vec<(String, ShaderProperty)>,
    pub texture_slots: Vec<Kn5TextureSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kn5TextureSlot {
    pub slot: String,
    pub position: u32,
    pub texture: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Kn5Node {
    pub name: String,
    pub kind: Kn5NodeKind,
    pub children: Vec<Kn5Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Kn5NodeKind {
    Node { active: bool, matrix: Mat4 },
    Mesh(Kn5Mesh),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Kn5Mesh {
    pub active: bool,
    pub cast_shadows: bool,
    pub visible: bool,
    pub transparent: bool,
    pub vertices: Vec<Kn5Vertex>,
    pub indices: Vec<u16>,
    pub material_id: u32,
    pub layer: u32,
    pub lod_in: f32,
    pub lod_out: f32,
    pub bounding_center: Vec3,
    pub bounding_radius: f32,
    pub renderable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kn5Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec3,
}

/// Condensed view of a container for reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kn5Summary {
    pub version: u32,
    pub textures: Vec<TextureSummary>,
    pub materials: Vec<String>,
    pub nodes: usize,
    pub meshes: usize,
    pub vertices: usize,
    pub triangles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextureSummary {
    pub name: String,
    pub bytes: usize,
}

impl Kn5File {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).with_context(|| format!("unable to open {}", path.display()))?;
        Self::from_bytes(&data).with_context(|| format!("invalid KN5 file {}", path.display()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);

        let magic = reader.take(KN5_MAGIC.len(), "magic")?;
        if magic != KN5_MAGIC {
            return Err(anyhow!(
                "invalid magic: expected {:?}, found {:?}",
                KN5_MAGIC,
                magic
            ));
        }
        let version = reader.u32()?;
        if version != KN5_VERSION {
            return Err(anyhow!("unsupported KN5 version {version}"));
        }

        let texture_count = reader.count_i32("texture")?;
        let mut textures = Vec::with_capacity(texture_count.min(1024));
        for index in 0..texture_count {
            textures.push(
                read_texture(&mut reader).with_context(|| format!("texture {index}"))?,
            );
        }

        let material_count = reader.count_i32("material")?;
        let mut materials = Vec::with_capacity(material_count.min(1024));
        for index in 0..material_count {
            materials.push(
                read_material(&mut reader).with_context(|| format!("material {index}"))?,
            );
        }

        let root = read_node(&mut reader, 0)?;
        if reader.remaining() != 0 {
            return Err(anyhow!(
                "{} trailing bytes after the node tree",
                reader.remaining()
            ));
        }

        Ok(Self {
            version,
            textures,
            materials,
            root,
        })
    }

    /// Every node, depth first, root included.
    pub fn nodes(&self) -> Vec<&Kn5Node> {
        let mut nodes = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(node.children.iter().rev());
        }
        nodes
    }

    pub fn meshes(&self) -> Vec<(&str, &Kn5Mesh)> {
        self.nodes()
            .into_iter()
            .filter_map(|node| match &node.kind {
                Kn5NodeKind::Mesh(mesh) => Some((node.name.as_str(), mesh)),
                Kn5NodeKind::Node { .. } => None,
            })
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&Kn5Node> {
        self.nodes().into_iter().find(|node| node.name == name)
    }

    pub fn summary(&self) -> Kn5Summary {
        let meshes = self.meshes();
        Kn5Summary {
            version: self.version,
            textures: self
                .textures
                .iter()
                .map(|texture| TextureSummary {
                    name: texture.name.clone(),
                    bytes: texture.data.len(),
                })
                .collect(),
            materials: self.materials.iter().map(|m| m.name.clone()).collect(),
            nodes: self.nodes().len(),
            meshes: meshes.len(),
            vertices: meshes.iter().map(|(_, mesh)| mesh.vertices.len()).sum(),
            triangles: meshes.iter().map(|(_, mesh)| mesh.indices.len() / 3).sum(),
        }
    }
}

impl Kn5Node {
    pub fn matrix(&self) -> Option<Mat4> {
        match self.kind {
            Kn5NodeKind::Node { matrix, .. } => Some(matrix),
            Kn5NodeKind::Mesh(_) => None,
        }
    }

    pub fn mesh(&self) -> Option<&Kn5Mesh> {
        match &self.kind {
            Kn5NodeKind::Mesh(mesh) => Some(mesh),
            Kn5NodeKind::Node { .. } => None,
        }
    }
}

fn read_texture(reader: &mut ByteReader<'_>) -> Result<Kn5Texture> {
    Ok(Kn5Texture {
        active: reader.i32()?,
        name: reader.string()?,
        data: reader.blob()?.to_vec(),
    })
}

fn read_material(reader: &mut ByteReader<'_>) -> Result<Kn5Material> {
    let name = reader.string()?;
    let shader_name = reader.string()?;
    let blend = reader.u8()?;
    let alpha_blend_mode =
        BlendMode::from_u8(blend).ok_or_else(|| anyhow!("unknown blend mode {blend}"))?;
    let alpha_tested = reader.bool()?;
    let depth = reader.i32()?;
    let depth_mode =
        DepthMode::from_i32(depth).ok_or_else(|| anyhow!("unknown depth mode {depth}"))?;

    let property_count = reader.u32()? as usize;
    let mut properties = Vec::new();
    for _ in 0..property_count {
        let name = reader.string()?;
        let value = ShaderProperty {
            value_a: reader.f32()?,
            value_b: reader.vec2()?,
            value_c: reader.vec3()?,
            value_d: reader.vec4()?,
        };
        properties.push((name, value));
    }

    let slot_count = reader.u32()? as usize;
    let mut texture_slots = Vec::new();
    for _ in 0..slot_count {
        texture_slots.push(Kn5TextureSlot {
            slot: reader.string()?,
            position: reader.u32()?,
            texture: reader.string()?,
        });
    }

    Ok(Kn5Material {
        name,
        shader_name,
        alpha_blend_mode,
        alpha_tested,
        depth_mode,
        properties,
        texture_slots,
    })
}

fn read_node(reader: &mut ByteReader<'_>, depth: usize) -> Result<Kn5Node> {
    if depth > MAX_NODE_DEPTH {
        return Err(anyhow!("node tree deeper than {MAX_NODE_DEPTH} levels"));
    }
    let offset = reader.offset;
    let raw_type = reader.u32()?;
    let node_type = NodeType::from_u32(raw_type)
        .ok_or_else(|| anyhow!("unknown node type {raw_type} at offset {offset}"))?;
    let name = reader.string()?;
    let child_count = reader.u32()? as usize;

    let kind = match node_type {
        NodeType::Node => Kn5NodeKind::Node {
            active: reader.bool()?,
            matrix: reader.matrix()?,
        },
        NodeType::Mesh => Kn5NodeKind::Mesh(
            read_mesh(reader).with_context(|| format!("mesh node {name}"))?,
        ),
        NodeType::SkinnedMesh => {
            return Err(anyhow!("skinned mesh node {name} is not supported"));
        }
    };

    let mut children = Vec::new();
    for _ in 0..child_count {
        children.push(read_node(reader, depth + 1)?);
    }
    Ok(Kn5Node {
        name,
        kind,
        children,
    })
}

fn read_mesh(reader: &mut ByteReader<'_>) -> Result<Kn5Mesh> {
    let active = reader.bool()?;
    let cast_shadows = reader.bool()?;
    let visible = reader.bool()?;
    let transparent = reader.bool()?;

    let vertex_count = reader.u32()? as usize;
    reader.ensure(vertex_count.saturating_mul(VERTEX_SIZE), "vertex data")?;
    let mut vertices = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        vertices.push(Kn5Vertex {
            position: reader.vec3()?,
            normal: reader.vec3()?,
            uv: reader.vec2()?,
            tangent: reader.vec3()?,
        });
    }

    let index_count = reader.u32()? as usize;
    reader.ensure(index_count.saturating_mul(2), "index data")?;
    let mut indices = Vec::with_capacity(index_count);
    for _ in 0..index_count {
        let index = reader.u16()?;
        if index as usize >= vertex_count {
            return Err(anyhow!(
                "index {index} out of range for {vertex_count} vertices"
            ));
        }
        indices.push(index);
    }

    Ok(Kn5Mesh {
        active,
        cast_shadows,
        visible,
        transparent,
        vertices,
        indices,
        material_id: reader.u32()?,
        layer: reader.u32()?,
        lod_in: reader.f32()?,
        lod_out: reader.f32()?,
        bounding_center: reader.vec3()?,
        bounding_radius: reader.f32()?,
        renderable: reader.bool()?,
    })
}

struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn ensure(&self, len: usize, what: &str) -> Result<()> {
        if len > self.remaining() {
            return Err(anyhow!(
                "unexpected end of file reading {what} at offset {} ({len} bytes needed, {} left)",
                self.offset,
                self.remaining()
            ));
        }
        Ok(())
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        self.ensure(len, what)?;
        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array("u32")?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array("i32")?))
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array("u16")?))
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array("f32")?))
    }

    fn vec2(&mut self) -> Result<Vec2> {
        Ok(Vec2::new(self.f32()?, self.f32()?))
    }

    fn vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    fn vec4(&mut self) -> Result<Vec4> {
        Ok(Vec4::new(self.f32()?, self.f32()?, self.f32()?, self.f32()?))
    }

    fn matrix(&mut self) -> Result<Mat4> {
        let mut cols = [0f32; 16];
        for value in &mut cols {
            *value = self.f32()?;
        }
        Ok(Mat4::from_cols_array(&cols))
    }

    fn blob(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len, "blob")
    }

    fn string(&mut self) -> Result<String> {
        let bytes = self.blob()?;
        String::from_utf8(bytes.to_vec()).context("string is not valid UTF-8")
    }

    fn count_i32(&mut self, what: &str) -> Result<usize> {
        let count = self.i32()?;
        usize::try_from(count).map_err(|_| anyhow!("negative {what} count {count}"))
    }
}
