use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::io::Write;

use glam::{Mat4, Vec2, Vec3};
use log::debug;

use super::materials::MaterialCollector;
use super::{
    exported_children, is_skipped, visible_roots, Kn5Writer, NodeType, MAX_VERTICES_PER_MESH,
    ROOT_NODE_NAME,
};
use crate::convert::{convert_matrix, convert_vector3};
use crate::error::{ExportError, ExportResult, Warnings};
use crate::scene::{Kn5Settings, ObjectId, SceneGraph};

/// One vertex in target space. Equality and hashing compare all fields
/// bit for bit, with `-0.0` folded into `0.0`.
#[derive(Debug, Clone, Copy)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec3,
}

impl Vertex {
    fn key(&self) -> [u32; 11] {
        let bits = |v: f32| if v == 0.0 { 0 } else { v.to_bits() };
        [
            bits(self.position.x),
            bits(self.position.y),
            bits(self.position.z),
            bits(self.normal.x),
            bits(self.normal.y),
            bits(self.normal.z),
            bits(self.uv.x),
            bits(self.uv.y),
            bits(self.tangent.x),
            bits(self.tangent.y),
            bits(self.tangent.z),
        ]
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Geometry of one object sharing a single material.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshPart {
    pub material_id: Option<u32>,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshPart {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Node hierarchy ready to be serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportNode {
    Container {
        name: String,
        matrix: Mat4,
        children: Vec<ExportNode>,
    },
    Mesh {
        name: String,
        settings: Kn5Settings,
        part: MeshPart,
    },
}

impl ExportNode {
    pub fn name(&self) -> &str {
        match self {
            Self::Container { name, .. } | Self::Mesh { name, .. } => name,
        }
    }

    /// Mesh nodes in this subtree.
    pub fn mesh_count(&self) -> usize {
        match self {
            Self::Container { children, .. } => children.iter().map(Self::mesh_count).sum(),
            Self::Mesh { .. } => 1,
        }
    }

    /// Writes this node and its subtree depth first.
    pub fn write<W: Write>(
        &self,
        out: &mut Kn5Writer<W>,
        warnings: &mut Warnings,
    ) -> ExportResult<()> {
        match self {
            Self::Container {
                name,
                matrix,
                children,
            } => {
                out.write_u32(NodeType::Node as u32)?;
                out.write_string(name)?;
                out.write_len(children.len())?;
                out.write_bool(true)?;
                out.write_matrix(matrix)?;
                for child in children {
                    child.write(out, warnings)?;
                }
                Ok(())
            }
            Self::Mesh {
                name,
                settings,
                part,
            } => write_mesh(out, name, settings, part, warnings),
        }
    }
}

fn write_mesh<W: Write>(
    out: &mut Kn5Writer<W>,
    name: &str,
    settings: &Kn5Settings,
    part: &MeshPart,
    warnings: &mut Warnings,
) -> ExportResult<()> {
    if part.vertices.len() > MAX_VERTICES_PER_MESH {
        return Err(ExportError::VertexLimit {
            object: name.to_string(),
            count: part.vertices.len(),
            max: MAX_VERTICES_PER_MESH,
        });
    }
    let indices = part
        .indices
        .iter()
        .map(|&index| {
            u16::try_from(index).map_err(|_| ExportError::IndexOverflow {
                object: name.to_string(),
                index,
            })
        })
        .collect::<ExportResult<Vec<u16>>>()?;

    out.write_u32(NodeType::Mesh as u32)?;
    out.write_string(name)?;
    out.write_u32(0)?;
    out.write_bool(true)?;
    out.write_bool(settings.cast_shadows)?;
    out.write_bool(settings.visible)?;
    out.write_bool(settings.transparent)?;

    out.write_len(part.vertices.len())?;
    for vertex in &part.vertices {
        out.write_vec3(vertex.position)?;
        out.write_vec3(vertex.normal)?;
        out.write_vec2(vertex.uv)?;
        out.write_vec3(vertex.tangent)?;
    }
    out.write_len(indices.len())?;
    for index in indices {
        out.write_u16(index)?;
    }

    let material_id = match part.material_id {
        Some(id) => id,
        None => {
            warnings.push(format!("No material assigned to mesh '{name}'"));
            0
        }
    };
    out.write_u32(material_id)?;
    out.write_u32(0)?; // layer
    out.write_f32(settings.lod_in)?;
    out.write_f32(settings.lod_out)?;
    let (center, radius) = bounding_sphere(&part.vertices);
    out.write_vec3(center)?;
    out.write_f32(radius)?;
    out.write_bool(settings.renderable)?;
    Ok(())
}

/// Center of the bounding box and twice its largest half-extent.
pub fn bounding_sphere(vertices: &[Vertex]) -> (Vec3, f32) {
    let Some(first) = vertices.first() else {
        return (Vec3::ZERO, 0.0);
    };
    let (min, max) = vertices.iter().fold((first.position, first.position), |(min, max), v| {
        (min.min(v.position), max.max(v.position))
    });
    let half = (max - min) / 2.0;
    (min + half, half.max_element() * 2.0)
}

/// Re-chunks parts above `limit` vertices. Triangles are taken whole; a
/// chunk is closed once it holds `limit - 3` vertices or more.
pub fn split_by_vertex_limit(parts: Vec<MeshPart>, limit: usize) -> Vec<MeshPart> {
    let threshold = limit.saturating_sub(3);
    let mut result = Vec::with_capacity(parts.len());

    for part in parts {
        if part.vertices.len() <= limit {
            result.push(part);
            continue;
        }

        let mut start = 0;
        while start < part.indices.len() {
            let mut mapping: HashMap<u32, u32> = HashMap::new();
            let mut order: Vec<u32> = Vec::new();
            let mut indices = Vec::new();

            for face in part.indices[start..].chunks(3) {
                start += face.len();
                for &old in face {
                    let new = match mapping.get(&old) {
                        Some(&new) => new,
                        None => {
                            let new = order.len() as u32;
                            mapping.insert(old, new);
                            order.push(old);
                            new
                        }
                    };
                    indices.push(new);
                }
                if mapping.len() >= threshold {
                    break;
                }
            }

            result.push(MeshPart {
                material_id: part.material_id,
                vertices: order
                    .iter()
                    .map(|&old| part.vertices[old as usize])
                    .collect(),
                indices,
            });
        }
    }
    result
}

/// Turns the visible scene hierarchy into [`ExportNode`]s, resolving
/// material indices on the way.
pub struct NodeWriter<'a, S: SceneGraph + ?Sized> {
    scene: &'a S,
    materials: &'a mut MaterialCollector,
    vertex_limit: usize,
}

impl<'a, S: SceneGraph + ?Sized> NodeWriter<'a, S> {
    pub fn new(scene: &'a S, materials: &'a mut MaterialCollector) -> Self {
        Self {
            scene,
            materials,
            vertex_limit: MAX_VERTICES_PER_MESH,
        }
    }

    pub fn with_vertex_limit(mut self, limit: usize) -> Self {
        self.vertex_limit = limit;
        self
    }

    /// Builds the synthetic root and everything below it. Roots are ordered
    /// by child count; ties keep scene order.
    pub fn build(&mut self, warnings: &mut Warnings) -> ExportResult<ExportNode> {
        let mut roots = visible_roots(self.scene);
        roots.sort_by_key(|&id| self.scene.children(id).len());

        let mut children = Vec::with_capacity(roots.len());
        for root in roots {
            children.push(self.build_object(root, warnings)?);
        }
        Ok(ExportNode::Container {
            name: ROOT_NODE_NAME.to_string(),
            matrix: Mat4::IDENTITY,
            children,
        })
    }

    fn build_object(&mut self, id: ObjectId, warnings: &mut Warnings) -> ExportResult<ExportNode> {
        let scene = self.scene;
        let name = scene.name(id).to_string();

        if !scene.kind(id).is_mesh_like() {
            let mut children = Vec::new();
            for child in exported_children(scene, id) {
                children.push(self.build_object(child, warnings)?);
            }
            return Ok(ExportNode::Container {
                name,
                matrix: convert_matrix(scene.local_transform(id)),
                children,
            });
        }

        if !scene.children(id).is_empty() {
            return Err(ExportError::MeshWithChildren { object: name });
        }

        let parts = self.split_by_materials(id, warnings)?;
        let before = parts.len();
        let parts = split_by_vertex_limit(parts, self.vertex_limit);
        debug!(
            "{name}: {} mesh part(s), {} from vertex limit split",
            parts.len(),
            parts.len() - before
        );

        let settings = scene.settings(id);
        let has_parent = scene.parent(id).is_some();
        let mut meshes: Vec<ExportNode> = parts
            .into_iter()
            .map(|part| ExportNode::Mesh {
                name: name.clone(),
                settings,
                part,
            })
            .collect();

        if !has_parent && meshes.len() == 1 {
            return Ok(meshes.remove(0));
        }
        let matrix = if has_parent {
            convert_matrix(scene.local_transform(id))
        } else {
            Mat4::IDENTITY
        };
        Ok(ExportNode::Container {
            name,
            matrix,
            children: meshes,
        })
    }

    /// One part per material index used by the evaluated geometry, in
    /// ascending index order.
    pub fn split_by_materials(
        &mut self,
        id: ObjectId,
        warnings: &mut Warnings,
    ) -> ExportResult<Vec<MeshPart>> {
        let scene = self.scene;
        let object = scene.name(id);
        let geometry = |source| ExportError::Geometry {
            object: object.to_string(),
            source,
        };

        let Some(mesh) = scene.evaluated_geometry(id).map_err(geometry)? else {
            return Ok(Vec::new());
        };
        let mesh = mesh.triangulate().map_err(geometry)?;
        if mesh.triangles.is_empty() {
            return Ok(Vec::new());
        }
        if mesh.materials.is_empty() {
            return Err(ExportError::NoMaterials {
                object: object.to_string(),
            });
        }

        let world = scene.world_transform(id);
        let dimensions = scene.dimensions(id);
        let used: BTreeSet<usize> = mesh.triangles.iter().map(|t| t.material_index).collect();
        let mut parts = Vec::with_capacity(used.len());

        for material_index in used {
            let material = mesh
                .materials
                .get(material_index)
                .and_then(Option::as_deref)
                .and_then(|name| scene.material(name))
                .ok_or_else(|| ExportError::EmptyMaterialSlot {
                    object: object.to_string(),
                    slot: material_index,
                })?;
            if is_skipped(&material.name) {
                return Err(ExportError::IgnoredMaterialInUse {
                    material: material.name.clone(),
                    object: object.to_string(),
                });
            }

            let mut lookup: HashMap<Vertex, u32> = HashMap::new();
            let mut vertices = Vec::new();
            let mut indices = Vec::new();

            for triangle in mesh
                .triangles
                .iter()
                .filter(|t| t.material_index == material_index)
            {
                let mut face = [0u32; 3];
                for (corner, &loop_index) in triangle.loops.iter().enumerate() {
                    let corner_loop = mesh.loops[loop_index as usize];
                    let local = mesh.positions[corner_loop.vertex as usize];
                    let uv = if mesh.has_uvs {
                        Vec2::new(corner_loop.uv.x, -corner_loop.uv.y)
                    } else {
                        fallback_uv(local, dimensions)
                    };
                    let vertex = Vertex {
                        position: convert_vector3(world.transform_point3(local)),
                        normal: convert_vector3(corner_loop.normal),
                        uv,
                        tangent: convert_vector3(corner_loop.tangent),
                    };
                    face[corner] = *lookup.entry(vertex).or_insert_with(|| {
                        vertices.push(vertex);
                        vertices.len() as u32 - 1
                    });
                }
                indices.extend([face[1], face[2], face[0]]);
            }

            let material_id = self.materials.get_material_id(scene, material, warnings);
            parts.push(MeshPart {
                material_id: Some(material_id),
                vertices,
                indices,
            });
        }
        Ok(parts)
    }
}

/// Planar projection used when the geometry has no UV layer.
fn fallback_uv(position: Vec3, dimensions: Vec3) -> Vec2 {
    let axis = |value: f32, size: f32| if size > 0.0 { value / size } else { 0.0 };
    Vec2::new(axis(position.x, dimensions.x), axis(position.y, dimensions.y))
}
