use anyhow::{anyhow, Result};
use glam::{Vec2, Vec3};

/// Polygonal geometry as produced by the host after modifier evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub faces: Vec<Face>,
    /// Material list of the evaluated geometry, indexed by
    /// [`Face::material_index`]. `None` marks an empty slot.
    pub materials: Vec<Option<String>>,
}

/// One polygon with per-corner attributes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Face {
    pub vertices: Vec<u32>,
    /// One UV per corner when the mesh carries a UV layer.
    pub uvs: Option<Vec<Vec2>>,
    /// Custom split normals, one per corner.
    pub normals: Option<Vec<Vec3>>,
    pub material_index: usize,
    pub smooth: bool,
}

impl Face {
    pub fn new(vertices: impl Into<Vec<u32>>) -> Self {
        Self {
            vertices: vertices.into(),
            ..Self::default()
        }
    }

    pub fn with_material(mut self, material_index: usize) -> Self {
        self.material_index = material_index;
        self
    }

    pub fn with_uvs(mut self, uvs: impl Into<Vec<Vec2>>) -> Self {
        self.uvs = Some(uvs.into());
        self
    }
}

/// A face corner after triangulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Loop {
    pub vertex: u32,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub loops: [u32; 3],
    pub material_index: usize,
}

/// Triangulated geometry with loop normals and, when UVs exist, tangents.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriangleMesh {
    pub positions: Vec<Vec3>,
    pub loops: Vec<Loop>,
    pub triangles: Vec<Triangle>,
    pub materials: Vec<Option<String>>,
    pub has_uvs: bool,
}

impl Mesh {
    pub fn has_uvs(&self) -> bool {
        self.faces.iter().any(|face| face.uvs.is_some())
    }

    /// Axis-aligned bounds of the vertex positions, `None` when empty.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.positions.first()?;
        Some(
            self.positions
                .iter()
                .fold((first, first), |(min, max), p| (min.min(*p), max.max(*p))),
        )
    }

    /// Fan-triangulates every face, resolves loop normals and computes
    /// tangents when a UV layer is present.
    pub fn triangulate(&self) -> Result<TriangleMesh> {
        let vertex_count = self.positions.len();
        let has_uvs = self.has_uvs();
        let smooth_normals = self.vertex_normals();
        let mut loops = Vec::new();
        let mut triangles = Vec::new();

        for (face_index, face) in self.faces.iter().enumerate() {
            if face.vertices.len() < 3 {
                return Err(anyhow!(
                    "face {face_index} references {} vertices, at least 3 are required",
                    face.vertices.len()
                ));
            }
            if let Some(bad) = face
                .vertices
                .iter()
                .find(|&&v| v as usize >= vertex_count)
            {
                return Err(anyhow!(
                    "face {face_index} references vertex {bad} but the mesh has {vertex_count}"
                ));
            }
            check_corner_count(face_index, "UVs", face.uvs.as_deref(), face.vertices.len())?;
            check_corner_count(
                face_index,
                "normals",
                face.normals.as_deref(),
                face.vertices.len(),
            )?;

            let flat = self.face_normal(face);
            let first_loop = loops.len() as u32;
            for (corner, &vertex) in face.vertices.iter().enumerate() {
                let normal = match &face.normals {
                    Some(normals) => normals[corner].normalize_or_zero(),
                    None if face.smooth => smooth_normals[vertex as usize],
                    None => flat,
                };
                let uv = face
                    .uvs
                    .as_ref()
                    .map(|uvs| uvs[corner])
                    .unwrap_or(Vec2::ZERO);
                loops.push(Loop {
                    vertex,
                    normal,
                    uv,
                    tangent: Vec3::ZERO,
                });
            }
            for i in 1..(face.vertices.len() as u32 - 1) {
                triangles.push(Triangle {
                    loops: [first_loop, first_loop + i, first_loop + i + 1],
                    material_index: face.material_index,
                });
            }
        }

        let mut mesh = TriangleMesh {
            positions: self.positions.clone(),
            loops,
            triangles,
            materials: self.materials.clone(),
            has_uvs,
        };
        if has_uvs {
            compute_tangents(&mut mesh);
        }
        Ok(mesh)
    }

    fn face_normal(&self, face: &Face) -> Vec3 {
        // Newell's method copes with non-planar polygons
        let mut normal = Vec3::ZERO;
        let count = face.vertices.len();
        for i in 0..count {
            let current = self.positions[face.vertices[i] as usize];
            let next = self.positions[face.vertices[(i + 1) % count] as usize];
            normal.x += (current.y - next.y) * (current.z + next.z);
            normal.y += (current.z - next.z) * (current.x + next.x);
            normal.z += (current.x - next.x) * (current.y + next.y);
        }
        normal.normalize_or_zero()
    }

    fn vertex_normals(&self) -> Vec<Vec3> {
        let mut accum = vec![Vec3::ZERO; self.positions.len()];
        for face in &self.faces {
            if face.vertices.len() < 3
                || face
                    .vertices
                    .iter()
                    .any(|&v| v as usize >= self.positions.len())
            {
                continue;
            }
            let normal = self.face_normal(face);
            for &vertex in &face.vertices {
                accum[vertex as usize] += normal;
            }
        }
        accum.into_iter().map(Vec3::normalize_or_zero).collect()
    }
}

fn check_corner_count<T>(
    face_index: usize,
    what: &str,
    values: Option<&[T]>,
    corners: usize,
) -> Result<()> {
    match values {
        Some(values) if values.len() != corners => Err(anyhow!(
            "face {face_index} has {corners} corners but {} {what}",
            values.len()
        )),
        _ => Ok(()),
    }
}

/// Per-loop tangents from the UV gradient of every triangle touching the
/// loop, orthogonalised against the loop normal.
fn compute_tangents(mesh: &mut TriangleMesh) {
    let mut accum = vec![Vec3::ZERO; mesh.loops.len()];

    for triangle in &mesh.triangles {
        let [l0, l1, l2] = triangle.loops.map(|l| mesh.loops[l as usize]);
        let p0 = mesh.positions[l0.vertex as usize];
        let p1 = mesh.positions[l1.vertex as usize];
        let p2 = mesh.positions[l2.vertex as usize];
        let edge1 = p1 - p0;
        let edge2 = p2 - p0;
        let duv1 = l1.uv - l0.uv;
        let duv2 = l2.uv - l0.uv;
        let det = duv1.x * duv2.y - duv2.x * duv1.y;
        if det.abs() <= f32::EPSILON {
            continue;
        }
        let tangent = (edge1 * duv2.y - edge2 * duv1.y) / det;
        for l in triangle.loops {
            accum[l as usize] += tangent;
        }
    }

    for (corner, tangent) in mesh.loops.iter_mut().zip(accum) {
        let n = corner.normal;
        corner.tangent = (tangent - n * n.dot(tangent)).normalize_or_zero();
    }
}
