use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use glam::{EulerRot, Mat4, Quat, Vec2, Vec3, Vec4};
use log::warn;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::kn5::shaders::{shader_defaults, FALLBACK_SHADER};
use crate::kn5::{BlendMode, DepthMode};
use crate::mesh::{Face, Mesh};

/// Index of an object inside a [`Scene`].
pub type ObjectId = usize;

/// Shading node types that generate their pixels procedurally and therefore
/// need baking before export.
pub const PROCEDURAL_NODE_TYPES: &[&str] = &[
    "TEX_NOISE",
    "TEX_GRADIENT",
    "TEX_VORONOI",
    "TEX_MAGIC",
    "TEX_WAVE",
    "TEX_MUSGRAVE",
    "TEX_CHECKER",
    "TEX_BRICK",
];

/// Read-only view of a host scene graph.
///
/// The exporter depends only on this trait, so any host able to answer these
/// questions can be exported.
pub trait SceneGraph {
    /// Every object in scene order.
    fn objects(&self) -> Vec<ObjectId>;
    fn name(&self, id: ObjectId) -> &str;
    fn kind(&self, id: ObjectId) -> ObjectKind;
    fn parent(&self, id: ObjectId) -> Option<ObjectId>;
    fn children(&self, id: ObjectId) -> Vec<ObjectId>;
    fn local_transform(&self, id: ObjectId) -> Mat4;
    /// Size of the object's bounding box in its parent's space.
    fn dimensions(&self, id: ObjectId) -> Vec3;
    /// True when the object sits in a hidden collection.
    fn is_hidden(&self, id: ObjectId) -> bool;
    fn settings(&self, id: ObjectId) -> Kn5Settings;
    fn material_slots(&self, id: ObjectId) -> Vec<Option<String>>;
    /// Post-modifier geometry. The returned mesh is an owned copy.
    fn evaluated_geometry(&self, id: ObjectId) -> Result<Option<Mesh>>;
    /// Material library in declaration order.
    fn materials(&self) -> Vec<&Material>;
    fn material(&self, name: &str) -> Option<&Material>;
    /// Number of objects referencing the material.
    fn material_users(&self, name: &str) -> usize;
    fn image(&self, name: &str) -> Option<&Image>;

    fn world_transform(&self, id: ObjectId) -> Mat4 {
        match self.parent(id) {
            Some(parent) => self.world_transform(parent) * self.local_transform(id),
            None => self.local_transform(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    Empty,
    Mesh,
    Curve,
    Surface,
    Light,
    Camera,
    Armature,
    Other,
}

impl ObjectKind {
    /// Kinds that carry renderable geometry.
    pub fn is_mesh_like(self) -> bool {
        matches!(self, Self::Mesh | Self::Curve | Self::Surface)
    }

    pub fn parse(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "empty" => Self::Empty,
            "mesh" => Self::Mesh,
            "curve" => Self::Curve,
            "surface" => Self::Surface,
            "light" => Self::Light,
            "camera" => Self::Camera,
            "armature" => Self::Armature,
            _ => Self::Other,
        }
    }
}

/// Per-object export metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kn5Settings {
    pub lod_in: f32,
    pub lod_out: f32,
    pub cast_shadows: bool,
    pub visible: bool,
    pub transparent: bool,
    pub renderable: bool,
}

impl Default for Kn5Settings {
    fn default() -> Self {
        Self {
            lod_in: 0.0,
            lod_out: 10000.0,
            cast_shadows: true,
            visible: true,
            transparent: false,
            renderable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub name: String,
    pub kind: ObjectKind,
    pub parent: Option<ObjectId>,
    pub location: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub material_slots: Vec<Option<String>>,
    pub mesh: Option<Mesh>,
    pub hidden: bool,
    pub settings: Kn5Settings,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: None,
            location: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            material_slots: Vec::new(),
            mesh: None,
            hidden: false,
            settings: Kn5Settings::default(),
        }
    }

    /// A mesh object with one slot per entry of `materials`.
    pub fn mesh(name: impl Into<String>, mesh: Mesh, materials: &[&str]) -> Self {
        let mut object = Self::new(name, ObjectKind::Mesh);
        object.material_slots = materials.iter().map(|m| Some(m.to_string())).collect();
        object.mesh = Some(mesh);
        object
    }

    pub fn with_parent(mut self, parent: ObjectId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_location(mut self, location: Vec3) -> Self {
        self.location = location;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.location)
    }
}

/// Named shader parameter with up to four components.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShaderProperty {
    pub value_a: f32,
    pub value_b: Vec2,
    pub value_c: Vec3,
    pub value_d: Vec4,
}

impl ShaderProperty {
    pub fn scalar(value: f32) -> Self {
        Self {
            value_a: value,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub shader_name: String,
    pub alpha_blend_mode: BlendMode,
    pub alpha_tested: bool,
    pub depth_mode: DepthMode,
    pub shader_properties: Vec<(String, ShaderProperty)>,
    pub node_tree: Option<NodeTree>,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shader_name: FALLBACK_SHADER.to_string(),
            alpha_blend_mode: BlendMode::Opaque,
            alpha_tested: false,
            depth_mode: DepthMode::Normal,
            shader_properties: Vec::new(),
            node_tree: None,
        }
    }

    /// Adds an image texture node, creating the node tree when needed.
    pub fn with_texture(
        mut self,
        node: impl Into<String>,
        image: Option<&str>,
        slot: Option<&str>,
    ) -> Self {
        self.node_tree
            .get_or_insert_with(NodeTree::default)
            .nodes
            .push(ShaderNode {
                name: node.into(),
                kind: ShaderNodeKind::ImageTexture {
                    image: image.map(str::to_string),
                    slot: slot.map(str::to_string),
                },
            });
        self
    }

    pub fn with_link(mut self, from_node: &str, to_node: &str, to_socket: &str) -> Self {
        self.node_tree
            .get_or_insert_with(NodeTree::default)
            .links
            .push(NodeLink {
                from_node: from_node.to_string(),
                to_node: to_node.to_string(),
                to_socket: to_socket.to_string(),
            });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeTree {
    pub nodes: Vec<ShaderNode>,
    pub links: Vec<NodeLink>,
}

impl NodeTree {
    pub fn links_from<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a NodeLink> + 'a {
        self.links.iter().filter(move |link| link.from_node == node)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderNode {
    pub name: String,
    pub kind: ShaderNodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShaderNodeKind {
    /// Samples an image; `slot` is an explicit KN5 texture slot override.
    ImageTexture {
        image: Option<String>,
        slot: Option<String>,
    },
    Procedural { node_type: String },
    Other { node_type: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeLink {
    pub from_node: String,
    pub to_node: String,
    pub to_socket: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub name: String,
    /// Host file path; relative paths start with `//`.
    pub filepath: Option<String>,
    pub source: ImageSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Empty,
    /// Encoded file contents (PNG, DDS, JPEG...).
    Encoded(Vec<u8>),
    /// Raw 8-bit RGBA pixels.
    Rgba {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
}

impl Image {
    pub fn encoded(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            filepath: None,
            source: ImageSource::Encoded(data),
        }
    }

    pub fn has_data(&self) -> bool {
        match &self.source {
            ImageSource::Empty => false,
            ImageSource::Encoded(data) => !data.is_empty(),
            ImageSource::Rgba { pixels, .. } => !pixels.is_empty(),
        }
    }
}

/// In-memory scene description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scene {
    objects: Vec<SceneObject>,
    materials: Vec<Material>,
    images: Vec<Image>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an object. Its parent, if any, must already be in the scene.
    pub fn add_object(&mut self, object: SceneObject) -> Result<ObjectId> {
        if let Some(parent) = object.parent {
            if parent >= self.objects.len() {
                return Err(anyhow!(
                    "object {} refers to unknown parent {parent}",
                    object.name
                ));
            }
        }
        self.objects.push(object);
        Ok(self.objects.len() - 1)
    }

    pub fn add_material(&mut self, material: Material) {
        self.materials.push(material);
    }

    pub fn add_image(&mut self, image: Image) {
        self.images.push(image);
    }

    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.objects.get_mut(id)
    }

    pub fn find(&self, name: &str) -> Option<ObjectId> {
        self.objects.iter().position(|object| object.name == name)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Reads a scene file; image paths resolve against the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let xml = fs::read_to_string(path)
            .with_context(|| format!("unable to read scene {}", path.display()))?;
        Self::from_xml_in(&xml, path.parent())
    }

    /// Parses scene XML; image paths resolve against the working directory.
    pub fn from_xml(xml: &str) -> Result<Self> {
        Self::from_xml_in(xml, None)
    }

    pub fn from_xml_in(xml: &str, base_dir: Option<&Path>) -> Result<Self> {
        let document = Document::parse(xml).context("invalid scene XML")?;
        let root = document.root_element();
        if !root.has_tag_name("scene") {
            return Err(anyhow!(
                "expected <scene> root element, found <{}>",
                root.tag_name().name()
            ));
        }

        let mut scene = Scene::new();
        for node in root.children().filter(Node::is_element) {
            match node.tag_name().name() {
                "image" => scene.add_image(parse_image(&node, base_dir)?),
                "material" => scene.add_material(parse_material(&node)?),
                "object" => parse_object(&node, None, &mut scene)?,
                other => warn!("ignoring unknown scene element <{other}>"),
            }
        }
        Ok(scene)
    }

    fn get(&self, id: ObjectId) -> &SceneObject {
        &self.objects[id]
    }
}

impl SceneGraph for Scene {
    fn objects(&self) -> Vec<ObjectId> {
        (0..self.objects.len()).collect()
    }

    fn name(&self, id: ObjectId) -> &str {
        &self.get(id).name
    }

    fn kind(&self, id: ObjectId) -> ObjectKind {
        self.get(id).kind
    }

    fn parent(&self, id: ObjectId) -> Option<ObjectId> {
        self.get(id).parent
    }

    fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, object)| object.parent == Some(id))
            .map(|(child, _)| child)
            .collect()
    }

    fn local_transform(&self, id: ObjectId) -> Mat4 {
        self.get(id).local_matrix()
    }

    fn dimensions(&self, id: ObjectId) -> Vec3 {
        let object = self.get(id);
        object
            .mesh
            .as_ref()
            .and_then(Mesh::bounds)
            .map(|(min, max)| (max - min) * object.scale.abs())
            .unwrap_or(Vec3::ZERO)
    }

    fn is_hidden(&self, id: ObjectId) -> bool {
        self.get(id).hidden
    }

    fn settings(&self, id: ObjectId) -> Kn5Settings {
        self.get(id).settings
    }

    fn material_slots(&self, id: ObjectId) -> Vec<Option<String>> {
        self.get(id).material_slots.clone()
    }

    fn evaluated_geometry(&self, id: ObjectId) -> Result<Option<Mesh>> {
        let object = self.get(id);
        Ok(object.mesh.as_ref().map(|mesh| {
            let mut evaluated = mesh.clone();
            if evaluated.materials.is_empty() {
                evaluated.materials = object.material_slots.clone();
            }
            evaluated
        }))
    }

    fn materials(&self) -> Vec<&Material> {
        self.materials.iter().collect()
    }

    fn material(&self, name: &str) -> Option<&Material> {
        self.materials.iter().find(|material| material.name == name)
    }

    fn material_users(&self, name: &str) -> usize {
        self.objects
            .iter()
            .filter(|object| {
                let in_slots = object
                    .material_slots
                    .iter()
                    .any(|slot| slot.as_deref() == Some(name));
                let in_mesh = object.mesh.as_ref().is_some_and(|mesh| {
                    mesh.materials.iter().any(|m| m.as_deref() == Some(name))
                });
                in_slots || in_mesh
            })
            .count()
    }

    fn image(&self, name: &str) -> Option<&Image> {
        self.images.iter().find(|image| image.name == name)
    }
}

fn parse_object(node: &Node<'_, '_>, parent: Option<ObjectId>, scene: &mut Scene) -> Result<()> {
    let name = required_attr(node, "name")?;
    let mesh_node = node.children().find(|child| child.has_tag_name("mesh"));
    let kind = match node.attribute("type") {
        Some(kind) => ObjectKind::parse(kind),
        None if mesh_node.is_some() => ObjectKind::Mesh,
        None => ObjectKind::Empty,
    };

    let mut object = SceneObject::new(name.clone(), kind);
    object.parent = parent;
    object.hidden = parse_bool(node.attribute("hidden"), false)
        .with_context(|| format!("object {name}"))?;
    object.location = parse_vec3(optional_text(node, "location"), Vec3::ZERO)
        .with_context(|| format!("invalid location on object {name}"))?;
    let rotation = parse_vec3(optional_text(node, "rotation"), Vec3::ZERO)
        .with_context(|| format!("invalid rotation on object {name}"))?;
    object.rotation = Quat::from_euler(
        EulerRot::ZYX,
        rotation.z.to_radians(),
        rotation.y.to_radians(),
        rotation.x.to_radians(),
    );
    object.scale = parse_vec3(optional_text(node, "scale"), Vec3::ONE)
        .with_context(|| format!("invalid scale on object {name}"))?;
    if let Some(settings) = node.children().find(|child| child.has_tag_name("kn5")) {
        object.settings =
            parse_settings(&settings).with_context(|| format!("invalid <kn5> on object {name}"))?;
    }
    object.material_slots = node
        .children()
        .filter(|child| child.has_tag_name("slot"))
        .map(|slot| node_text(&slot))
        .collect();
    if let Some(mesh_node) = mesh_node {
        object.mesh =
            Some(parse_mesh(&mesh_node).with_context(|| format!("invalid mesh on object {name}"))?);
    }

    let id = scene.add_object(object)?;
    for child in node.children().filter(|child| child.has_tag_name("object")) {
        parse_object(&child, Some(id), scene)?;
    }
    Ok(())
}

fn parse_settings(node: &Node<'_, '_>) -> Result<Kn5Settings> {
    let defaults = Kn5Settings::default();
    Ok(Kn5Settings {
        lod_in: parse_f32(node.attribute("lod_in"), defaults.lod_in)?,
        lod_out: parse_f32(node.attribute("lod_out"), defaults.lod_out)?,
        cast_shadows: parse_bool(node.attribute("cast_shadows"), defaults.cast_shadows)?,
        visible: parse_bool(node.attribute("visible"), defaults.visible)?,
        transparent: parse_bool(node.attribute("transparent"), defaults.transparent)?,
        renderable: parse_bool(node.attribute("renderable"), defaults.renderable)?,
    })
}

fn parse_mesh(node: &Node<'_, '_>) -> Result<Mesh> {
    let mut mesh = Mesh::default();
    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "v" => {
                let position = parse_vec3(node_text(&child), Vec3::ZERO)?;
                mesh.positions.push(position);
            }
            "f" => mesh.faces.push(parse_face(&child)?),
            "material" => mesh.materials.push(node_text(&child)),
            other => warn!("ignoring unknown mesh element <{other}>"),
        }
    }
    Ok(mesh)
}

fn parse_face(node: &Node<'_, '_>) -> Result<Face> {
    let vertices = node_text(node)
        .unwrap_or_default()
        .split_whitespace()
        .map(|index| {
            index
                .parse::<u32>()
                .map_err(|err| anyhow!("invalid vertex index {index}: {err}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let material_index = match node.attribute("material") {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map_err(|err| anyhow!("invalid material index {value}: {err}"))?,
        None => 0,
    };
    let uvs = node
        .attribute("uv")
        .map(|text| {
            parse_floats(text).map(|values| {
                values
                    .chunks_exact(2)
                    .map(|pair| Vec2::new(pair[0], pair[1]))
                    .collect::<Vec<_>>()
            })
        })
        .transpose()?;
    let normals = node
        .attribute("normals")
        .map(|text| {
            parse_floats(text).map(|values| {
                values
                    .chunks_exact(3)
                    .map(Vec3::from_slice)
                    .collect::<Vec<_>>()
            })
        })
        .transpose()?;
    Ok(Face {
        vertices,
        uvs,
        normals,
        material_index,
        smooth: parse_bool(node.attribute("smooth"), false)?,
    })
}

fn parse_material(node: &Node<'_, '_>) -> Result<Material> {
    let name = required_attr(node, "name")?;
    let mut material = Material::new(name.clone());
    if let Some(shader) = node.attribute("shader") {
        material.shader_name = shader.to_string();
    }
    if let Some(blend) = node.attribute("blend") {
        material.alpha_blend_mode = BlendMode::parse(blend)
            .ok_or_else(|| anyhow!("unknown blend mode {blend} on material {name}"))?;
    }
    if let Some(depth) = node.attribute("depth") {
        material.depth_mode = DepthMode::parse(depth)
            .ok_or_else(|| anyhow!("unknown depth mode {depth} on material {name}"))?;
    }
    // an explicit flag wins over the shader's stock setting
    material.alpha_tested = parse_bool(
        node.attribute("alpha_tested"),
        shader_defaults(&material.shader_name).alpha_tested,
    )?;

    for property in node.children().filter(|child| child.has_tag_name("property")) {
        let property_name = required_attr(&property, "name")?;
        let value = ShaderProperty {
            value_a: parse_f32(property.attribute("a"), 0.0)?,
            value_b: parse_vec2(property.attribute("b"))?,
            value_c: parse_vec3(property.attribute("c").map(str::to_string), Vec3::ZERO)?,
            value_d: parse_vec4(property.attribute("d"))?,
        };
        material.shader_properties.push((property_name, value));
    }

    if let Some(nodes) = node.children().find(|child| child.has_tag_name("nodes")) {
        let mut tree = NodeTree::default();
        for child in nodes.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "texture" => tree.nodes.push(ShaderNode {
                    name: required_attr(&child, "name")?,
                    kind: ShaderNodeKind::ImageTexture {
                        image: child.attribute("image").map(str::to_string),
                        slot: child
                            .attribute("slot")
                            .filter(|slot| !slot.is_empty())
                            .map(str::to_string),
                    },
                }),
                "node" => {
                    let node_type = child.attribute("type").unwrap_or_default().to_string();
                    let kind = if PROCEDURAL_NODE_TYPES.contains(&node_type.as_str()) {
                        ShaderNodeKind::Procedural { node_type }
                    } else {
                        ShaderNodeKind::Other { node_type }
                    };
                    tree.nodes.push(ShaderNode {
                        name: required_attr(&child, "name")?,
                        kind,
                    });
                }
                "link" => tree.links.push(NodeLink {
                    from_node: required_attr(&child, "from")?,
                    to_node: child.attribute("to").unwrap_or_default().to_string(),
                    to_socket: required_attr(&child, "socket")?,
                }),
                other => warn!("ignoring unknown node tree element <{other}>"),
            }
        }
        material.node_tree = Some(tree);
    }
    Ok(material)
}

fn parse_image(node: &Node<'_, '_>, base_dir: Option<&Path>) -> Result<Image> {
    let name = required_attr(node, "name")?;
    let mut filepath = node.attribute("filepath").map(str::to_string);

    let source = if let Some(path) = node.attribute("path") {
        if filepath.is_none() {
            filepath = Some(format!("//{path}"));
        }
        let full: PathBuf = match base_dir {
            Some(base) => base.join(path),
            None => PathBuf::from(path),
        };
        match fs::read(&full) {
            Ok(data) => ImageSource::Encoded(data),
            Err(err) => {
                warn!("image {name}: unable to read {}: {err}", full.display());
                ImageSource::Empty
            }
        }
    } else if let Some(rgba) = node.attribute("rgba") {
        let width = parse_u32(node.attribute("width"), &name, "width")?;
        let height = parse_u32(node.attribute("height"), &name, "height")?;
        let pixels = rgba
            .split_whitespace()
            .map(|value| {
                value
                    .parse::<u8>()
                    .map_err(|err| anyhow!("invalid pixel value {value} in image {name}: {err}"))
            })
            .collect::<Result<Vec<_>>>()?;
        ImageSource::Rgba {
            width,
            height,
            pixels,
        }
    } else {
        ImageSource::Empty
    };

    Ok(Image {
        name,
        filepath,
        source,
    })
}

fn required_attr(node: &Node<'_, '_>, attr: &str) -> Result<String> {
    node.attribute(attr)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            anyhow!(
                "<{}> is missing the {attr} attribute",
                node.tag_name().name()
            )
        })
}

fn node_text(node: &Node<'_, '_>) -> Option<String> {
    node.text()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| node_text(&child))
}

fn parse_floats(text: &str) -> Result<Vec<f32>> {
    text.split_whitespace()
        .map(|value| {
            value
                .parse::<f32>()
                .map_err(|err| anyhow!("invalid number {value}: {err}"))
        })
        .collect()
}

fn parse_vec2(value: Option<&str>) -> Result<Vec2> {
    let Some(value) = value else {
        return Ok(Vec2::ZERO);
    };
    match parse_floats(value)?.as_slice() {
        [x, y, ..] => Ok(Vec2::new(*x, *y)),
        _ => Err(anyhow!("vector is missing components")),
    }
}

fn parse_vec3(value: Option<String>, default: Vec3) -> Result<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    match parse_floats(&value)?.as_slice() {
        [x, y, z, ..] => Ok(Vec3::new(*x, *y, *z)),
        _ => Err(anyhow!("vector is missing components")),
    }
}

fn parse_vec4(value: Option<&str>) -> Result<Vec4> {
    let Some(value) = value else {
        return Ok(Vec4::ZERO);
    };
    match parse_floats(value)?.as_slice() {
        [x, y, z, w, ..] => Ok(Vec4::new(*x, *y, *z, *w)),
        _ => Err(anyhow!("vector is missing components")),
    }
}

fn parse_f32(value: Option<&str>, default: f32) -> Result<f32> {
    match value {
        Some(value) => value
            .trim()
            .parse::<f32>()
            .map_err(|err| anyhow!("failed to parse float: {err}")),
        None => Ok(default),
    }
}

fn parse_u32(value: Option<&str>, image: &str, what: &str) -> Result<u32> {
    let value = value.ok_or_else(|| anyhow!("image {image} is missing its {what}"))?;
    value
        .trim()
        .parse::<u32>()
        .map_err(|err| anyhow!("invalid {what} {value} on image {image}: {err}"))
}

fn parse_bool(value: Option<&str>, default: bool) -> Result<bool> {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" => Ok(false),
        Some(v) => Err(anyhow!("invalid boolean {v}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    <scene>
        <image name="grid" width="1" height="1" rgba="255 0 0 255"/>
        <image name="missing"/>
        <material name="Road" shader="ksPerPixelMultiMap" blend="AlphaBlend" depth="DepthNoWrite" alpha_tested="true">
            <property name="ksDiffuse" a="0.5" c="1 0.5 0.25"/>
            <nodes>
                <texture name="Base" image="grid"/>
                <node name="BSDF" type="BSDF_PRINCIPLED"/>
                <node name="Noise" type="TEX_NOISE"/>
                <link from="Base" to="BSDF" socket="Base Color"/>
            </nodes>
        </material>
        <object name="Track" type="empty" hidden="true">
            <location>1 2 3</location>
            <object name="Asphalt">
                <kn5 lod_out="250" cast_shadows="false"/>
                <slot>Road</slot>
                <slot/>
                <mesh>
                    <v>0 0 0</v>
                    <v>1 0 0</v>
                    <v>0 1 0</v>
                    <f material="1" smooth="true" uv="0 0 1 0 0 1">0 1 2</f>
                </mesh>
            </object>
        </object>
    </scene>
    "#;

    #[test]
    fn parse_scene_builds_hierarchy() {
        let scene = Scene::from_xml(SAMPLE).unwrap();
        assert_eq!(scene.object_count(), 2);
        let track = scene.find("Track").unwrap();
        let asphalt = scene.find("Asphalt").unwrap();
        assert_eq!(scene.kind(track), ObjectKind::Empty);
        assert_eq!(scene.kind(asphalt), ObjectKind::Mesh);
        assert_eq!(scene.parent(asphalt), Some(track));
        assert_eq!(scene.children(track), vec![asphalt]);
        assert!(scene.is_hidden(track));
        assert!(!scene.is_hidden(asphalt));
    }

    #[test]
    fn parse_scene_reads_settings_and_slots() {
        let scene = Scene::from_xml(SAMPLE).unwrap();
        let asphalt = scene.find("Asphalt").unwrap();
        let settings = scene.settings(asphalt);
        assert_eq!(settings.lod_out, 250.0);
        assert!(!settings.cast_shadows);
        assert!(settings.visible);
        assert_eq!(
            scene.material_slots(asphalt),
            vec![Some("Road".to_string()), None]
        );
        let mesh = scene.evaluated_geometry(asphalt).unwrap().unwrap();
        assert_eq!(mesh.positions.len(), 3);
        assert_eq!(mesh.faces[0].material_index, 1);
        assert!(mesh.faces[0].smooth);
        assert_eq!(mesh.materials, vec![Some("Road".to_string()), None]);
    }

    #[test]
    fn parse_scene_reads_materials_and_images() {
        let scene = Scene::from_xml(SAMPLE).unwrap();
        let road = scene.material("Road").unwrap();
        assert_eq!(road.shader_name, "ksPerPixelMultiMap");
        assert_eq!(road.alpha_blend_mode, BlendMode::AlphaBlend);
        assert_eq!(road.depth_mode, DepthMode::NoWrite);
        assert!(road.alpha_tested);
        assert_eq!(road.shader_properties[0].0, "ksDiffuse");
        assert_eq!(road.shader_properties[0].1.value_c, Vec3::new(1.0, 0.5, 0.25));
        let tree = road.node_tree.as_ref().unwrap();
        assert_eq!(tree.nodes.len(), 3);
        assert!(matches!(
            tree.nodes[2].kind,
            ShaderNodeKind::Procedural { .. }
        ));
        assert_eq!(tree.links_from("Base").count(), 1);
        assert_eq!(scene.material_users("Road"), 1);

        assert!(scene.image("grid").unwrap().has_data());
        assert!(!scene.image("missing").unwrap().has_data());
    }

    #[test]
    fn alpha_test_defaults_follow_the_shader() {
        let xml = r#"<scene>
            <material name="Leaves" shader="ksTree"/>
            <material name="Hedge" shader="ksTree" alpha_tested="false"/>
            <material name="Wall"/>
        </scene>"#;
        let scene = Scene::from_xml(xml).unwrap();
        assert!(scene.material("Leaves").unwrap().alpha_tested);
        assert!(!scene.material("Hedge").unwrap().alpha_tested);
        let wall = scene.material("Wall").unwrap();
        assert_eq!(wall.shader_name, FALLBACK_SHADER);
        assert!(!wall.alpha_tested);
    }

    #[test]
    fn world_transform_composes_parents() {
        let scene = Scene::from_xml(SAMPLE).unwrap();
        let asphalt = scene.find("Asphalt").unwrap();
        let origin = scene.world_transform(asphalt).transform_point3(Vec3::ZERO);
        assert_eq!(origin, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn dimensions_scale_mesh_bounds() {
        let mut scene = Scene::from_xml(SAMPLE).unwrap();
        let asphalt = scene.find("Asphalt").unwrap();
        scene.object_mut(asphalt).unwrap().scale = Vec3::new(2.0, 3.0, 1.0);
        assert_eq!(scene.dimensions(asphalt), Vec3::new(2.0, 3.0, 0.0));
    }

    #[test]
    fn missing_name_is_an_error() {
        let bad = "<scene><object type=\"mesh\"/></scene>";
        assert!(Scene::from_xml(bad).is_err());
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut scene = Scene::new();
        let orphan = SceneObject::new("Orphan", ObjectKind::Empty).with_parent(3);
        assert!(scene.add_object(orphan).is_err());
    }
}
