//! The KN5 container: constants shared by the writers and the reader.

pub mod materials;
pub mod nodes;
pub mod reader;
pub mod shaders;
pub mod textures;
pub mod writer;

use crate::scene::{ObjectId, SceneGraph};

pub use materials::{MaterialCollector, MaterialRecord};
pub use nodes::{ExportNode, MeshPart, NodeWriter, Vertex};
pub use reader::{
    Kn5File, Kn5Material, Kn5Mesh, Kn5Node, Kn5NodeKind, Kn5Summary, Kn5Texture, Kn5TextureSlot,
    Kn5Vertex,
};
pub use textures::{TextureCollector, TextureOptions, TextureRecord};
pub use writer::Kn5Writer;

/// File signature written before the format version.
pub const KN5_MAGIC: &[u8; 6] = b"sc6969";

/// Format version written after the signature.
pub const KN5_VERSION: u32 = 5;

/// Hard per-mesh vertex ceiling of the format.
pub const MAX_VERTICES_PER_MESH: usize = 65536;

/// Names starting with this prefix are never exported.
pub const SKIP_PREFIX: &str = "__";

/// Name of the synthetic root node.
pub const ROOT_NODE_NAME: &str = "BlenderFile";

pub(crate) fn is_skipped(name: &str) -> bool {
    name.starts_with(SKIP_PREFIX)
}

/// Scatter instancers and authoring templates that only make sense inside
/// the editor.
pub(crate) fn is_editor_only_root(name: &str) -> bool {
    if name.starts_with("KSTREE_GROUP_") || name.starts_with("GRASS_") {
        return true;
    }
    let lower = name.to_lowercase();
    lower.contains("_profile") || lower.contains("_example") || lower.contains("collider")
}

/// Unparented objects that make it into the export, in scene order.
pub(crate) fn visible_roots<S: SceneGraph + ?Sized>(scene: &S) -> Vec<ObjectId> {
    scene
        .objects()
        .into_iter()
        .filter(|&id| {
            let name = scene.name(id);
            scene.parent(id).is_none()
                && !is_skipped(name)
                && !is_editor_only_root(name)
                && !scene.is_hidden(id)
        })
        .collect()
}

/// Children taking part in the export: not skip-prefixed and not hidden.
pub(crate) fn exported_children<S: SceneGraph + ?Sized>(scene: &S, id: ObjectId) -> Vec<ObjectId> {
    scene
        .children(id)
        .into_iter()
        .filter(|&child| !is_skipped(scene.name(child)) && !scene.is_hidden(child))
        .collect()
}

/// Node record discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Node = 1,
    Mesh = 2,
    SkinnedMesh = 3,
}

impl NodeType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Node),
            2 => Some(Self::Mesh),
            3 => Some(Self::SkinnedMesh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Opaque = 0,
    AlphaBlend = 1,
    AlphaToCoverage = 2,
}

impl BlendMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Opaque),
            1 => Some(Self::AlphaBlend),
            2 => Some(Self::AlphaToCoverage),
            _ => None,
        }
    }

    /// Accepts the numeric value or a case-insensitive mode name.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "0" | "opaque" => Some(Self::Opaque),
            "1" | "alphablend" | "alpha_blend" => Some(Self::AlphaBlend),
            "2" | "alphatocoverage" | "alpha_to_coverage" => Some(Self::AlphaToCoverage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthMode {
    #[default]
    Normal = 0,
    NoWrite = 1,
    Off = 2,
}

impl DepthMode {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::NoWrite),
            2 => Some(Self::Off),
            _ => None,
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "0" | "normal" | "depthnormal" => Some(Self::Normal),
            "1" | "nowrite" | "no_write" | "depthnowrite" => Some(Self::NoWrite),
            "2" | "off" | "depthoff" => Some(Self::Off),
            _ => None,
        }
    }
}
