use std::collections::HashMap;
use std::io::Write;

use log::debug;

use super::shaders::shader_defaults;
use super::{exported_children, is_skipped, visible_roots, BlendMode, DepthMode, Kn5Writer};
use super::textures::TextureCollector;
use crate::error::{ExportResult, Warnings};
use crate::scene::{Material, NodeTree, ObjectId, SceneGraph, ShaderNodeKind, ShaderProperty};

/// Socket name fragments mapped to KN5 texture slots, checked in order.
const SOCKET_SLOTS: &[(&[&str], &str)] = &[
    (&["base color", "diffuse"], "txDiffuse"),
    (&["normal"], "txNormal"),
    (&["roughness", "specular"], "txDetail"),
];

const DEFAULT_SLOT: &str = "txDiffuse";

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialRecord {
    pub name: String,
    pub shader_name: String,
    pub alpha_blend_mode: BlendMode,
    pub alpha_tested: bool,
    pub depth_mode: DepthMode,
    pub shader_properties: Vec<(String, ShaderProperty)>,
    /// Slot name to texture filename.
    pub texture_slots: Vec<(String, String)>,
}

impl MaterialRecord {
    fn build(
        material: &Material,
        texture_names: &HashMap<String, String>,
        warnings: &mut Warnings,
    ) -> Self {
        let mut shader_properties = Vec::new();
        for (name, value) in &material.shader_properties {
            upsert(&mut shader_properties, name, *value);
        }
        if shader_properties.is_empty() {
            for (name, value) in shader_defaults(&material.shader_name).properties {
                upsert(&mut shader_properties, name, ShaderProperty::scalar(*value));
            }
        }

        Self {
            name: material.name.clone(),
            shader_name: material.shader_name.clone(),
            alpha_blend_mode: material.alpha_blend_mode,
            alpha_tested: material.alpha_tested,
            depth_mode: material.depth_mode,
            shader_properties,
            texture_slots: texture_slots(material, texture_names, warnings),
        }
    }
}

/// Inserts or replaces; a replaced entry keeps its original position.
fn upsert<V>(entries: &mut Vec<(String, V)>, key: &str, value: V) {
    match entries.iter_mut().find(|(name, _)| name == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key.to_string(), value)),
    }
}

fn texture_slots(
    material: &Material,
    texture_names: &HashMap<String, String>,
    warnings: &mut Warnings,
) -> Vec<(String, String)> {
    let mut slots = Vec::new();
    let Some(tree) = &material.node_tree else {
        return slots;
    };

    for node in &tree.nodes {
        let ShaderNodeKind::ImageTexture {
            image: Some(image),
            slot,
        } = &node.kind
        else {
            continue;
        };
        if is_skipped(image) {
            continue;
        }
        let texture = texture_names
            .get(image)
            .cloned()
            .unwrap_or_else(|| image.clone());

        if let Some(slot) = slot {
            upsert(&mut slots, slot, texture);
        } else if let Some(slot) = detect_slot(tree, &node.name) {
            upsert(&mut slots, slot, texture);
        } else {
            upsert(&mut slots, DEFAULT_SLOT, texture);
            warnings.push(format!(
                "Material '{}': Auto-assigned texture '{image}' to txDiffuse slot",
                material.name
            ));
        }
    }
    slots
}

fn detect_slot(tree: &NodeTree, node: &str) -> Option<&'static str> {
    tree.links_from(node).find_map(|link| {
        let socket = link.to_socket.to_lowercase();
        SOCKET_SLOTS
            .iter()
            .find(|(fragments, _)| fragments.iter().any(|f| socket.contains(f)))
            .map(|(_, slot)| *slot)
    })
}

/// Materials of one export with stable, dense, first-seen indices.
#[derive(Debug, Default)]
pub struct MaterialCollector {
    records: Vec<MaterialRecord>,
    positions: HashMap<String, u32>,
    texture_names: HashMap<String, String>,
}

impl MaterialCollector {
    /// Scans the visible hierarchy and indexes every referenced material.
    pub fn collect<S: SceneGraph + ?Sized>(
        scene: &S,
        textures: &TextureCollector,
        warnings: &mut Warnings,
    ) -> Self {
        let mut collector = Self {
            texture_names: textures
                .records()
                .iter()
                .map(|record| (record.image_name.clone(), record.filename.clone()))
                .collect(),
            ..Self::default()
        };

        for material in scene.materials() {
            if !is_skipped(&material.name) && scene.material_users(&material.name) == 0 {
                warnings.push(format!(
                    "Material '{}' has no users and was not exported",
                    material.name
                ));
            }
        }

        for root in visible_roots(scene) {
            collector.collect_object(scene, root, warnings);
        }
        debug!("collected {} material(s)", collector.records.len());
        collector
    }

    fn collect_object<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &S,
        id: ObjectId,
        warnings: &mut Warnings,
    ) {
        for name in scene.material_slots(id).into_iter().flatten() {
            if is_skipped(&name) || self.positions.contains_key(&name) {
                continue;
            }
            if let Some(material) = scene.material(&name) {
                self.register(material, warnings);
            }
        }
        for child in exported_children(scene, id) {
            self.collect_object(scene, child, warnings);
        }
    }

    fn register(&mut self, material: &Material, warnings: &mut Warnings) -> u32 {
        let position = self.records.len() as u32;
        self.records
            .push(MaterialRecord::build(material, &self.texture_names, warnings));
        self.positions.insert(material.name.clone(), position);
        position
    }

    /// Index of `material`, registering it when the scan did not see it.
    ///
    /// Late registration happens for materials introduced by modifiers and
    /// is reported together with any suspicious texture paths.
    pub fn get_material_id<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &S,
        material: &Material,
        warnings: &mut Warnings,
    ) -> u32 {
        if let Some(&position) = self.positions.get(&material.name) {
            return position;
        }

        let position = self.register(material, warnings);
        let issues = texture_path_issues(scene, material);
        let mut message = format!(
            "Material '{}' added from evaluated mesh (Geometry Nodes/modifiers)",
            material.name
        );
        if !issues.is_empty() {
            message.push_str(&format!(" - Issues: {}", issues.join("; ")));
        }
        warnings.push(message);
        position
    }

    pub fn position(&self, name: &str) -> Option<u32> {
        self.positions.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MaterialRecord] {
        &self.records
    }

    pub fn write<W: Write>(&self, out: &mut Kn5Writer<W>) -> ExportResult<()> {
        out.write_len_i32(self.records.len())?;
        for record in &self.records {
            out.write_string(&record.name)?;
            out.write_string(&record.shader_name)?;
            out.write_u8(record.alpha_blend_mode as u8)?;
            out.write_bool(record.alpha_tested)?;
            out.write_i32(record.depth_mode as i32)?;

            out.write_len(record.shader_properties.len())?;
            for (name, property) in &record.shader_properties {
                out.write_string(name)?;
                out.write_f32(property.value_a)?;
                out.write_vec2(property.value_b)?;
                out.write_vec3(property.value_c)?;
                out.write_vec4(property.value_d)?;
            }

            out.write_len(record.texture_slots.len())?;
            for (position, (slot, texture)) in record.texture_slots.iter().enumerate() {
                out.write_string(slot)?;
                out.write_u32(position as u32)?;
                out.write_string(texture)?;
            }
        }
        Ok(())
    }
}

fn texture_path_issues<S: SceneGraph + ?Sized>(scene: &S, material: &Material) -> Vec<String> {
    let Some(tree) = &material.node_tree else {
        return Vec::new();
    };
    tree.nodes
        .iter()
        .filter_map(|node| match &node.kind {
            ShaderNodeKind::ImageTexture {
                image: Some(image), ..
            } => scene.image(image),
            _ => None,
        })
        .filter_map(|image| match image.filepath.as_deref() {
            None | Some("") => Some(format!("texture '{}' has no filepath", image.name)),
            Some(path) if !path.starts_with("//") => Some(format!(
                "texture '{}' uses absolute path (should be relative)",
                image.name
            )),
            Some(_) => None,
        })
        .collect()
}
