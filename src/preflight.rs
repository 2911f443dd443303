//! Checks run before an export to surface problems the exporter would
//! otherwise hit halfway through.

use serde::{Deserialize, Serialize};

use crate::kn5::{is_skipped, MAX_VERTICES_PER_MESH};
use crate::scene::{SceneGraph, ShaderNodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Severity {
    Warning = 1,
    Error = 2,
}

impl From<Severity> for u8 {
    fn from(severity: Severity) -> Self {
        severity as u8
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            1 => Ok(Severity::Warning),
            2 => Ok(Severity::Error),
            other => Err(format!("unknown severity {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    fn new(severity: Severity, code: &str, message: String) -> Self {
        Self {
            severity,
            code: code.to_string(),
            message,
        }
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}

/// Runs every check over `scene` and returns the findings in check order.
pub fn preflight<S: SceneGraph + ?Sized>(scene: &S) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let meshes: Vec<_> = scene
        .objects()
        .into_iter()
        .filter(|&id| scene.kind(id).is_mesh_like() && !is_skipped(scene.name(id)))
        .collect();

    for &id in &meshes {
        match scene.evaluated_geometry(id) {
            Ok(Some(mesh)) if mesh.positions.len() > MAX_VERTICES_PER_MESH => {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "KN5_VERTEX_LIMIT",
                    format!(
                        "Mesh '{}' has {} vertices (max {MAX_VERTICES_PER_MESH})",
                        scene.name(id),
                        mesh.positions.len()
                    ),
                ));
            }
            Ok(_) => {}
            Err(err) => diagnostics.push(Diagnostic::new(
                Severity::Error,
                "KN5_GEOMETRY",
                format!("Mesh '{}' could not be evaluated: {err:#}", scene.name(id)),
            )),
        }
    }

    let used = || {
        scene
            .materials()
            .into_iter()
            .filter(|material| scene.material_users(&material.name) > 0)
    };

    let procedural = used()
        .filter_map(|material| material.node_tree.as_ref())
        .flat_map(|tree| tree.nodes.iter())
        .filter(|node| matches!(node.kind, ShaderNodeKind::Procedural { .. }))
        .count();
    if procedural > 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "KN5_PROCEDURAL_TEXTURES",
            format!("Found {procedural} procedural texture(s) that must be baked before export"),
        ));
    }

    for material in used() {
        if material.node_tree.is_none() && !is_skipped(&material.name) {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "KN5_NO_NODES",
                format!(
                    "Material '{}' has no node tree - will use default shader",
                    material.name
                ),
            ));
        }
    }

    for &id in &meshes {
        if scene.material_slots(id).is_empty() {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "KN5_NO_MATERIAL",
                format!("Mesh '{}' has no material assigned", scene.name(id)),
            ));
        }
    }

    for &id in &meshes {
        let children = scene
            .children(id)
            .into_iter()
            .filter(|&child| !is_skipped(scene.name(child)))
            .count();
        if children > 0 {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "KN5_MESH_CHILDREN",
                format!(
                    "Mesh '{}' has {children} child(ren) - KN5 meshes cannot have children",
                    scene.name(id)
                ),
            ));
        }
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Face, Mesh};
    use crate::scene::{Material, ObjectKind, Scene, SceneObject, ShaderNode};
    use glam::Vec3;

    fn triangle() -> Mesh {
        Mesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            faces: vec![Face::new([0, 1, 2])],
            materials: Vec::new(),
        }
    }

    fn codes(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn clean_scene_has_no_findings() {
        let mut scene = Scene::new();
        scene.add_material(Material::new("Mat").with_texture("Tex", Some("a.png"), None));
        scene
            .add_object(SceneObject::mesh("Tri", triangle(), &["Mat"]))
            .unwrap();
        assert!(preflight(&scene).is_empty());
    }

    #[test]
    fn reports_each_problem_once() {
        let mut scene = Scene::new();
        let mut baked = Material::new("Noisy").with_texture("Tex", Some("a.png"), None);
        if let Some(tree) = baked.node_tree.as_mut() {
            tree.nodes.push(ShaderNode {
                name: "Noise".into(),
                kind: ShaderNodeKind::Procedural {
                    node_type: "TEX_NOISE".into(),
                },
            });
        }
        scene.add_material(baked);
        scene.add_material(Material::new("Plain"));
        scene.add_material(Material::new("Unused"));

        let body = scene
            .add_object(SceneObject::mesh("Body", triangle(), &["Noisy", "Plain"]))
            .unwrap();
        scene
            .add_object(SceneObject::new("Wheel", ObjectKind::Empty).with_parent(body))
            .unwrap();
        scene
            .add_object(SceneObject::new("__Gizmo", ObjectKind::Empty).with_parent(body))
            .unwrap();
        scene
            .add_object(SceneObject::mesh("Bare", triangle(), &[]))
            .unwrap();

        let diagnostics = preflight(&scene);
        assert_eq!(
            codes(&diagnostics),
            [
                "KN5_PROCEDURAL_TEXTURES",
                "KN5_NO_NODES",
                "KN5_NO_MATERIAL",
                "KN5_MESH_CHILDREN",
            ]
        );
        assert!(diagnostics[1].message.contains("'Plain'"));
        assert!(diagnostics[3].message.contains("1 child(ren)"));
        assert!(has_errors(&diagnostics));
    }

    #[test]
    fn vertex_limit_is_an_error() {
        let mut mesh = triangle();
        mesh.positions = vec![Vec3::ZERO; MAX_VERTICES_PER_MESH + 1];
        let mut scene = Scene::new();
        scene.add_material(Material::new("Mat").with_texture("Tex", Some("a.png"), None));
        scene
            .add_object(SceneObject::mesh("Dense", mesh, &["Mat"]))
            .unwrap();
        let diagnostics = preflight(&scene);
        assert_eq!(codes(&diagnostics), ["KN5_VERTEX_LIMIT"]);
        assert_eq!(diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn severity_serializes_as_number() {
        let diagnostic = Diagnostic::new(Severity::Warning, "X", "y".into());
        let json = serde_json::to_string(&diagnostic).unwrap();
        assert_eq!(json, r#"{"severity":1,"code":"X","message":"y"}"#);
    }
}
