//! Export entry point: header, textures, materials, then the node tree.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ExportResult, Warnings};
use crate::kn5::{
    Kn5Writer, MaterialCollector, NodeWriter, TextureCollector, TextureOptions, KN5_MAGIC,
    KN5_VERSION,
};
use crate::scene::SceneGraph;

/// Folder next to the output file receiving standalone texture copies.
pub const DEFAULT_TEXTURE_DIR: &str = "texture";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Defaults to `<output dir>/texture`.
    pub texture_dir: Option<PathBuf>,
    pub write_texture_files: bool,
    pub clean_stale_textures: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            texture_dir: None,
            write_texture_files: true,
            clean_stale_textures: true,
        }
    }
}

impl ExportOptions {
    /// Embedded-only export: no texture files on disk.
    pub fn embedded_only() -> Self {
        Self {
            write_texture_files: false,
            ..Self::default()
        }
    }

    pub fn texture_options(&self, output: &Path) -> TextureOptions {
        let texture_dir = self.write_texture_files.then(|| {
            self.texture_dir.clone().unwrap_or_else(|| {
                output
                    .parent()
                    .unwrap_or_else(|| Path::new(""))
                    .join(DEFAULT_TEXTURE_DIR)
            })
        });
        TextureOptions {
            texture_dir,
            clean_stale: self.clean_stale_textures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Success,
    Error,
}

/// Outcome of [`export_kn5`]. Warnings are returned on success and failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReport {
    pub status: ExportStatus,
    pub warnings: Vec<String>,
}

impl ExportReport {
    pub fn is_success(&self) -> bool {
        self.status == ExportStatus::Success
    }
}

/// Exports `scene` to `path`. Never fails: errors are reported through the
/// returned status and the partially written file is removed.
pub fn export_kn5<S, P>(path: P, scene: &S, options: &ExportOptions) -> ExportReport
where
    S: SceneGraph + ?Sized,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let mut warnings = Warnings::new();
    info!("exporting {}", path.display());

    match write_file(path, scene, options, &mut warnings) {
        Ok(()) => {
            info!(
                "export finished: {} ({} warning(s))",
                path.display(),
                warnings.len()
            );
            ExportReport {
                status: ExportStatus::Success,
                warnings: warnings.into_vec(),
            }
        }
        Err(err) => {
            error!("export of {} failed: {err}", path.display());
            warnings.push(format!("Export failed: {err}"));
            warnings.push(format!("{:?}", anyhow::Error::new(err)));
            if let Err(remove_err) = fs::remove_file(path) {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    warn!("unable to remove {}: {remove_err}", path.display());
                }
            }
            ExportReport {
                status: ExportStatus::Error,
                warnings: warnings.into_vec(),
            }
        }
    }
}

fn write_file<S: SceneGraph + ?Sized>(
    path: &Path,
    scene: &S,
    options: &ExportOptions,
    warnings: &mut Warnings,
) -> ExportResult<()> {
    let file = File::create(path)?;
    let sink = write_kn5(
        BufWriter::new(file),
        scene,
        &options.texture_options(path),
        warnings,
    )?;
    // the file handle is released here, before any cleanup by the caller
    sink.into_inner().map_err(io::IntoInnerError::into_error)?;
    Ok(())
}

/// Writes a complete container to `sink` and hands the sink back.
pub fn write_kn5<S, W>(
    sink: W,
    scene: &S,
    texture_options: &TextureOptions,
    warnings: &mut Warnings,
) -> ExportResult<W>
where
    S: SceneGraph + ?Sized,
    W: Write,
{
    let mut out = Kn5Writer::new(sink);
    out.write_bytes(KN5_MAGIC)?;
    out.write_u32(KN5_VERSION)?;

    let textures = TextureCollector::collect(scene, texture_options, warnings);
    let mut materials = MaterialCollector::collect(scene, &textures, warnings);
    // geometry is resolved before the material section is written so that
    // late registered materials end up in it
    let root = NodeWriter::new(scene, &mut materials).build(warnings)?;

    // the texture directory is only touched once the node tree is known good
    textures.export_files(warnings);
    textures.write(&mut out)?;
    materials.write(&mut out)?;
    root.write(&mut out, warnings)?;
    out.flush()?;

    info!(
        "wrote {} bytes: {} texture(s), {} material(s), {} mesh node(s)",
        out.position(),
        textures.len(),
        materials.len(),
        root.mesh_count()
    );
    Ok(out.into_inner())
}

/// In-memory export without texture files.
pub fn export_to_bytes<S: SceneGraph + ?Sized>(scene: &S) -> ExportResult<(Vec<u8>, Warnings)> {
    let mut warnings = Warnings::new();
    let bytes = write_kn5(Vec::new(), scene, &TextureOptions::default(), &mut warnings)?;
    Ok((bytes, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Face, Mesh};
    use crate::scene::{Image, ImageSource, Material, ObjectKind, Scene, SceneObject};
    use glam::Vec3;
    use tempfile::tempdir;

    #[test]
    fn status_serializes_lowercase() {
        let report = ExportReport {
            status: ExportStatus::Error,
            warnings: vec!["boom".into()],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"status":"error","warnings":["boom"]}"#);
    }

    #[test]
    fn texture_dir_defaults_next_to_output() {
        let options = ExportOptions::default();
        let texture = options.texture_options(Path::new("/tracks/demo/demo.kn5"));
        assert_eq!(texture.texture_dir, Some(PathBuf::from("/tracks/demo/texture")));
        assert!(texture.clean_stale);
        assert_eq!(
            ExportOptions::embedded_only()
                .texture_options(Path::new("demo.kn5"))
                .texture_dir,
            None
        );
    }

    #[test]
    fn empty_scene_is_header_and_root() {
        let (bytes, warnings) = export_to_bytes(&Scene::new()).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(&bytes[..6], KN5_MAGIC);
        assert_eq!(&bytes[6..10], &KN5_VERSION.to_le_bytes());
        // 2 empty sections, node type, name, child count, active, matrix
        assert_eq!(bytes.len(), 10 + 4 + 4 + 4 + 4 + 11 + 4 + 1 + 64);
    }

    #[test]
    fn failed_export_removes_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.kn5");
        let mut scene = Scene::new();
        let cube = scene
            .add_object(SceneObject::new("Cube", ObjectKind::Mesh))
            .unwrap();
        scene
            .add_object(SceneObject::new("Child", ObjectKind::Empty).with_parent(cube))
            .unwrap();

        let report = export_kn5(&path, &scene, &ExportOptions::embedded_only());
        assert_eq!(report.status, ExportStatus::Error);
        assert!(!path.exists());
        assert_eq!(
            report.warnings[0],
            "Export failed: Mesh object 'Cube' cannot have children in KN5 format"
        );
        assert_eq!(report.warnings.len(), 2);
    }

    fn textured_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add_image(Image {
            name: "kerb.png".into(),
            filepath: Some("//kerb.png".into()),
            source: ImageSource::Rgba {
                width: 1,
                height: 1,
                pixels: vec![200, 0, 0, 255],
            },
        });
        scene.add_material(Material::new("Kerb").with_texture("Tex", Some("kerb.png"), None));
        let mesh = Mesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            faces: vec![Face::new([0, 1, 2])],
            materials: Vec::new(),
        };
        scene
            .add_object(SceneObject::mesh("Kerb", mesh, &["Kerb"]))
            .unwrap();
        scene
    }

    #[test]
    fn failed_export_keeps_previous_textures() {
        let dir = tempdir().unwrap();
        let texture_dir = dir.path().join(DEFAULT_TEXTURE_DIR);
        fs::create_dir_all(&texture_dir).unwrap();
        let previous = texture_dir.join("kerb_0badf00d.png");
        fs::write(&previous, b"old").unwrap();

        let mut scene = textured_scene();
        let kerb = scene.find("Kerb").unwrap();
        scene
            .add_object(SceneObject::new("Marker", ObjectKind::Empty).with_parent(kerb))
            .unwrap();

        let report = export_kn5(dir.path().join("track.kn5"), &scene, &ExportOptions::default());
        assert!(!report.is_success());
        assert!(previous.exists());
        assert_eq!(fs::read_dir(&texture_dir).unwrap().count(), 1);
    }

    #[test]
    fn successful_export_replaces_stale_textures() {
        let dir = tempdir().unwrap();
        let texture_dir = dir.path().join(DEFAULT_TEXTURE_DIR);
        fs::create_dir_all(&texture_dir).unwrap();
        let previous = texture_dir.join("kerb_0badf00d.png");
        fs::write(&previous, b"old").unwrap();

        let report = export_kn5(
            dir.path().join("track.kn5"),
            &textured_scene(),
            &ExportOptions::default(),
        );
        assert!(report.is_success(), "{:?}", report.warnings);
        assert!(!previous.exists());
        let written: Vec<_> = fs::read_dir(&texture_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(written.len(), 1);
        assert!(written[0].starts_with("kerb_"));
    }

    #[test]
    fn unreadable_texture_does_not_abort_export() {
        let mut scene = textured_scene();
        scene.add_image(Image::encoded("scan.exr", b"garbage".to_vec()));
        scene.add_material(Material::new("Scan").with_texture("Tex", Some("scan.exr"), None));
        let mesh = Mesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Z],
            faces: vec![Face::new([0, 1, 2])],
            materials: Vec::new(),
        };
        scene
            .add_object(SceneObject::mesh("Billboard", mesh, &["Scan"]))
            .unwrap();

        let (bytes, warnings) = export_to_bytes(&scene).unwrap();
        let file = crate::kn5::Kn5File::from_bytes(&bytes).unwrap();
        assert_eq!(file.textures.len(), 1);
        assert_eq!(file.materials.len(), 2);
        assert!(warnings
            .iter()
            .any(|w| w.starts_with("Ignoring texture node with unreadable image: 'Tex'")));
    }
}
