use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use image::{DynamicImage, ImageFormat, RgbaImage};
use log::debug;
use regex::Regex;

use super::{is_skipped, Kn5Writer};
use crate::error::{ExportResult, Warnings};
use crate::scene::{Image, ImageSource, SceneGraph, ShaderNodeKind};

pub const DDS_MAGIC: &[u8; 3] = b"DDS";
const PNG_MAGIC: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Files written by earlier exports: `{name}_{8 hex digits}.{png|dds}`.
pub const STALE_TEXTURE_PATTERN: &str = r"(?i)^.+_[0-9a-f]{8}\.(png|dds)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Png,
    Dds,
}

impl TextureFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Dds => "dds",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextureOptions {
    /// Directory receiving a standalone copy of every texture. `None` keeps
    /// textures embedded only.
    pub texture_dir: Option<PathBuf>,
    pub clean_stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureRecord {
    pub image_name: String,
    /// Content-addressed name used both in the container and on disk.
    pub filename: String,
    pub format: TextureFormat,
    pub data: Vec<u8>,
}

/// Deduplicated textures of one export, in first-seen order.
#[derive(Debug, Default)]
pub struct TextureCollector {
    records: Vec<TextureRecord>,
    positions: HashMap<String, usize>,
    texture_dir: Option<PathBuf>,
    clean_stale: bool,
}

impl TextureCollector {
    /// Walks every image texture node of every mesh-like object's materials.
    /// Images that cannot be decoded are reported and left out.
    pub fn collect<S: SceneGraph + ?Sized>(
        scene: &S,
        options: &TextureOptions,
        warnings: &mut Warnings,
    ) -> Self {
        let mut collector = Self {
            texture_dir: options.texture_dir.clone(),
            clean_stale: options.clean_stale,
            ..Self::default()
        };

        for id in scene.objects() {
            if !scene.kind(id).is_mesh_like() {
                continue;
            }
            for slot in scene.material_slots(id).into_iter().flatten() {
                let Some(tree) = scene.material(&slot).and_then(|m| m.node_tree.as_ref()) else {
                    continue;
                };
                for node in &tree.nodes {
                    let ShaderNodeKind::ImageTexture { image, .. } = &node.kind else {
                        continue;
                    };
                    if is_skipped(&node.name) {
                        continue;
                    }
                    let Some(image_name) = image else {
                        warnings.push(format!(
                            "Ignoring texture node without image: '{}'",
                            node.name
                        ));
                        continue;
                    };
                    if is_skipped(image_name) {
                        continue;
                    }
                    let Some(image) = scene.image(image_name).filter(|image| image.has_data())
                    else {
                        warnings.push(format!(
                            "Ignoring texture node without image data: '{}'",
                            node.name
                        ));
                        continue;
                    };
                    if let Err(err) = collector.insert(image) {
                        warnings.push(format!(
                            "Ignoring texture node with unreadable image: '{}' ({err:#})",
                            node.name
                        ));
                    }
                }
            }
        }

        debug!("collected {} texture(s)", collector.records.len());
        collector
    }

    fn insert(&mut self, image: &Image) -> anyhow::Result<()> {
        if self.positions.contains_key(&image.name) {
            return Ok(());
        }
        let (data, format) =
            encode_image(image).with_context(|| format!("image '{}'", image.name))?;
        let filename = texture_filename(&image.name, &data, format);
        self.positions
            .insert(image.name.clone(), self.records.len());
        self.records.push(TextureRecord {
            image_name: image.name.clone(),
            filename,
            format,
            data,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TextureRecord] {
        &self.records
    }

    pub fn position(&self, image_name: &str) -> Option<usize> {
        self.positions.get(image_name).copied()
    }

    /// Replaces the standalone copies in the texture directory: stale files
    /// from earlier exports go first, then every collected texture is written.
    /// Does nothing for embedded-only exports.
    pub fn export_files(&self, warnings: &mut Warnings) {
        let Some(dir) = &self.texture_dir else {
            return;
        };
        if self.clean_stale {
            clean_stale_textures(dir, warnings);
        }
        for record in &self.records {
            export_texture_file(dir, record, warnings);
        }
    }

    /// Writes the texture section.
    pub fn write<W: Write>(&self, out: &mut Kn5Writer<W>) -> ExportResult<()> {
        out.write_len_i32(self.records.len())?;
        for record in &self.records {
            out.write_i32(1)?;
            out.write_string(&record.filename)?;
            out.write_blob(&record.data)?;
        }
        Ok(())
    }
}

/// PNG and DDS payloads pass through untouched; everything else is
/// re-encoded as PNG. The scene image itself is never modified.
pub fn encode_image(image: &Image) -> anyhow::Result<(Vec<u8>, TextureFormat)> {
    let decoded = match &image.source {
        ImageSource::Empty => return Err(anyhow!("image has no pixel data")),
        ImageSource::Encoded(data) if data.starts_with(DDS_MAGIC) => {
            return Ok((data.clone(), TextureFormat::Dds));
        }
        ImageSource::Encoded(data) if data.starts_with(PNG_MAGIC) => {
            return Ok((data.clone(), TextureFormat::Png));
        }
        ImageSource::Encoded(data) => {
            image::load_from_memory(data).context("unsupported or corrupt image data")?
        }
        ImageSource::Rgba {
            width,
            height,
            pixels,
        } => {
            let rgba = RgbaImage::from_raw(*width, *height, pixels.clone()).ok_or_else(|| {
                anyhow!(
                    "{} bytes do not describe a {width}x{height} RGBA image",
                    pixels.len()
                )
            })?;
            DynamicImage::ImageRgba8(rgba)
        }
    };

    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok((png, TextureFormat::Png))
}

/// `{sanitized stem}_{crc32}.{ext}`; identical payloads map to identical names.
pub fn texture_filename(image_name: &str, data: &[u8], format: TextureFormat) -> String {
    let stem = match image_name.rfind('.') {
        Some(dot) if dot > 0 => &image_name[..dot],
        _ => image_name,
    };
    let base: String = stem
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    format!(
        "{base}_{:08x}.{}",
        crc32fast::hash(data),
        format.extension()
    )
}

/// Removes files left behind by earlier exports. Returns how many went away.
pub fn clean_stale_textures(dir: &Path, warnings: &mut Warnings) -> usize {
    if !dir.exists() {
        return 0;
    }
    let pattern = match Regex::new(STALE_TEXTURE_PATTERN) {
        Ok(pattern) => pattern,
        Err(err) => {
            warnings.push(format!("Failed to clean content/texture directory: {err}"));
            return 0;
        }
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warnings.push(format!("Failed to clean content/texture directory: {err}"));
            return 0;
        }
    };

    let mut cleaned = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !pattern.is_match(name) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => cleaned += 1,
            Err(err) => warnings.push(format!("Failed to remove old texture '{name}': {err}")),
        }
    }
    if cleaned > 0 {
        warnings.notice(format!(
            "Cleaned {cleaned} auto-exported texture(s) from previous export"
        ));
    }
    cleaned
}

fn export_texture_file(dir: &Path, record: &TextureRecord, warnings: &mut Warnings) {
    let path = dir.join(&record.filename);
    let existed = path.exists();
    let result = fs::create_dir_all(dir).and_then(|()| fs::write(&path, &record.data));
    match result {
        Ok(()) => {
            let size_kb = record.data.len() as f64 / 1024.0;
            if existed {
                warnings.notice(format!(
                    "Updated texture in content/texture: '{}' ({size_kb:.1} KB)",
                    record.filename
                ));
            } else {
                warnings.notice(format!(
                    "Exported texture to content/texture: '{}' ({size_kb:.1} KB)",
                    record.filename
                ));
            }
        }
        Err(err) => warnings.push(format!(
            "Failed to export texture '{}' to content/texture: {err}",
            record.image_name
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Face, Mesh};
    use crate::scene::{Material, ObjectKind, Scene, SceneObject};
    use glam::Vec3;
    use tempfile::tempdir;

    fn rgba_image(name: &str) -> Image {
        Image {
            name: name.to_string(),
            filepath: Some(format!("//{name}")),
            source: ImageSource::Rgba {
                width: 1,
                height: 1,
                pixels: vec![255, 0, 0, 255],
            },
        }
    }

    fn triangle() -> Mesh {
        Mesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            faces: vec![Face::new([0, 1, 2])],
            materials: Vec::new(),
        }
    }

    fn shared_image_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add_image(rgba_image("grid.png"));
        scene.add_image(Image {
            name: "blank".into(),
            filepath: None,
            source: ImageSource::Empty,
        });
        scene.add_material(Material::new("A").with_texture("Tex", Some("grid.png"), None));
        scene.add_material(
            Material::new("B")
                .with_texture("Tex", Some("grid.png"), None)
                .with_texture("Empty", None, None)
                .with_texture("Blank", Some("blank"), None)
                .with_texture("__Scratch", Some("grid.png"), None),
        );
        scene
            .add_object(SceneObject::mesh("Plane", triangle(), &["A", "B"]))
            .unwrap();
        scene
    }

    #[test]
    fn shared_images_are_collected_once() {
        let scene = shared_image_scene();
        let mut warnings = Warnings::new();
        let textures =
            TextureCollector::collect(&scene, &TextureOptions::default(), &mut warnings);
        assert_eq!(textures.len(), 1);
        assert_eq!(textures.position("grid.png"), Some(0));
        assert!(textures.records()[0].data.starts_with(PNG_MAGIC));
        assert_eq!(
            warnings.as_slice(),
            [
                "Ignoring texture node without image: 'Empty'",
                "Ignoring texture node without image data: 'Blank'",
            ]
        );
    }

    #[test]
    fn dds_payload_passes_through() {
        let data = b"DDS |rest of header".to_vec();
        let image = Image::encoded("road.dds", data.clone());
        let (encoded, format) = encode_image(&image).unwrap();
        assert_eq!(format, TextureFormat::Dds);
        assert_eq!(encoded, data);
    }

    #[test]
    fn mismatched_pixel_buffer_is_an_error() {
        let image = Image {
            name: "bad".into(),
            filepath: None,
            source: ImageSource::Rgba {
                width: 4,
                height: 4,
                pixels: vec![0; 3],
            },
        };
        assert!(encode_image(&image).is_err());
    }

    #[test]
    fn filenames_are_sanitized_and_content_addressed() {
        let name = texture_filename("my road (v2).png", b"abc", TextureFormat::Png);
        assert_eq!(name, format!("myroadv2_{:08x}.png", crc32fast::hash(b"abc")));
        assert_eq!(
            texture_filename("grass", b"abc", TextureFormat::Dds),
            format!("grass_{:08x}.dds", crc32fast::hash(b"abc"))
        );
        let pattern = Regex::new(STALE_TEXTURE_PATTERN).unwrap();
        assert!(pattern.is_match(&name));
    }

    #[test]
    fn stale_cleanup_only_touches_generated_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("asphalt_0badf00d.png"), b"old").unwrap();
        fs::write(dir.path().join("GRASS_DEADBEEF.DDS"), b"old").unwrap();
        fs::write(dir.path().join("handmade.png"), b"keep").unwrap();

        let mut warnings = Warnings::new();
        assert_eq!(clean_stale_textures(dir.path(), &mut warnings), 2);
        assert!(dir.path().join("handmade.png").exists());
        assert_eq!(
            warnings.as_slice(),
            ["Cleaned 2 auto-exported texture(s) from previous export"]
        );
    }

    #[test]
    fn undecodable_image_is_skipped_with_warning() {
        let mut scene = Scene::new();
        scene.add_image(rgba_image("grid.png"));
        scene.add_image(Image::encoded("broken.tga", b"not an image".to_vec()));
        scene.add_material(
            Material::new("Mixed")
                .with_texture("Good", Some("grid.png"), None)
                .with_texture("Bad", Some("broken.tga"), None),
        );
        scene
            .add_object(SceneObject::mesh("Plane", triangle(), &["Mixed"]))
            .unwrap();

        let mut warnings = Warnings::new();
        let textures =
            TextureCollector::collect(&scene, &TextureOptions::default(), &mut warnings);
        assert_eq!(textures.len(), 1);
        assert_eq!(textures.position("broken.tga"), None);
        assert_eq!(warnings.len(), 1);
        assert!(warnings.as_slice()[0]
            .starts_with("Ignoring texture node with unreadable image: 'Bad' (image 'broken.tga'"));
    }

    #[test]
    fn tiff_payload_is_reencoded_as_png() {
        let mut tiff = Vec::new();
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(2, 2, image::Rgb([10, 20, 30])))
            .write_to(&mut Cursor::new(&mut tiff), ImageFormat::Tiff)
            .unwrap();
        let (png, format) = encode_image(&Image::encoded("road.tif", tiff)).unwrap();
        assert_eq!(format, TextureFormat::Png);
        assert!(png.starts_with(PNG_MAGIC));
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.get_pixel(1, 1), &image::Rgb([10, 20, 30]));
    }

    #[test]
    fn curve_objects_contribute_textures() {
        let mut scene = Scene::new();
        scene.add_image(rgba_image("rail.png"));
        scene.add_material(Material::new("Rail").with_texture("Tex", Some("rail.png"), None));
        let mut rail = SceneObject::mesh("Barrier", triangle(), &["Rail"]);
        rail.kind = ObjectKind::Curve;
        scene.add_object(rail).unwrap();

        let mut warnings = Warnings::new();
        let textures =
            TextureCollector::collect(&scene, &TextureOptions::default(), &mut warnings);
        assert_eq!(textures.position("rail.png"), Some(0));
        assert!(warnings.is_empty());
    }

    #[test]
    fn texture_files_are_written_separately_from_the_section() {
        let dir = tempdir().unwrap();
        let texture_dir = dir.path().join("texture");
        fs::create_dir_all(&texture_dir).unwrap();
        fs::write(texture_dir.join("old_0badf00d.png"), b"old").unwrap();
        let scene = shared_image_scene();
        let options = TextureOptions {
            texture_dir: Some(texture_dir.clone()),
            clean_stale: true,
        };
        let mut warnings = Warnings::new();
        let textures = TextureCollector::collect(&scene, &options, &mut warnings);
        let record = &textures.records()[0];

        // collecting never touches the directory
        assert!(texture_dir.join("old_0badf00d.png").exists());
        assert!(!texture_dir.join(&record.filename).exists());

        textures.export_files(&mut warnings);
        assert!(!texture_dir.join("old_0badf00d.png").exists());
        let on_disk = fs::read(texture_dir.join(&record.filename)).unwrap();
        assert_eq!(on_disk, record.data);
        assert!(warnings
            .iter()
            .any(|w| w.starts_with("Exported texture to content/texture:")));

        let mut out = Kn5Writer::new(Vec::new());
        textures.write(&mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(&bytes[..4], &1i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1i32.to_le_bytes());
    }
}
