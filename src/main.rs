use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use kn5_export::kn5::{Kn5Node, Kn5NodeKind};
use kn5_export::{export_kn5, preflight, ExportOptions, Kn5File, Scene, Severity};

const USAGE: &str = "Usage: kn5-export <scene.xml> <output.kn5> [--texture-dir DIR] \
[--no-texture-files] [--keep-stale] [--json]\n       kn5-export --check <scene.xml> [--json]\n       \
kn5-export --inspect <file.kn5> [--json]";

fn main() {
    env_logger::init();
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {err:?}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the command succeeded.
fn run() -> Result<bool> {
    match CliOptions::parse(env::args().skip(1))? {
        Command::Export {
            scene,
            output,
            options,
            json,
        } => run_export(scene, output, &options, json),
        Command::Check { scene, json } => run_check(scene, json),
        Command::Inspect { file, json } => run_inspect(file, json),
    }
}

fn run_export(
    scene_path: PathBuf,
    output: PathBuf,
    options: &ExportOptions,
    json: bool,
) -> Result<bool> {
    let scene = Scene::load(&scene_path)
        .with_context(|| format!("failed to load scene {}", scene_path.display()))?;
    let report = export_kn5(&output, &scene, options);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if report.is_success() {
            println!("Exported {}", output.display());
        } else {
            println!("Export of {} failed", output.display());
        }
        for warning in &report.warnings {
            println!(" - {warning}");
        }
    }
    Ok(report.is_success())
}

fn run_check(scene_path: PathBuf, json: bool) -> Result<bool> {
    let scene = Scene::load(&scene_path)
        .with_context(|| format!("failed to load scene {}", scene_path.display()))?;
    let diagnostics = preflight(&scene);

    if json {
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    } else if diagnostics.is_empty() {
        println!("No problems found");
    } else {
        for diagnostic in &diagnostics {
            let level = match diagnostic.severity {
                Severity::Warning => "warning",
                Severity::Error => "error",
            };
            println!("{level} [{}]: {}", diagnostic.code, diagnostic.message);
        }
    }
    Ok(!kn5_export::preflight::has_errors(&diagnostics))
}

fn run_inspect(path: PathBuf, json: bool) -> Result<bool> {
    let file = Kn5File::open(&path)?;
    let summary = file.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(true);
    }

    println!("KN5 version {}", summary.version);
    println!("Textures: {}", summary.textures.len());
    for texture in &summary.textures {
        println!(" - {} ({} bytes)", texture.name, texture.bytes);
    }
    println!("Materials: {}", summary.materials.len());
    for material in &file.materials {
        println!(" - {} ({})", material.name, material.shader_name);
    }
    println!(
        "Nodes: {} ({} meshes, {} vertices, {} triangles)",
        summary.nodes, summary.meshes, summary.vertices, summary.triangles
    );
    print_node(&file.root, 0);
    Ok(true)
}

fn print_node(node: &Kn5Node, depth: usize) {
    let indent = "  ".repeat(depth);
    match &node.kind {
        Kn5NodeKind::Node { .. } => {
            println!("{indent}{} [node, {} children]", node.name, node.children.len());
        }
        Kn5NodeKind::Mesh(mesh) => println!(
            "{indent}{} [mesh, {} vertices, {} indices, material {}]",
            node.name,
            mesh.vertices.len(),
            mesh.indices.len(),
            mesh.material_id
        ),
    }
    for child in &node.children {
        print_node(child, depth + 1);
    }
}

#[derive(Debug)]
enum Command {
    Export {
        scene: PathBuf,
        output: PathBuf,
        options: ExportOptions,
        json: bool,
    },
    Check {
        scene: PathBuf,
        json: bool,
    },
    Inspect {
        file: PathBuf,
        json: bool,
    },
}

struct CliOptions;

impl CliOptions {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Command> {
        let mut positional = Vec::new();
        let mut options = ExportOptions::default();
        let mut json = false;
        let mut check = false;
        let mut inspect = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--texture-dir" => {
                    let dir = args
                        .next()
                        .ok_or_else(|| anyhow!("--texture-dir expects a directory\n{USAGE}"))?;
                    options.texture_dir = Some(PathBuf::from(dir));
                }
                "--no-texture-files" => options.write_texture_files = false,
                "--keep-stale" => options.clean_stale_textures = false,
                "--json" => json = true,
                "--check" => check = true,
                "--inspect" => inspect = true,
                "-h" | "--help" => return Err(anyhow!(USAGE)),
                other if other.starts_with("--") => {
                    return Err(anyhow!("Unknown argument: {other}\n{USAGE}"));
                }
                _ => positional.push(PathBuf::from(arg)),
            }
        }

        match (check, inspect, positional.as_slice()) {
            (true, false, [scene]) => Ok(Command::Check {
                scene: scene.clone(),
                json,
            }),
            (false, true, [file]) => Ok(Command::Inspect {
                file: file.clone(),
                json,
            }),
            (false, false, [scene, output]) => Ok(Command::Export {
                scene: scene.clone(),
                output: output.clone(),
                options,
                json,
            }),
            _ => Err(anyhow!(USAGE)),
        }
    }
}
