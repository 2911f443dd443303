use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

const TRIANGLE_SCENE: &str = r#"<scene>
  <material name="Road"/>
  <object name="Ramp">
    <slot>Road</slot>
    <mesh>
      <v>0 0 0</v>
      <v>1 0 0</v>
      <v>0 1 0</v>
      <f>0 1 2</f>
    </mesh>
  </object>
</scene>
"#;

const PARENTED_MESH_SCENE: &str = r#"<scene>
  <material name="Road"/>
  <object name="Ramp">
    <slot>Road</slot>
    <mesh>
      <v>0 0 0</v>
      <v>1 0 0</v>
      <v>0 1 0</v>
      <f>0 1 2</f>
    </mesh>
    <object name="Marker" type="empty"/>
  </object>
</scene>
"#;

fn write_scene(xml: &str) -> (TempDir, PathBuf) {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("scene.xml");
    fs::write(&path, xml).expect("write scene");
    (dir, path)
}

fn export(scene: &Path, output: &Path) -> Command {
    let mut cmd = Command::cargo_bin("kn5-export").expect("binary exists");
    cmd.arg(scene).arg(output).arg("--no-texture-files");
    cmd
}

#[test]
fn cli_exports_scene() {
    let (dir, scene) = write_scene(TRIANGLE_SCENE);
    let output = dir.path().join("ramp.kn5");
    export(&scene, &output)
        .assert()
        .success()
        .stdout(contains("Exported"));
    assert!(output.exists());
}

#[test]
fn cli_reports_json_status() {
    let (dir, scene) = write_scene(TRIANGLE_SCENE);
    let output = dir.path().join("ramp.kn5");
    export(&scene, &output)
        .arg("--json")
        .assert()
        .success()
        .stdout(contains(r#""status": "success""#));
}

#[test]
fn cli_fails_on_mesh_with_children() {
    let (dir, scene) = write_scene(PARENTED_MESH_SCENE);
    let output = dir.path().join("ramp.kn5");
    export(&scene, &output)
        .assert()
        .failure()
        .stdout(contains("Export of"))
        .stdout(contains("cannot have children"));
    assert!(!output.exists());
}

#[test]
fn cli_check_lists_findings() {
    let (_dir, scene) = write_scene(TRIANGLE_SCENE);
    let mut cmd = Command::cargo_bin("kn5-export").expect("binary exists");
    cmd.arg("--check").arg(&scene);
    cmd.assert()
        .success()
        .stdout(contains("warning [KN5_NO_NODES]"));

    let (_dir, scene) = write_scene(PARENTED_MESH_SCENE);
    let mut cmd = Command::cargo_bin("kn5-export").expect("binary exists");
    cmd.arg("--check").arg(&scene);
    cmd.assert()
        .failure()
        .stdout(contains("error [KN5_MESH_CHILDREN]"));
}

#[test]
fn cli_inspects_exported_file() {
    let (dir, scene) = write_scene(TRIANGLE_SCENE);
    let output = dir.path().join("ramp.kn5");
    export(&scene, &output).assert().success();

    let mut cmd = Command::cargo_bin("kn5-export").expect("binary exists");
    cmd.arg("--inspect").arg(&output);
    cmd.assert()
        .success()
        .stdout(contains("KN5 version 5"))
        .stdout(contains("Materials: 1"))
        .stdout(contains(" - Road (ksPerPixel)"))
        .stdout(contains("BlenderFile [node, 1 children]"))
        .stdout(contains("Ramp [mesh, 3 vertices, 3 indices, material 0]"));
}

#[test]
fn cli_rejects_unknown_flags() {
    let mut cmd = Command::cargo_bin("kn5-export").expect("binary exists");
    cmd.arg("--frobnicate");
    cmd.assert()
        .failure()
        .stderr(contains("Unknown argument: --frobnicate").and(contains("Usage")));
}
