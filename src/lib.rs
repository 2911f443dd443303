//! KN5 exporter for racing simulator track scenes.
//!
//! A scene is anything implementing [`SceneGraph`]; [`Scene`] is the
//! in-memory implementation, loadable from XML. [`export_kn5`] turns a scene
//! into a KN5 container, writing standalone texture copies next to it.

pub mod convert;
pub mod error;
pub mod export;
pub mod kn5;
pub mod mesh;
pub mod preflight;
pub mod scene;

pub use error::{ExportError, ExportResult, Warnings};
pub use export::{export_kn5, export_to_bytes, write_kn5, ExportOptions, ExportReport, ExportStatus};
pub use kn5::Kn5File;
pub use mesh::{Face, Mesh};
pub use preflight::{preflight, Diagnostic, Severity};
pub use scene::{
    Image, ImageSource, Kn5Settings, Material, ObjectId, ObjectKind, Scene, SceneGraph,
    SceneObject, ShaderProperty,
};
