use log::{info, warn};
use thiserror::Error;

/// Failures that abort an export. Anything recoverable goes to [`Warnings`].
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Mesh object '{object}' cannot have children in KN5 format")]
    MeshWithChildren { object: String },
    #[error("Object '{object}' has no material assigned")]
    NoMaterials { object: String },
    #[error("Material slot {slot} for object '{object}' has no material")]
    EmptyMaterialSlot { object: String, slot: usize },
    #[error("Material '{material}' is ignored but used by '{object}'")]
    IgnoredMaterialInUse { material: String, object: String },
    #[error("Mesh '{object}' has {count} vertices (max {max})")]
    VertexLimit {
        object: String,
        count: usize,
        max: usize,
    },
    #[error("Mesh '{object}' references vertex {index}, which does not fit a 16-bit index")]
    IndexOverflow { object: String, index: u32 },
    #[error("failed to evaluate geometry of '{object}'")]
    Geometry {
        object: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Append-only diagnostics collected during one export.
///
/// Every entry is mirrored to the `log` facade; warnings at `warn` level and
/// notices at `info` level.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Warnings {
    entries: Vec<String>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a recoverable problem.
    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.entries.push(message);
    }

    /// Records an informational notice that does not indicate a problem.
    pub fn notice(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.entries.push(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<String> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_keep_insertion_order() {
        let mut warnings = Warnings::new();
        warnings.push("first");
        warnings.notice("second");
        warnings.push(String::from("third"));
        assert_eq!(warnings.len(), 3);
        assert_eq!(warnings.iter().collect::<Vec<_>>(), ["first", "second", "third"]);
    }

    #[test]
    fn error_messages_name_the_object() {
        let err = ExportError::MeshWithChildren {
            object: "Cube".into(),
        };
        assert_eq!(
            err.to_string(),
            "Mesh object 'Cube' cannot have children in KN5 format"
        );
    }
}
