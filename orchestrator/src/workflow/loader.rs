//! Workflow definition loading
//!
//! A workflow is either a raw instruction document (`*.md`, `*.xml`, ...)
//! whose id is the file stem, or a `.toml` manifest pointing at one:
//!
//! ```toml
//! id = "dev-story"
//! name = "Develop Story"
//! description = "Implement the next story"
//! instructions = "instructions.md"
//!
//! [variables]
//! story_dir = "{project-root}/docs/stories"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::LoadError;

/// A loaded workflow, ready to be parsed and executed
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Raw instruction document
    pub instructions: String,
    /// Variables for the workflow layer
    pub variables: Map<String, Value>,
    /// Directory relative paths inside the workflow resolve against
    pub source_dir: Option<PathBuf>,
}

impl WorkflowDefinition {
    /// Build a definition from an in-memory instruction document
    pub fn from_document(id: impl Into<String>, instructions: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            instructions: instructions.into(),
            variables: Map::new(),
            source_dir: None,
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }
}

/// Loads workflow definitions by path
pub trait WorkflowLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<WorkflowDefinition, LoadError>;
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    instructions: PathBuf,
    #[serde(default)]
    variables: toml::Table,
}

/// Loads workflows from the filesystem
#[derive(Debug, Clone, Default)]
pub struct FileWorkflowLoader;

impl FileWorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    fn read(path: &Path) -> Result<String, LoadError> {
        std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load_manifest(&self, path: &Path) -> Result<WorkflowDefinition, LoadError> {
        let content = Self::read(path)?;
        let manifest: Manifest = toml::from_str(&content).map_err(|e| LoadError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let instructions_path = if manifest.instructions.is_absolute() {
            manifest.instructions.clone()
        } else {
            dir.join(&manifest.instructions)
        };
        let instructions = Self::read(&instructions_path)?;

        let variables = match serde_json::to_value(&manifest.variables) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                return Err(LoadError::Manifest {
                    path: path.to_path_buf(),
                    message: format!("invalid [variables] table: {}", e),
                })
            }
        };

        let id = manifest.id.unwrap_or_else(|| file_stem(path));
        Ok(WorkflowDefinition {
            name: manifest.name.unwrap_or_else(|| id.clone()),
            id,
            description: manifest.description,
            instructions,
            variables,
            source_dir: Some(dir),
        })
    }
}

impl WorkflowLoader for FileWorkflowLoader {
    fn load(&self, path: &Path) -> Result<WorkflowDefinition, LoadError> {
        let definition = if path.extension().is_some_and(|ext| ext == "toml") {
            self.load_manifest(path)?
        } else {
            let instructions = Self::read(path)?;
            let mut definition = WorkflowDefinition::from_document(file_stem(path), instructions);
            definition.source_dir = path.parent().map(Path::to_path_buf);
            definition
        };

        tracing::debug!(
            workflow_id = %definition.id,
            path = %path.display(),
            "Loaded workflow definition"
        );
        Ok(definition)
    }
}

/// File stem used as a workflow id
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "workflow".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<step n="1" goal="Say hi"><output>hi</output></step>"#;

    #[test]
    fn test_load_raw_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greet.md");
        std::fs::write(&path, DOC).unwrap();

        let def = FileWorkflowLoader::new().load(&path).unwrap();
        assert_eq!(def.id, "greet");
        assert_eq!(def.instructions, DOC);
        assert_eq!(def.source_dir.as_deref(), Some(dir.path()));
        assert!(def.variables.is_empty());
    }

    #[test]
    fn test_load_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("instructions.md"), DOC).unwrap();
        let manifest = dir.path().join("workflow.toml");
        std::fs::write(
            &manifest,
            r#"
id = "dev-story"
name = "Develop Story"
description = "Implement the next story"
instructions = "instructions.md"

[variables]
story_dir = "{project-root}/docs/stories"
max_tasks = 5
"#,
        )
        .unwrap();

        let def = FileWorkflowLoader::new().load(&manifest).unwrap();
        assert_eq!(def.id, "dev-story");
        assert_eq!(def.name, "Develop Story");
        assert_eq!(def.instructions, DOC);
        assert_eq!(def.variables["story_dir"], "{project-root}/docs/stories");
        assert_eq!(def.variables["max_tasks"], 5);
    }

    #[test]
    fn test_manifest_id_defaults_to_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.md"), DOC).unwrap();
        let manifest = dir.path().join("review.toml");
        std::fs::write(&manifest, "instructions = \"doc.md\"\n").unwrap();

        let def = FileWorkflowLoader::new().load(&manifest).unwrap();
        assert_eq!(def.id, "review");
        assert_eq!(def.name, "review");
    }

    #[test]
    fn test_missing_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileWorkflowLoader::new();
        assert!(matches!(
            loader.load(&dir.path().join("absent.md")),
            Err(LoadError::Io { .. })
        ));

        let manifest = dir.path().join("broken.toml");
        std::fs::write(&manifest, "name = 3").unwrap();
        assert!(matches!(
            loader.load(&manifest),
            Err(LoadError::Manifest { .. })
        ));
    }
}
