//! Output sinks for generated classes and resources.

use crate::error::Result;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

pub trait Filer: Send + Sync {
    /// Writes `<internal_name>.class`.
    fn write_class(&self, internal_name: &str, bytes: &[u8]) -> Result<()>;

    /// Reads a resource previously written to the output, if any.
    fn read_resource(&self, path: &str) -> Result<Option<String>>;

    fn write_resource(&self, path: &str, content: &str) -> Result<()>;
}

/// Writes into a class output directory.
#[derive(Debug, Clone)]
pub struct DirectoryFiler {
    root: PathBuf,
}

impl DirectoryFiler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write(&self, relative: &str, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

impl Filer for DirectoryFiler {
    fn write_class(&self, internal_name: &str, bytes: &[u8]) -> Result<()> {
        self.write(&format!("{internal_name}.class"), bytes)
    }

    fn read_resource(&self, path: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.root.join(path)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_resource(&self, path: &str, content: &str) -> Result<()> {
        self.write(path, content.as_bytes())
    }
}

/// Keeps everything in memory, for hosts that package the output themselves.
#[derive(Debug, Default)]
pub struct MemoryFiler {
    classes: DashMap<String, Vec<u8>>,
    resources: DashMap<String, String>,
}

impl MemoryFiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.classes.get(internal_name).map(|entry| entry.value().clone())
    }

    pub fn resource(&self, path: &str) -> Option<String> {
        self.resources.get(path).map(|entry| entry.value().clone())
    }

    /// Sorted internal names of every written class.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

impl Filer for MemoryFiler {
    fn write_class(&self, internal_name: &str, bytes: &[u8]) -> Result<()> {
        self.classes.insert(internal_name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_resource(&self, path: &str) -> Result<Option<String>> {
        Ok(self.resource(path))
    }

    fn write_resource(&self, path: &str, content: &str) -> Result<()> {
        self.resources.insert(path.to_string(), content.to_string());
        Ok(())
    }
}
