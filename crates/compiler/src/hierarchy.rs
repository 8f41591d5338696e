//! Supertype lookups for provider verification.

use crate::error::Result;
use dashmap::DashMap;
use rayon::prelude::*;
use ristretto_classfile::ClassFile;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

/// Direct supertypes of one class, as internal names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Supertypes {
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
}

impl Supertypes {
    /// The internal name of `class` with its direct supertypes.
    pub fn of(class: &ClassFile) -> Result<(String, Self)> {
        let pool = &class.constant_pool;
        let name = pool.try_get_class(class.this_class)?.to_string();
        let super_class = if class.super_class == 0 {
            None
        } else {
            Some(pool.try_get_class(class.super_class)?.to_string())
        };
        let interfaces = class
            .interfaces
            .iter()
            .map(|index| pool.try_get_class(*index).map(|name| name.to_string()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((
            name,
            Self {
                super_class,
                interfaces,
            },
        ))
    }
}

/// Parses a compiled class.
pub fn read_class(bytes: &[u8]) -> Result<ClassFile> {
    Ok(ClassFile::from_bytes(&mut Cursor::new(bytes.to_vec()))?)
}

pub trait TypeHierarchy: Send + Sync {
    /// `None` when the type is not known.
    fn supertypes(&self, internal_name: &str) -> Option<Supertypes>;

    /// Whether `sub` is `sup` or reaches it through superclasses and
    /// super-interfaces. Unknown types reach nothing.
    fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![sub.to_string()];
        while let Some(current) = pending.pop() {
            if current == sup {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(supertypes) = self.supertypes(&current) {
                pending.extend(supertypes.super_class);
                pending.extend(supertypes.interfaces);
            }
        }
        false
    }
}

/// Hierarchy read from compiled classes in directories and archives.
#[derive(Debug, Default)]
pub struct ClasspathHierarchy {
    types: DashMap<String, Supertypes>,
}

impl ClasspathHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every class of every entry; unreadable classes are skipped.
    pub fn load(classpath: &[PathBuf]) -> Self {
        let hierarchy = Self::new();
        classpath.par_iter().for_each(|entry| {
            let result = if entry.is_dir() {
                hierarchy.index_directory(entry)
            } else if entry.is_file() {
                hierarchy.index_archive(entry)
            } else {
                Ok(())
            };
            if let Err(e) = result {
                warn!("Failed to index classes in {:?}: {}", entry, e);
            }
        });
        info!("Indexed {} types for provider verification", hierarchy.len());
        hierarchy
    }

    /// Records the class in `bytes`, returning its internal name.
    pub fn insert_class(&self, bytes: &[u8]) -> Result<String> {
        self.insert_parsed(&read_class(bytes)?)
    }

    /// Records an already parsed class, returning its internal name.
    pub fn insert_parsed(&self, class: &ClassFile) -> Result<String> {
        let (name, supertypes) = Supertypes::of(class)?;
        self.types.insert(name.clone(), supertypes);
        Ok(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn index_directory(&self, root: &Path) -> Result<()> {
        for entry in WalkDir::new(root) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "class")
            {
                let bytes = std::fs::read(entry.path())?;
                self.insert_or_skip(&bytes, &entry.path().display().to_string());
            }
        }
        Ok(())
    }

    fn index_archive(&self, path: &Path) -> Result<()> {
        let mut archive = ZipArchive::new(File::open(path)?)?;
        for i in 0..archive.len() {
            let mut member = archive.by_index(i)?;
            if member.is_dir() || !member.name().ends_with(".class") {
                continue;
            }
            let name = member.name().to_string();
            let mut bytes = Vec::with_capacity(member.size() as usize);
            member.read_to_end(&mut bytes)?;
            self.insert_or_skip(&bytes, &name);
        }
        Ok(())
    }

    fn insert_or_skip(&self, bytes: &[u8], origin: &str) {
        if let Err(e) = self.insert_class(bytes) {
            debug!("Skipping {}: {}", origin, e);
        }
    }
}

impl TypeHierarchy for ClasspathHierarchy {
    fn supertypes(&self, internal_name: &str) -> Option<Supertypes> {
        self.types.get(internal_name).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowloader_classfile::{ClassBuilder, access};
    use std::io::Write;
    use tempfile::tempdir;

    fn class(name: &str, super_name: &str, interfaces: &[&str]) -> Vec<u8> {
        let mut builder = ClassBuilder::new(name, super_name).unwrap();
        for interface in interfaces {
            builder = builder.implements(interface).unwrap();
        }
        builder.build().to_bytes().unwrap()
    }

    fn interface(name: &str, extends: &[&str]) -> Vec<u8> {
        let mut builder = ClassBuilder::new(name, "java/lang/Object")
            .unwrap()
            .access(access::ACC_PUBLIC | access::ACC_INTERFACE | access::ACC_ABSTRACT);
        for parent in extends {
            builder = builder.implements(parent).unwrap();
        }
        builder.build().to_bytes().unwrap()
    }

    #[test]
    fn test_transitive_interfaces_through_superclass() {
        let hierarchy = ClasspathHierarchy::new();
        hierarchy.insert_class(&interface("com/x/Api", &[])).unwrap();
        hierarchy
            .insert_class(&interface("com/x/RichApi", &["com/x/Api"]))
            .unwrap();
        hierarchy
            .insert_class(&class("com/x/Base", "java/lang/Object", &["com/x/RichApi"]))
            .unwrap();
        hierarchy
            .insert_class(&class("com/x/Impl", "com/x/Base", &[]))
            .unwrap();

        assert!(hierarchy.is_subtype("com/x/Impl", "com/x/Api"));
        assert!(hierarchy.is_subtype("com/x/Impl", "com/x/Impl"));
        assert!(!hierarchy.is_subtype("com/x/Base", "com/x/Impl"));
        assert!(!hierarchy.is_subtype("com/x/Unknown", "com/x/Api"));
    }

    #[test]
    fn test_load_reads_directories_and_jars() {
        let dir = tempdir().unwrap();
        let classes = dir.path().join("classes/com/x");
        std::fs::create_dir_all(&classes).unwrap();
        std::fs::write(classes.join("Api.class"), interface("com/x/Api", &[])).unwrap();
        std::fs::write(classes.join("broken.class"), b"nope").unwrap();

        let jar = dir.path().join("lib.jar");
        let mut zip = zip::ZipWriter::new(File::create(&jar).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("com/y/Impl.class", options).unwrap();
        zip.write_all(&class("com/y/Impl", "java/lang/Object", &["com/x/Api"]))
            .unwrap();
        zip.finish().unwrap();

        let hierarchy = ClasspathHierarchy::load(&[dir.path().join("classes"), jar]);
        assert_eq!(hierarchy.len(), 2);
        assert!(hierarchy.is_subtype("com/y/Impl", "com/x/Api"));
    }
}
