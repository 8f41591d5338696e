//! Declaration scanner.
//!
//! Collects `META-INF/services/<interface>` declarations from every classpath
//! entry:
//! 1. Expanded directories are walked for `META-INF/services/*` files
//! 2. Archives are searched for members under `META-INF/services/`
//! 3. Per-entry results meet at a single concurrent merge point and are
//!    frozen into a [`DeclarationTable`] once every entry has finished

use crate::error::Result;
use crate::model::{DeclarationTable, parse_provider_lines};
use dashmap::DashMap;
use rayon::prelude::*;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

pub const META_INF_SERVICES: &str = "META-INF/services/";

/// How a classpath entry is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Archive,
    Other,
}

impl EntryKind {
    pub fn of(path: &Path) -> Self {
        if path.is_dir() {
            return EntryKind::Directory;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if path.is_file() && (ext == "jar" || ext == "zip") {
            EntryKind::Archive
        } else {
            EntryKind::Other
        }
    }
}

/// A classpath entry, or one member of it, that could not be read.
#[derive(Debug, Clone)]
pub struct ScanFailure {
    pub entry: PathBuf,
    /// Archive member or file inside the entry, when the failure is that narrow.
    pub member: Option<String>,
    pub error: String,
}

/// Result of a scan over a whole classpath
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub table: DeclarationTable,
    pub failures: Vec<ScanFailure>,
    /// Number of classpath entries visited
    pub entries: usize,
    /// Number of services files read successfully
    pub declaration_files: usize,
    pub duration: std::time::Duration,
}

/// One services file found inside an entry.
struct Found {
    interface: String,
    providers: Vec<String>,
}

#[derive(Default)]
struct EntryScan {
    found: Vec<Found>,
    failures: Vec<ScanFailure>,
}

impl EntryScan {
    fn fail(&mut self, entry: &Path, member: Option<String>, error: impl ToString) {
        let failure = ScanFailure {
            entry: entry.to_path_buf(),
            member,
            error: error.to_string(),
        };
        warn!(
            "Failed to read {:?}{}: {}",
            failure.entry,
            failure
                .member
                .as_deref()
                .map(|m| format!(" ({m})"))
                .unwrap_or_default(),
            failure.error
        );
        self.failures.push(failure);
    }
}

/// Contributions to one interface, tagged with where they were found so the
/// frozen table does not depend on thread scheduling.
type Contributions = Vec<((usize, usize), Vec<String>)>;

pub struct DeclarationScanner;

impl DeclarationScanner {
    /// Scans all entries in parallel; unreadable entries and members are
    /// reported but never stop the others.
    pub fn scan(classpath: &[PathBuf]) -> ScanReport {
        let start = std::time::Instant::now();
        let merged: DashMap<String, Contributions> = DashMap::new();

        let per_entry: Vec<(usize, Vec<ScanFailure>)> = classpath
            .par_iter()
            .enumerate()
            .map(|(entry_index, path)| {
                let scan = Self::scan_entry(path);
                let files = scan.found.len();
                for (seq, found) in scan.found.into_iter().enumerate() {
                    merged
                        .entry(found.interface)
                        .or_default()
                        .push(((entry_index, seq), found.providers));
                }
                (files, scan.failures)
            })
            .collect();

        let mut report = ScanReport {
            table: Self::freeze(merged),
            entries: classpath.len(),
            ..Default::default()
        };
        for (files, failures) in per_entry {
            report.declaration_files += files;
            report.failures.extend(failures);
        }
        report.duration = start.elapsed();

        info!(
            "Declaration scan complete: {} entries, {} services files, {} interfaces, {} failures in {:?}",
            report.entries,
            report.declaration_files,
            report.table.len(),
            report.failures.len(),
            report.duration
        );
        report
    }

    /// Orders keys by first discovery and concatenates each key's
    /// contributions in classpath order.
    fn freeze(merged: DashMap<String, Contributions>) -> DeclarationTable {
        let mut keyed: Vec<(String, Contributions)> = merged
            .into_iter()
            .map(|(interface, mut contributions)| {
                contributions.sort_by_key(|(position, _)| *position);
                (interface, contributions)
            })
            .collect();
        keyed.sort_by_key(|(_, contributions)| contributions.first().map(|(position, _)| *position));

        let mut table = DeclarationTable::new();
        for (interface, contributions) in keyed {
            table.extend(
                interface,
                contributions
                    .into_iter()
                    .flat_map(|(_, providers)| providers),
            );
        }
        table
    }

    fn scan_entry(path: &Path) -> EntryScan {
        let kind = EntryKind::of(path);
        debug!("Scanning {:?} as {:?}", path, kind);
        match kind {
            EntryKind::Directory => Self::scan_directory(path),
            EntryKind::Archive => {
                let mut scan = EntryScan::default();
                if let Err(e) = Self::scan_archive(path, &mut scan) {
                    scan.fail(path, None, e);
                }
                scan
            }
            EntryKind::Other => EntryScan::default(),
        }
    }

    fn scan_directory(root: &Path) -> EntryScan {
        let mut scan = EntryScan::default();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let member = e.path().map(|p| p.display().to_string());
                    scan.fail(root, member, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_services_file(entry.path()) {
                continue;
            }
            let Some(interface) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match std::fs::read_to_string(entry.path()) {
                Ok(text) => scan.found.push(Found {
                    interface,
                    providers: parse_provider_lines(&text),
                }),
                Err(e) => scan.fail(root, Some(entry.path().display().to_string()), e),
            }
        }
        scan
    }

    fn scan_archive(path: &Path, scan: &mut EntryScan) -> Result<()> {
        let mut archive = ZipArchive::new(File::open(path)?)?;
        for i in 0..archive.len() {
            let mut member = match archive.by_index(i) {
                Ok(member) => member,
                Err(e) => {
                    scan.fail(path, Some(format!("#{i}")), e);
                    continue;
                }
            };
            let name = member.name().to_string();
            let Some(interface) = services_member_interface(&name) else {
                continue;
            };
            if member.is_dir() {
                continue;
            }
            let mut text = String::new();
            match member.read_to_string(&mut text) {
                Ok(_) => scan.found.push(Found {
                    interface: interface.to_string(),
                    providers: parse_provider_lines(&text),
                }),
                Err(e) => scan.fail(path, Some(name.clone()), e),
            }
        }
        Ok(())
    }
}

/// `.../META-INF/services/<file>`
fn is_services_file(path: &Path) -> bool {
    let parent = path.parent();
    let grandparent = parent.and_then(Path::parent);
    parent.and_then(|p| p.file_name()).is_some_and(|n| n == "services")
        && grandparent
            .and_then(|p| p.file_name())
            .is_some_and(|n| n == "META-INF")
}

/// Interface name of an archive member directly under `META-INF/services/`.
///
/// Deeper members are not services files, matching the directory rule.
fn services_member_interface(name: &str) -> Option<&str> {
    if name.len() <= META_INF_SERVICES.len() {
        return None;
    }
    let rest = name.strip_prefix(META_INF_SERVICES)?;
    if rest.contains('/') {
        return None;
    }
    Some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_services_dir(root: &Path, files: &[(&str, &str)]) {
        let services = root.join("META-INF/services");
        std::fs::create_dir_all(&services).unwrap();
        for (name, content) in files {
            std::fs::write(services.join(name), content).unwrap();
        }
    }

    fn write_jar(path: &Path, files: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        zip.add_directory("META-INF/services/", options).unwrap();
        for (name, content) in files {
            zip.start_file(format!("{META_INF_SERVICES}{name}"), options)
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.start_file("com/x/Api.class", options).unwrap();
        zip.write_all(&[0xCA, 0xFE, 0xBA, 0xBE]).unwrap();
        zip.finish().unwrap();
    }

    const FILES: &[(&str, &str)] = &[
        ("com.x.Api", "com.x.impl.Foo\n# comment\n\ncom.x.impl.Bar\n"),
        ("com.x.Other", "com.x.impl.Baz"),
    ];

    #[test]
    fn test_directory_and_archive_yield_equal_tables() {
        let dir = tempdir().unwrap();
        let classes = dir.path().join("classes");
        write_services_dir(&classes, FILES);
        let jar = dir.path().join("lib.jar");
        write_jar(&jar, FILES);

        let from_dir = DeclarationScanner::scan(&[classes]);
        let from_jar = DeclarationScanner::scan(&[jar]);

        assert!(from_dir.failures.is_empty());
        assert!(from_jar.failures.is_empty());
        assert_eq!(from_dir.table, from_jar.table);
        assert_eq!(
            from_dir.table.providers("com.x.Api").unwrap(),
            ["com.x.impl.Foo", "com.x.impl.Bar"]
        );
    }

    #[test]
    fn test_no_blank_or_comment_lines_survive() {
        let dir = tempdir().unwrap();
        write_services_dir(dir.path(), &[("a.B", "#x\n\n  \n# y\na.impl.C\n")]);

        let report = DeclarationScanner::scan(&[dir.path().to_path_buf()]);
        for (_, providers) in report.table.iter() {
            for provider in providers {
                assert!(!provider.trim().is_empty());
                assert!(!provider.starts_with('#'));
            }
        }
        assert_eq!(report.table.pair_count(), 1);
    }

    #[test]
    fn test_entries_are_appended_in_classpath_order() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second.jar");
        write_services_dir(&first, &[("a.B", "a.impl.One")]);
        write_jar(&second, &[("a.B", "a.impl.Two")]);

        let report = DeclarationScanner::scan(&[first, second]);
        assert_eq!(report.table.providers("a.B").unwrap(), ["a.impl.One", "a.impl.Two"]);
        assert_eq!(report.declaration_files, 2);
    }

    #[test]
    fn test_unreadable_entry_does_not_stop_others() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("broken.jar");
        std::fs::write(&broken, b"not a zip").unwrap();
        let good = dir.path().join("good");
        write_services_dir(&good, &[("a.B", "a.impl.C")]);

        let report = DeclarationScanner::scan(&[broken.clone(), good]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].entry, broken);
        assert_eq!(report.table.providers("a.B").unwrap(), ["a.impl.C"]);
    }

    #[test]
    fn test_other_entries_contribute_nothing() {
        let dir = tempdir().unwrap();
        let other = dir.path().join("notes.txt");
        std::fs::write(&other, "META-INF/services/a.B").unwrap();
        let missing = dir.path().join("missing");

        let report = DeclarationScanner::scan(&[other, missing]);
        assert!(report.table.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.entries, 2);
    }

    #[test]
    fn test_services_files_must_sit_directly_under_meta_inf() {
        assert!(is_services_file(Path::new("/x/META-INF/services/a.B")));
        assert!(!is_services_file(Path::new("/x/services/a.B")));
        assert!(!is_services_file(Path::new("/x/META-INF/services/sub/a.B")));
        assert_eq!(services_member_interface("META-INF/services/a.B"), Some("a.B"));
        assert_eq!(services_member_interface("META-INF/services/"), None);
        assert_eq!(services_member_interface("META-INF/services/sub/a.B"), None);
        assert_eq!(services_member_interface("META-INF/MANIFEST.MF"), None);
    }
}
