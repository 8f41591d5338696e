//! The per-unit transform a build host drives.

use crate::config::TransformConfig;
use crate::error::Result;
use crate::model::DeclarationTable;
use crate::patcher::RegistryPatcher;
use crate::scanner::{DeclarationScanner, ScanReport};
use crate::shadower::ReferenceShadower;
use rayon::prelude::*;
use ristretto_classfile::ClassFile;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, info};

/// What a unit is to the transform, decided from its name alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRole {
    /// In an ignored top-level package.
    Ignored,
    /// The registry class; receives the registrations.
    Registry,
    /// The static facade itself.
    Facade,
    /// Everything else; loader references get shadowed.
    Application,
}

#[derive(Debug, Clone)]
pub struct TransformedUnit {
    pub name: String,
    pub role: UnitRole,
    pub bytes: Vec<u8>,
    pub changed: bool,
}

pub struct ServiceLoaderTransformer {
    config: TransformConfig,
    declarations: DeclarationTable,
    patcher: RegistryPatcher,
    shadower: ReferenceShadower,
}

impl ServiceLoaderTransformer {
    pub fn new(config: TransformConfig) -> Self {
        let patcher = RegistryPatcher::new(config.facade.clone());
        let shadower = ReferenceShadower::new(config.facade.shadowing());
        Self {
            config,
            declarations: DeclarationTable::new(),
            patcher,
            shadower,
        }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn declarations(&self) -> &DeclarationTable {
        &self.declarations
    }

    /// Scans the classpath before any unit is transformed.
    ///
    /// The scanned declarations come first; annotation-derived ones are
    /// appended afterwards through [`Self::merge_declarations`].
    pub fn on_pre_transform(&mut self, classpath: &[PathBuf]) -> ScanReport {
        let report = DeclarationScanner::scan(classpath);
        self.declarations.merge(report.table.clone());
        report
    }

    /// Appends another origin's declarations; nothing is deduplicated.
    pub fn merge_declarations(&mut self, table: DeclarationTable) {
        debug!(
            "Merging {} declarations for {} interfaces",
            table.pair_count(),
            table.len()
        );
        self.declarations.merge(table);
    }

    pub fn classify(&self, internal_name: &str) -> UnitRole {
        let facade = &self.config.facade;
        if self.config.is_ignored(internal_name) {
            UnitRole::Ignored
        } else if internal_name == facade.registry {
            UnitRole::Registry
        } else if internal_name == facade.shadow_loader {
            UnitRole::Facade
        } else {
            UnitRole::Application
        }
    }

    /// Internal name of a compiled unit.
    pub fn unit_name(bytes: &[u8]) -> Result<String> {
        let class = ClassFile::from_bytes(&mut Cursor::new(bytes.to_vec()))?;
        Ok(class.constant_pool.try_get_class(class.this_class)?.to_string())
    }

    pub fn transform(&self, bytes: &[u8]) -> Result<TransformedUnit> {
        let name = Self::unit_name(bytes)?;
        let role = self.classify(&name);
        let (bytes, changed) = match role {
            UnitRole::Ignored | UnitRole::Facade => (bytes.to_vec(), false),
            UnitRole::Registry => (self.patcher.patch(bytes, &self.declarations)?.bytes, true),
            UnitRole::Application => {
                let outcome = self.shadower.shadow(bytes)?;
                let changed = outcome.is_changed();
                (outcome.bytes, changed)
            }
        };
        Ok(TransformedUnit {
            name,
            role,
            bytes,
            changed,
        })
    }

    /// Transforms units independently and in parallel; results keep input order.
    pub fn transform_all(&self, units: &[Vec<u8>]) -> Vec<Result<TransformedUnit>> {
        let results: Vec<Result<TransformedUnit>> =
            units.par_iter().map(|unit| self.transform(unit)).collect();
        let changed = results
            .iter()
            .filter(|r| r.as_ref().is_ok_and(|u| u.changed))
            .count();
        info!("Transformed {} units, {} changed", results.len(), changed);
        results
    }
}
