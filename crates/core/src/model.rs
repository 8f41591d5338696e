//! Service declarations shared by the scanner, the creator generator and the
//! registry patcher.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::facade::creator_internal_name;
use shadowloader_classfile::descriptor::internal_name;

/// Service interface binary name → provider binary names, in discovery order.
///
/// Provider lists are never deduplicated: when the same provider is declared
/// twice, through a services file and through an annotation, it is listed
/// (and later registered) twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationTable {
    entries: IndexMap<String, Vec<String>>,
}

/// One `(interface, provider)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderRecord {
    pub interface: String,
    pub provider: String,
}

impl ProviderRecord {
    pub fn new(interface: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            provider: provider.into(),
        }
    }

    pub fn interface_internal_name(&self) -> String {
        internal_name(&self.interface)
    }

    pub fn creator_internal_name(&self) -> String {
        creator_internal_name(&self.provider)
    }
}

impl DeclarationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interface: impl Into<String>, provider: impl Into<String>) {
        self.entries
            .entry(interface.into())
            .or_default()
            .push(provider.into());
    }

    /// Appends providers after any already listed for the interface.
    pub fn extend(
        &mut self,
        interface: impl Into<String>,
        providers: impl IntoIterator<Item = String>,
    ) {
        self.entries
            .entry(interface.into())
            .or_default()
            .extend(providers);
    }

    /// Concatenates `other` into `self`, key by key.
    pub fn merge(&mut self, other: DeclarationTable) {
        for (interface, providers) in other.entries {
            self.extend(interface, providers);
        }
    }

    pub fn providers(&self, interface: &str) -> Option<&[String]> {
        self.entries.get(interface).map(Vec::as_slice)
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(interface, providers)| (interface.as_str(), providers.as_slice()))
    }

    /// Every pair, interfaces in table order and providers in list order.
    pub fn records(&self) -> Vec<ProviderRecord> {
        self.iter()
            .flat_map(|(interface, providers)| {
                providers
                    .iter()
                    .map(move |provider| ProviderRecord::new(interface, provider.as_str()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pair_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

impl FromIterator<ProviderRecord> for DeclarationTable {
    fn from_iter<T: IntoIterator<Item = ProviderRecord>>(iter: T) -> Self {
        let mut table = DeclarationTable::new();
        for record in iter {
            table.push(record.interface, record.provider);
        }
        table
    }
}

/// Provider names from the text of a services file.
///
/// Everything after `#` is a comment; surrounding whitespace is dropped and
/// lines left empty are skipped.
pub fn parse_provider_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
