//! The provider-creator generator.
//!
//! Runs as a round-based pass over annotated classes:
//! 1. Each round records `(interface, provider)` pairs from the annotation,
//!    checking subtypes when asked to
//! 2. The final round emits one creator per provider and the
//!    `META-INF/services` resources for everything recorded

use crate::creator::generate_creator;
use crate::diagnostic::{Diagnostic, Messager};
use crate::element::{AUTO_SERVICE_DESCRIPTOR, AnnotatedElement, RoundEnvironment};
use crate::error::{ProcessorError, Result};
use crate::filer::Filer;
use crate::hierarchy::TypeHierarchy;
use crate::options::ProcessorOptions;
use indexmap::IndexSet;
use rayon::prelude::*;
use shadowloader_classfile::descriptor::{binary_name, internal_name};
use shadowloader_core::facade::FacadeContract;
use shadowloader_core::model::{DeclarationTable, parse_provider_lines};
use shadowloader_core::scanner::META_INF_SERVICES;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

pub struct ProviderCreatorProcessor {
    options: ProcessorOptions,
    contract: FacadeContract,
    filer: Arc<dyn Filer>,
    hierarchy: Arc<dyn TypeHierarchy>,
    messager: Messager,
    providers: DeclarationTable,
    failed: bool,
}

impl ProviderCreatorProcessor {
    pub fn new(
        options: ProcessorOptions,
        filer: Arc<dyn Filer>,
        hierarchy: Arc<dyn TypeHierarchy>,
    ) -> Self {
        Self {
            options,
            contract: FacadeContract::default(),
            filer,
            hierarchy,
            messager: Messager::default(),
            providers: DeclarationTable::new(),
            failed: false,
        }
    }

    pub fn with_contract(mut self, contract: FacadeContract) -> Self {
        self.contract = contract;
        self
    }

    /// Handles one round. Failures are reported as diagnostics and mark the
    /// pass failed; the round itself always completes.
    pub fn process(&mut self, round: &RoundEnvironment) -> bool {
        if round.processing_over {
            if let Err(e) = self.generate() {
                self.failed = true;
                self.messager.fatal(&e);
            }
        } else {
            self.record(round);
        }
        true
    }

    /// Declarations recorded so far, interfaces in first-seen order.
    pub fn declarations(&self) -> &DeclarationTable {
        &self.providers
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.messager.diagnostics()
    }

    /// Whether a fatal error was reported: an unreadable class or a failed
    /// generation.
    pub fn failed(&self) -> bool {
        self.failed
    }

    fn record(&mut self, round: &RoundEnvironment) {
        for unreadable in &round.unreadable {
            self.failed = true;
            self.messager.fatal(unreadable);
        }

        if self.options.debug {
            let names: Vec<String> = round.elements.iter().map(|e| e.binary_name()).collect();
            self.messager.note(names.join(", "));
        }

        for element in &round.elements {
            let provider = element.binary_name();
            if element.services.is_empty() {
                self.messager.error(
                    "No service interfaces provided for element!",
                    &provider,
                    AUTO_SERVICE_DESCRIPTOR,
                );
                continue;
            }
            for service in &element.services {
                if self.options.verify && !self.implements(element, service) {
                    self.messager.error(
                        format!(
                            "ServiceProviders must implement their service provider interface. {} does not implement {}",
                            provider,
                            binary_name(service)
                        ),
                        &provider,
                        AUTO_SERVICE_DESCRIPTOR,
                    );
                    continue;
                }
                self.providers.push(binary_name(service), provider.clone());
            }
        }
    }

    fn implements(&self, element: &AnnotatedElement, service: &str) -> bool {
        element.name == service
            || element
                .super_class
                .iter()
                .chain(element.interfaces.iter())
                .any(|supertype| self.hierarchy.is_subtype(supertype, service))
    }

    fn generate(&self) -> Result<()> {
        let providers: Vec<String> = self
            .providers
            .iter()
            .flat_map(|(_, providers)| providers.iter().cloned())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();

        providers
            .par_iter()
            .map(|provider| self.emit_creator(provider))
            .collect::<Result<Vec<()>>>()?;

        self.write_service_resources()?;
        info!(
            "Generated {} creators for {} interfaces",
            providers.len(),
            self.providers.len()
        );
        Ok(())
    }

    fn emit_creator(&self, provider: &str) -> Result<()> {
        let wrap = |source: ProcessorError| ProcessorError::Generation {
            creator: format!("{}{}", internal_name(provider), shadowloader_core::facade::CREATOR_SUFFIX),
            source: Box::new(source),
        };
        let creator = generate_creator(&self.contract, provider).map_err(wrap)?;
        if self.options.debug {
            let simple = creator.name.rsplit('/').next().unwrap_or(&creator.name);
            self.messager.note(format!("Generating {simple} ..."));
        }
        self.filer
            .write_class(&creator.name, &creator.bytes)
            .map_err(wrap)
    }

    /// Rewrites each interface's services resource as the sorted union of
    /// what is already there and what was recorded.
    fn write_service_resources(&self) -> Result<()> {
        for (interface, providers) in self.providers.iter() {
            let path = format!("{META_INF_SERVICES}{interface}");
            let mut all = BTreeSet::new();
            if let Some(existing) = self.filer.read_resource(&path)? {
                all.extend(parse_provider_lines(&existing));
            }
            all.extend(providers.iter().cloned());
            let content: String = all.iter().map(|provider| format!("{provider}\n")).collect();
            self.filer.write_resource(&path, &content)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticKind;
    use crate::element::fixtures::provider;
    use crate::filer::MemoryFiler;
    use crate::hierarchy::ClasspathHierarchy;
    use shadowloader_classfile::ClassBuilder;

    struct FailingFiler;

    impl Filer for FailingFiler {
        fn write_class(&self, _: &str, _: &[u8]) -> Result<()> {
            Err(std::io::Error::other("read-only output").into())
        }

        fn read_resource(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn write_resource(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn round_of(classes: &[Vec<u8>]) -> RoundEnvironment {
        RoundEnvironment::from_classes(classes, &ClasspathHierarchy::new())
    }

    fn processor(options: &[&str], filer: Arc<dyn Filer>) -> ProviderCreatorProcessor {
        let hierarchy = ClasspathHierarchy::new();
        let api = ClassBuilder::new("com/x/Api", "java/lang/Object")
            .unwrap()
            .build()
            .to_bytes()
            .unwrap();
        hierarchy.insert_class(&api).unwrap();
        ProviderCreatorProcessor::new(
            ProcessorOptions::parse(options.iter().copied()),
            filer,
            Arc::new(hierarchy),
        )
    }

    #[test]
    fn test_rounds_accumulate_then_generate() {
        let filer = Arc::new(MemoryFiler::new());
        let mut processor = processor(&[], filer.clone());

        let first = round_of(&[provider("com/x/impl/Foo", &["com/x/Api"], &["com/x/Api"])]);
        let second = round_of(&[provider(
            "com/x/impl/Outer$Bar",
            &["com/x/Api"],
            &["com/x/Api", "com/x/Other"],
        )]);
        assert!(processor.process(&first));
        assert!(processor.process(&second));
        assert!(filer.class_names().is_empty());
        assert!(processor.process(&RoundEnvironment::over()));

        assert!(!processor.failed());
        assert_eq!(
            processor.declarations().providers("com.x.Api").unwrap(),
            ["com.x.impl.Foo", "com.x.impl.Outer$Bar"]
        );
        assert_eq!(
            filer.class_names(),
            ["com/x/impl/Foo_Creator", "com/x/impl/Outer$Bar_Creator"]
        );
        assert_eq!(
            filer.resource("META-INF/services/com.x.Api").as_deref(),
            Some("com.x.impl.Foo\ncom.x.impl.Outer$Bar\n")
        );
        assert_eq!(
            filer.resource("META-INF/services/com.x.Other").as_deref(),
            Some("com.x.impl.Outer$Bar\n")
        );
    }

    #[test]
    fn test_empty_annotation_is_reported_and_skipped() {
        let filer = Arc::new(MemoryFiler::new());
        let mut processor = processor(&[], filer.clone());
        let round = round_of(&[provider("com/x/impl/Foo", &[], &[])]);
        processor.process(&round);
        processor.process(&RoundEnvironment::over());

        let diagnostics = processor.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Error);
        assert_eq!(diagnostics[0].message, "No service interfaces provided for element!");
        assert_eq!(diagnostics[0].element.as_deref(), Some("com.x.impl.Foo"));
        assert!(processor.declarations().is_empty());
        assert!(!processor.failed());
    }

    #[test]
    fn test_verify_skips_non_implementers() {
        let filer = Arc::new(MemoryFiler::new());
        let mut processor = processor(&["verify=true"], filer.clone());
        let round = round_of(&[
            provider("com/x/impl/Good", &["com/x/Api"], &["com/x/Api"]),
            provider("com/x/impl/Bad", &[], &["com/x/Api"]),
        ]);
        processor.process(&round);
        processor.process(&RoundEnvironment::over());

        assert_eq!(
            processor.declarations().providers("com.x.Api").unwrap(),
            ["com.x.impl.Good"]
        );
        assert_eq!(filer.class_names(), ["com/x/impl/Good_Creator"]);
        let errors: Vec<_> = processor
            .diagnostics()
            .into_iter()
            .filter(|d| d.kind == DiagnosticKind::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.ends_with("com.x.impl.Bad does not implement com.x.Api"));
    }

    #[test]
    fn test_without_verify_non_implementers_are_kept() {
        let filer = Arc::new(MemoryFiler::new());
        let mut processor = processor(&["verify=false"], filer.clone());
        let round = round_of(&[provider("com/x/impl/Bad", &[], &["com/x/Api"])]);
        processor.process(&round);
        processor.process(&RoundEnvironment::over());
        assert_eq!(filer.class_names(), ["com/x/impl/Bad_Creator"]);
    }

    #[test]
    fn test_existing_resources_are_merged() {
        let filer = Arc::new(MemoryFiler::new());
        filer
            .write_resource("META-INF/services/com.x.Api", "# kept providers\ncom.x.impl.Zed\n")
            .unwrap();
        let mut processor = processor(&[], filer.clone());
        let round = round_of(&[provider(
            "com/x/impl/Foo",
            &["com/x/Api"],
            &["com/x/Api"],
        )]);
        processor.process(&round);
        processor.process(&RoundEnvironment::over());

        assert_eq!(
            filer.resource("META-INF/services/com.x.Api").as_deref(),
            Some("com.x.impl.Foo\ncom.x.impl.Zed\n")
        );
    }

    #[test]
    fn test_debug_notes_rounds_and_creators() {
        let filer = Arc::new(MemoryFiler::new());
        let mut processor = processor(&["debug"], filer.clone());
        let round = round_of(&[provider(
            "com/x/impl/Foo",
            &["com/x/Api"],
            &["com/x/Api"],
        )]);
        processor.process(&round);
        processor.process(&RoundEnvironment::over());

        let notes: Vec<String> = processor
            .diagnostics()
            .into_iter()
            .filter(|d| d.kind == DiagnosticKind::Note)
            .map(|d| d.message)
            .collect();
        assert_eq!(notes, ["com.x.impl.Foo", "Generating Foo_Creator ..."]);
    }

    #[test]
    fn test_generation_failure_is_fatal_but_process_completes() {
        let mut processor = processor(&[], Arc::new(FailingFiler));
        let round = round_of(&[provider(
            "com/x/impl/Foo",
            &["com/x/Api"],
            &["com/x/Api"],
        )]);
        processor.process(&round);
        assert!(processor.process(&RoundEnvironment::over()));

        assert!(processor.failed());
        let diagnostics = processor.diagnostics();
        let fatal = diagnostics.last().unwrap();
        assert_eq!(fatal.kind, DiagnosticKind::Error);
        assert!(fatal.message.contains("com/x/impl/Foo_Creator"));
        assert!(fatal.message.contains("read-only output"));
    }

    #[test]
    fn test_unreadable_class_is_fatal_but_others_still_generate() {
        let filer = Arc::new(MemoryFiler::new());
        let mut processor = processor(&[], filer.clone());
        let round = round_of(&[
            vec![0xca, 0xfe, 0xba, 0xbe, 0x00],
            provider("com/x/impl/Foo", &["com/x/Api"], &["com/x/Api"]),
        ]);
        assert!(processor.process(&round));
        assert!(processor.process(&RoundEnvironment::over()));

        assert!(processor.failed());
        assert_eq!(filer.class_names(), ["com/x/impl/Foo_Creator"]);
        let diagnostics = processor.diagnostics();
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Error);
        assert!(diagnostics[0].message.starts_with("Failed to read compiled class #0"));
        assert!(diagnostics[0].message.contains("Caused by: Class format error"));
    }
}
