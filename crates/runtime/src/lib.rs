use shadowloader_compiler::{
    ClasspathHierarchy, Diagnostic, MemoryFiler, ProcessorError, ProcessorOptions,
    ProviderCreatorProcessor, RoundEnvironment,
};
use shadowloader_core::{
    DeclarationTable, ScanReport, ServiceLoaderTransformer, TransformConfig, TransformError,
    TransformedUnit,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error("Creator generation failed with {errors} errors")]
    GenerationFailed { errors: usize },
}

pub type Result<T> = std::result::Result<T, BuildError>;

/// Builds the transformer with the standard facade contract and ignore set
/// unless `config` says otherwise.
pub fn build_default_transformer(config: TransformConfig) -> ServiceLoaderTransformer {
    ServiceLoaderTransformer::new(config)
}

/// Builds a processor that verifies providers against `classpath`. Project
/// classes join the returned hierarchy as their round is read.
pub fn build_default_processor(
    config: &TransformConfig,
    options: ProcessorOptions,
    classpath: &[PathBuf],
) -> (ProviderCreatorProcessor, Arc<MemoryFiler>, Arc<ClasspathHierarchy>) {
    let filer = Arc::new(MemoryFiler::new());
    let hierarchy = Arc::new(ClasspathHierarchy::load(classpath));
    let processor = ProviderCreatorProcessor::new(options, filer.clone(), hierarchy.clone())
        .with_contract(config.facade.clone());
    (processor, filer, hierarchy)
}

/// Starts file logging for `component`; keep the returned guard alive for as
/// long as log lines should be flushed.
pub fn init_logging(component: &str, to_stderr: bool) -> impl Drop {
    shadowloader_core::logging::init_logging(component, to_stderr)
}

/// Everything one build pass works on.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub config: TransformConfig,
    pub options: ProcessorOptions,
    /// Dependency directories and archives scanned for declarations.
    pub classpath: Vec<PathBuf>,
    /// The compiled classes of the project being built.
    pub units: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Project units after transformation, in request order.
    pub units: Vec<TransformedUnit>,
    /// Generated creator classes, by internal name.
    pub creators: Vec<(String, Vec<u8>)>,
    /// `META-INF/services` resources written by the processor, by path.
    pub resources: Vec<(String, String)>,
    pub declarations: DeclarationTable,
    pub scan: ScanReport,
    pub diagnostics: Vec<Diagnostic>,
}

/// Runs the whole pass: scan, generate, then patch and shadow every unit.
///
/// Scanned declarations precede annotation-derived ones. A failed creator
/// generation or a registry that cannot be patched fails the pass.
pub fn run_build(request: BuildRequest) -> Result<BuildOutcome> {
    let mut transformer = build_default_transformer(request.config.clone());
    let scan = transformer.on_pre_transform(&request.classpath);

    let (mut processor, filer, hierarchy) =
        build_default_processor(&request.config, request.options, &request.classpath);
    let round = RoundEnvironment::from_classes(&request.units, &hierarchy);
    debug!(
        "Round of {} units: {} annotated, {} unreadable",
        request.units.len(),
        round.elements.len(),
        round.unreadable.len()
    );
    processor.process(&round);
    processor.process(&RoundEnvironment::over());

    let diagnostics = processor.diagnostics();
    if processor.failed() {
        let errors = diagnostics
            .iter()
            .filter(|d| d.kind == shadowloader_compiler::DiagnosticKind::Error)
            .count();
        return Err(BuildError::GenerationFailed { errors });
    }
    transformer.merge_declarations(processor.declarations().clone());

    let units = transformer
        .transform_all(&request.units)
        .into_iter()
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let creators = filer
        .class_names()
        .into_iter()
        .filter_map(|name| filer.class(&name).map(|bytes| (name, bytes)))
        .collect();
    let resources = transformer
        .declarations()
        .interfaces()
        .filter_map(|interface| {
            let path = format!("{}{interface}", shadowloader_core::scanner::META_INF_SERVICES);
            filer.resource(&path).map(|content| (path, content))
        })
        .collect();

    info!(
        "Build pass complete: {} units, {} declarations",
        units.len(),
        transformer.declarations().pair_count()
    );
    Ok(BuildOutcome {
        units,
        creators,
        resources,
        declarations: transformer.declarations().clone(),
        scan,
        diagnostics,
    })
}
