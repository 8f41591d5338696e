//! Generates provider creators from annotated classes.
//!
//! A build feeds compiled classes to [`ProviderCreatorProcessor`] one round
//! at a time. Each annotated class names the service interfaces it provides;
//! the final round writes a `<Provider>_Creator` factory per provider and the
//! matching `META-INF/services` resources through a [`Filer`].

pub mod creator;
pub mod diagnostic;
pub mod element;
pub mod error;
pub mod filer;
pub mod hierarchy;
pub mod options;
pub mod processor;

pub use creator::{GeneratedCreator, generate_creator};
pub use diagnostic::{Diagnostic, DiagnosticKind, Messager};
pub use element::{AnnotatedElement, RoundEnvironment};
pub use error::{ProcessorError, Result};
pub use filer::{DirectoryFiler, Filer, MemoryFiler};
pub use hierarchy::{ClasspathHierarchy, Supertypes, TypeHierarchy};
pub use options::ProcessorOptions;
pub use processor::ProviderCreatorProcessor;
