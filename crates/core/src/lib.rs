pub mod config;
pub mod error;
pub mod logging;

pub mod facade;
pub mod model;
pub mod patcher;
pub mod scanner;
pub mod shadower;
pub mod transformer;

pub use config::TransformConfig;
pub use error::{Result, TransformError};
pub use facade::{Discovery, FacadeContract};
pub use model::{DeclarationTable, ProviderRecord};
pub use patcher::{PatchOutcome, RegistryPatcher};
pub use scanner::{DeclarationScanner, ScanFailure, ScanReport};
pub use shadower::{ReferenceShadower, ShadowOutcome};
pub use transformer::{ServiceLoaderTransformer, TransformedUnit, UnitRole};
