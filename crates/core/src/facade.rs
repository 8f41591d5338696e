//! The contract shared with the runtime facade.
//!
//! The transform never implements the facade; it only has to agree with it
//! on type names and on the shape of the registration entry point.

use serde::{Deserialize, Serialize};
use shadowloader_classfile::TypeSubstitution;
use shadowloader_classfile::descriptor::{internal_name, object_descriptor};

pub const SERVICE_LOADER: &str = "java/util/ServiceLoader";
pub const SERVICE_REGISTRY: &str = "io/johnsonlee/spi/ServiceRegistry";
pub const SHADOW_SERVICE_LOADER: &str = "io/johnsonlee/spi/ShadowServiceLoader";
pub const PROVIDER_FACTORY: &str = "java/util/concurrent/Callable";
pub const REGISTER_METHOD: &str = "register";
pub const CREATOR_SUFFIX: &str = "_Creator";

/// The two ways application code can discover providers for an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discovery {
    /// Directory scan plus reflective instantiation at run time.
    Dynamic,
    /// Lookup in the table filled by the patched registry initializer.
    Static,
}

/// Internal names of the runtime types the transform wires together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacadeContract {
    pub service_loader: String,
    pub shadow_loader: String,
    pub registry: String,
    pub factory: String,
}

impl Default for FacadeContract {
    fn default() -> Self {
        Self {
            service_loader: SERVICE_LOADER.to_string(),
            shadow_loader: SHADOW_SERVICE_LOADER.to_string(),
            registry: SERVICE_REGISTRY.to_string(),
            factory: PROVIDER_FACTORY.to_string(),
        }
    }
}

impl FacadeContract {
    /// The type application code calls for the given discovery style.
    pub fn discovery_type(&self, discovery: Discovery) -> &str {
        match discovery {
            Discovery::Dynamic => &self.service_loader,
            Discovery::Static => &self.shadow_loader,
        }
    }

    /// Substitution that moves every call site from dynamic to static discovery.
    pub fn shadowing(&self) -> TypeSubstitution {
        TypeSubstitution::new(
            self.discovery_type(Discovery::Dynamic),
            self.discovery_type(Discovery::Static),
        )
    }

    /// `register(Class, Callable) -> void`
    pub fn register_descriptor(&self) -> String {
        format!(
            "(Ljava/lang/Class;{})V",
            object_descriptor(&self.factory)
        )
    }
}

/// Internal name of the creator generated for a provider binary name.
///
/// Nested providers keep their `$`: `a.Outer$Inner` → `a/Outer$Inner_Creator`.
pub fn creator_internal_name(provider_binary_name: &str) -> String {
    format!("{}{CREATOR_SUFFIX}", internal_name(provider_binary_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_descriptor_matches_registry_entry_point() {
        assert_eq!(
            FacadeContract::default().register_descriptor(),
            "(Ljava/lang/Class;Ljava/util/concurrent/Callable;)V"
        );
    }

    #[test]
    fn test_creator_names() {
        assert_eq!(creator_internal_name("com.x.impl.Foo"), "com/x/impl/Foo_Creator");
        assert_eq!(creator_internal_name("a.Outer$Inner"), "a/Outer$Inner_Creator");
        assert_eq!(creator_internal_name("Bare"), "Bare_Creator");
    }

    #[test]
    fn test_shadowing_targets_static_discovery() {
        let contract = FacadeContract::default();
        let substitution = contract.shadowing();
        assert_eq!(substitution.source_type(), SERVICE_LOADER);
        assert_eq!(substitution.target_type(), SHADOW_SERVICE_LOADER);
    }
}
