//! Pass registry.

use crate::config::FusionConfig;
use crate::passes::{
    BatchNormActFusePass, Flatten2MatmulFusePass, MapMatmulToMulPass, MapMatmulV2ToMatmulPass,
    Reshape2MatmulFusePass, Squeeze2MatmulFusePass,
};
use std::collections::BTreeMap;
use weld_core::{Error, OpVersionMap, Pass, PassCapability, Result};

/// Builds a pass instance for a given configuration.
pub type PassFactory = Box<dyn Fn(&FusionConfig) -> Box<dyn Pass> + Send + Sync>;

struct Entry {
    factory: PassFactory,
    capability: PassCapability,
}

/// Registry of passes by name.
///
/// Each entry holds a factory and the operator-version capability the pass
/// declares. The registry is built once and consulted by the pipeline; it
/// never gates passes on its own.
///
/// # Example
///
/// ```
/// use weld_passes::{MapMatmulToMulPass, PassRegistry};
///
/// let mut registry = PassRegistry::new();
/// registry.register(MapMatmulToMulPass::with_config).unwrap();
///
/// assert!(registry.contains("map_matmul_to_mul_pass"));
/// ```
#[derive(Default)]
pub struct PassRegistry {
    /// Map from pass name to entry.
    passes: BTreeMap<String, Entry>,
}

impl PassRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            passes: BTreeMap::new(),
        }
    }

    /// Create a registry with every built-in pass.
    pub fn with_defaults() -> Self {
        let factories = [
            factory(MapMatmulV2ToMatmulPass::with_config),
            factory(Squeeze2MatmulFusePass::with_config),
            factory(Reshape2MatmulFusePass::with_config),
            factory(Flatten2MatmulFusePass::with_config),
            factory(BatchNormActFusePass::with_config),
            factory(MapMatmulToMulPass::with_config),
        ];

        let mut registry = Self::new();
        for factory in factories {
            let (name, entry) = probe(factory);
            registry.passes.insert(name, entry);
        }
        registry
    }

    /// Register a pass by its constructor.
    ///
    /// The constructor is called once with the default configuration to read
    /// the pass name and capability.
    ///
    /// Returns `self` for method chaining.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicatePass` if a pass with the same name is already
    /// registered.
    pub fn register<P, F>(&mut self, build: F) -> Result<&mut Self>
    where
        P: Pass + 'static,
        F: Fn(FusionConfig) -> P + Send + Sync + 'static,
    {
        let (name, entry) = probe(factory(build));
        if self.passes.contains_key(&name) {
            return Err(Error::DuplicatePass(name));
        }
        self.passes.insert(name, entry);
        Ok(self)
    }

    /// Instantiate a pass by name.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownPass` if no pass is registered with the name.
    pub fn create(&self, name: &str, config: &FusionConfig) -> Result<Box<dyn Pass>> {
        self.passes
            .get(name)
            .map(|entry| (entry.factory)(config))
            .ok_or_else(|| Error::UnknownPass(name.to_string()))
    }

    /// Look up the capability a pass declares.
    pub fn capability(&self, name: &str) -> Option<&PassCapability> {
        self.passes.get(name).map(|entry| &entry.capability)
    }

    /// Check if a pass is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.passes.contains_key(name)
    }

    /// Registered pass names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.passes.keys().map(|s| s.as_str())
    }

    /// Names of the passes whose capability accepts `versions`, sorted.
    pub fn eligible<'a>(&'a self, versions: &'a OpVersionMap) -> impl Iterator<Item = &'a str> {
        self.passes
            .iter()
            .filter(|(_, entry)| entry.capability.is_satisfied_by(versions))
            .map(|(name, _)| name.as_str())
    }

    /// Get the number of registered passes.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

fn factory<P, F>(build: F) -> PassFactory
where
    P: Pass + 'static,
    F: Fn(FusionConfig) -> P + Send + Sync + 'static,
{
    Box::new(move |config: &FusionConfig| -> Box<dyn Pass> { Box::new(build(*config)) })
}

fn probe(factory: PassFactory) -> (String, Entry) {
    let pass = factory(&FusionConfig::default());
    let name = pass.name().to_string();
    let capability = pass.capability();
    (
        name,
        Entry {
            factory,
            capability,
        },
    )
}
