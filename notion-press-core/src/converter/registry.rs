//! Priority-ordered converter table.
//!
//! The registry is assembled once from a [`RegistryConfig`] and then shared
//! read-only (usually behind an `Arc`). Lookup walks the table in descending
//! priority and falls through to the fallback, so [`ConverterRegistry::resolve`]
//! always returns a converter.

use super::{blocks, Converter, FALLBACK_PRIORITY};
use crate::block::BlockType;
use tracing::debug;

/// How to build a registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Register the built-in converter for every known block type.
    pub builtins: bool,
    /// Registered after the built-ins, replacing their claims on shared types.
    pub extra: Vec<Converter>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            builtins: true,
            extra: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    converters: Vec<Converter>,
    fallback: Converter,
}

impl ConverterRegistry {
    /// A registry holding only the fallback.
    pub fn empty() -> Self {
        Self {
            converters: Vec::new(),
            fallback: Converter::fallback(),
        }
    }

    /// A registry with every built-in converter.
    pub fn with_builtins() -> Self {
        Self::from_config(RegistryConfig::default())
    }

    pub fn from_config(config: RegistryConfig) -> Self {
        let mut registry = Self::empty();
        if config.builtins {
            for converter in blocks::builtin_converters() {
                registry.register(converter);
            }
        }
        for converter in config.extra {
            registry.register(converter);
        }
        debug!(
            converters = registry.converters.len(),
            "Converter registry assembled"
        );
        registry
    }

    /// Adds a converter, replacing earlier claims on the same block types.
    ///
    /// A catch-all converter replaces the fallback and is pinned to the
    /// fallback priority.
    pub fn register(&mut self, mut converter: Converter) {
        if converter.is_catch_all() {
            converter.force_priority(FALLBACK_PRIORITY);
            self.fallback = converter;
            return;
        }

        if let super::Handles::Types(types) = converter.handles() {
            let claimed = types.clone();
            self.converters.retain_mut(|existing| existing.release(&claimed));
        }
        self.converters.push(converter);
        // Stable: equal priorities keep registration order.
        self.converters
            .sort_by_key(|c| std::cmp::Reverse(c.priority()));
    }

    /// The converter responsible for `block_type`.
    pub fn resolve(&self, block_type: &BlockType) -> &Converter {
        self.converters
            .iter()
            .find(|c| c.supports(block_type))
            .unwrap_or(&self.fallback)
    }

    pub fn fallback(&self) -> &Converter {
        &self.fallback
    }

    /// Number of registered converters, excluding the fallback.
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
