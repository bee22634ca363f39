//! Resolver registry: endpoint name to resolver and pricing curve.
//!
//! Built once at startup with [RegistryBuilder]; read-only afterwards and shared by every
//! dispatch without locking.

use crate::resolver::Resolver;
use alloy::primitives::U256;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Pricing curve terms for an endpoint, e.g. `[startPrice, perUnitPrice, capacity]`.
/// Opaque here; forwarded verbatim to `initiateProviderCurve`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Curve(pub Vec<U256>);

impl Curve {
    pub fn terms(&self) -> &[U256] {
        &self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown endpoint '{0}'")]
    NotFound(String),
    #[error("endpoint '{0}' registered twice")]
    Duplicate(String),
    #[error("endpoint name must be 1..=32 bytes, got '{0}'")]
    InvalidName(String),
}

/// One endpoint this oracle answers.
#[derive(Clone)]
pub struct ResolverEntry {
    endpoint: String,
    resolver: Arc<dyn Resolver>,
    curve: Curve,
}

impl ResolverEntry {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    pub fn curve(&self) -> &Curve {
        &self.curve
    }
}

impl fmt::Debug for ResolverEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverEntry")
            .field("endpoint", &self.endpoint)
            .field("curve", &self.curve)
            .finish_non_exhaustive()
    }
}

/// Builder for the registry.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<ResolverEntry>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(self, name: impl Into<String>, resolver: impl Resolver + 'static, curve: Curve) -> Self {
        self.shared_endpoint(name, Arc::new(resolver), curve)
    }

    /// Like [RegistryBuilder::endpoint], for a resolver shared with other endpoints or tests.
    pub fn shared_endpoint(
        mut self,
        name: impl Into<String>,
        resolver: Arc<dyn Resolver>,
        curve: Curve,
    ) -> Self {
        self.entries.push(ResolverEntry {
            endpoint: name.into(),
            resolver,
            curve,
        });
        self
    }

    pub fn build(self) -> Result<ResolverRegistry, RegistryError> {
        let mut index = HashMap::with_capacity(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            // Endpoint names travel on-chain as bytes32.
            if entry.endpoint.is_empty() || entry.endpoint.len() > 32 {
                return Err(RegistryError::InvalidName(entry.endpoint.clone()));
            }
            if index.insert(entry.endpoint.clone(), i).is_some() {
                return Err(RegistryError::Duplicate(entry.endpoint.clone()));
            }
        }
        Ok(ResolverRegistry {
            entries: self.entries,
            index,
        })
    }
}

/// Read-only endpoint table. Iteration follows registration order.
#[derive(Debug)]
pub struct ResolverRegistry {
    entries: Vec<ResolverEntry>,
    index: HashMap<String, usize>,
}

impl ResolverRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// The entry for `endpoint`, or [RegistryError::NotFound].
    pub fn lookup(&self, endpoint: &str) -> Result<&ResolverEntry, RegistryError> {
        self.index
            .get(endpoint)
            .map(|i| &self.entries[*i])
            .ok_or_else(|| RegistryError::NotFound(endpoint.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &ResolverEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
