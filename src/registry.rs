// src/registry.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use log::info;

use crate::matching::Matcher;

/// Matchers by identifier. Built once during startup, then only read.
#[derive(Default)]
pub struct MatcherRegistry {
    matchers: BTreeMap<&'static str, Arc<dyn Matcher>>,
}

impl MatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if another matcher already uses the same id.
    pub fn register(&mut self, matcher: Arc<dyn Matcher>) -> Result<()> {
        let id = matcher.id();
        if self.matchers.contains_key(id) {
            bail!("Matcher '{}' is already registered", id);
        }
        info!("Registered matcher '{}'", id);
        self.matchers.insert(id, matcher);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Matcher>> {
        self.matchers.get(id).cloned()
    }

    /// Like [`MatcherRegistry::get`] but names the known ids on failure.
    pub fn require(&self, id: &str) -> Result<Arc<dyn Matcher>> {
        match self.get(id) {
            Some(matcher) => Ok(matcher),
            None => bail!(
                "Unknown matcher '{}' (registered: {})",
                id,
                self.ids().join(", ")
            ),
        }
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<&'static str> {
        self.matchers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}
