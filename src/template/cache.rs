//! Template cache - compiled once during warm-up, read-only afterwards.
//!
//! Views running concurrently share one cache behind an `Arc`; nothing in it
//! is mutated after [`TemplateCache::warm`] returns, so no locking is needed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::compiled::CompiledTemplate;
use crate::error::{LiveError, Result};

/// Host service turning a template source name into a compiled template.
pub trait TemplateCompiler {
    fn compile(&self, name: &str) -> Result<CompiledTemplate>;
}

impl<F> TemplateCompiler for F
where
    F: Fn(&str) -> Result<CompiledTemplate>,
{
    fn compile(&self, name: &str) -> Result<CompiledTemplate> {
        self(name)
    }
}

/// Name → compiled template map.
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: HashMap<String, Arc<CompiledTemplate>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every name in `names` and return the filled cache.
    pub fn warm<C, I, S>(compiler: &C, names: I) -> Result<Self>
    where
        C: TemplateCompiler + ?Sized,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cache = Self::new();
        for name in names {
            let name = name.as_ref();
            let template = compiler.compile(name)?;
            debug!(name, fingerprint = template.fingerprint(), "compiled template");
            cache.insert(name, Arc::new(template));
        }
        Ok(cache)
    }

    /// Register an already compiled template.
    pub fn insert(&mut self, name: impl Into<String>, template: Arc<CompiledTemplate>) {
        self.templates.insert(name.into(), template);
    }

    /// Fetch a template by name.
    pub fn get(&self, name: &str) -> Result<Arc<CompiledTemplate>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| LiveError::TemplateNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Freeze the cache for sharing across views.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
