//! Deferred parameters.
//!
//! A step publishes named values without computing them: each name maps to a
//! provider closure that reads the store only when a consumer asks for it.
//! An unused provider is never called, so a broken one cannot fail a run
//! that never needed its value.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::link::StepLink;
use crate::error::{Result, TagflowError};

/// A deferred value producer.
pub type ParameterProvider = Arc<dyn Fn() -> Result<String> + Send + Sync>;

/// Named providers exported by one step.
pub type ParameterMap = BTreeMap<String, ParameterProvider>;

/// Wrap a closure as a [`ParameterProvider`].
pub fn provider<F>(f: F) -> ParameterProvider
where
    F: Fn() -> Result<String> + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Entry {
    provider: ParameterProvider,
    links: Vec<StepLink>,
}

/// Run-wide table of published parameters.
///
/// Grows as steps complete; entries are never replaced. Successful lookups
/// are memoized for the rest of the run, failures are not.
#[derive(Default)]
pub struct OutputTable {
    entries: Mutex<BTreeMap<String, Entry>>,
    resolved: Mutex<HashMap<String, String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl OutputTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `name`, produced once `link` is available.
    ///
    /// The first provider registered for a name wins; later registrations
    /// only record their link. Returns whether the provider was stored.
    pub fn add(&self, name: impl Into<String>, link: StepLink, provider: ParameterProvider) -> bool {
        let name = name.into();
        let mut entries = lock(&self.entries);
        match entries.get_mut(&name) {
            Some(entry) => {
                if !entry.links.contains(&link) {
                    entry.links.push(link);
                }
                false
            }
            None => {
                debug!("Publishing parameter {} from {}", name, link);
                entries.insert(
                    name,
                    Entry {
                        provider,
                        links: vec![link],
                    },
                );
                true
            }
        }
    }

    /// Publish every entry of a step's provider map.
    pub fn add_all(&self, params: ParameterMap, link: &StepLink) {
        for (name, provider) in params {
            self.add(name, link.clone(), provider);
        }
    }

    pub fn has(&self, name: &str) -> bool {
        lock(&self.entries).contains_key(name)
    }

    /// Names published so far, sorted.
    pub fn names(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    /// Links whose producers published `name`.
    pub fn links(&self, name: &str) -> Vec<StepLink> {
        lock(&self.entries)
            .get(name)
            .map(|e| e.links.clone())
            .unwrap_or_default()
    }

    /// Resolve `name`, invoking its provider on first successful use.
    pub fn get(&self, name: &str) -> Result<String> {
        if let Some(value) = lock(&self.resolved).get(name) {
            return Ok(value.clone());
        }
        let provider = lock(&self.entries)
            .get(name)
            .map(|e| Arc::clone(&e.provider))
            .ok_or_else(|| TagflowError::ParameterResolution {
                name: name.to_string(),
                message: "no completed step provides it".to_string(),
            })?;

        // Invoked without holding any lock: providers talk to the store.
        let value = provider()?;
        lock(&self.resolved).insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Resolve every published name.
    pub fn map(&self) -> Result<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for name in self.names() {
            let value = self.get(&name)?;
            values.insert(name, value);
        }
        Ok(values)
    }
}

impl fmt::Debug for OutputTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputTable")
            .field("names", &self.names())
            .finish()
    }
}
