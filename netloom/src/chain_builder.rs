//! Service-level template for per-session filter chains.

use std::fmt;
use std::sync::Arc;

use crate::chain::{FilterChain, HEAD_NAME, TAIL_NAME};
use crate::error::{Error, Result};
use crate::filter::IoFilter;

/// An ordered list of named filters copied into every new session's chain.
///
/// Filters are shared between sessions; the builder stores `Arc`s and every chain built
/// from it references the same instances.
///
/// ```rust
/// use std::sync::Arc;
/// use netloom::{DefaultFilterChainBuilder, LoggingFilter};
///
/// let mut builder = DefaultFilterChainBuilder::new();
/// builder.add_last("logger", Arc::new(LoggingFilter::default())).unwrap();
/// assert_eq!(builder.names(), vec!["logger"]);
/// ```
#[derive(Clone, Default)]
pub struct DefaultFilterChainBuilder {
    entries: Vec<(String, Arc<dyn IoFilter>)>,
}

impl DefaultFilterChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, name: &str) -> Result<()> {
        if name == HEAD_NAME || name == TAIL_NAME {
            return Err(Error::ReservedFilterName(name.to_owned()));
        }
        if self.contains(name) {
            return Err(Error::DuplicateFilter(name.to_owned()));
        }
        Ok(())
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| Error::FilterNotFound(name.to_owned()))
    }

    pub fn add_first(
        &mut self,
        name: impl Into<String>,
        filter: Arc<dyn IoFilter>,
    ) -> Result<&mut Self> {
        let name = name.into();
        self.check(&name)?;
        self.entries.insert(0, (name, filter));
        Ok(self)
    }

    pub fn add_last(
        &mut self,
        name: impl Into<String>,
        filter: Arc<dyn IoFilter>,
    ) -> Result<&mut Self> {
        let name = name.into();
        self.check(&name)?;
        self.entries.push((name, filter));
        Ok(self)
    }

    pub fn add_before(
        &mut self,
        base: &str,
        name: impl Into<String>,
        filter: Arc<dyn IoFilter>,
    ) -> Result<&mut Self> {
        let name = name.into();
        self.check(&name)?;
        let index = self.index_of(base)?;
        self.entries.insert(index, (name, filter));
        Ok(self)
    }

    pub fn add_after(
        &mut self,
        base: &str,
        name: impl Into<String>,
        filter: Arc<dyn IoFilter>,
    ) -> Result<&mut Self> {
        let name = name.into();
        self.check(&name)?;
        let index = self.index_of(base)?;
        self.entries.insert(index + 1, (name, filter));
        Ok(self)
    }

    pub fn remove(&mut self, name: &str) -> Result<Arc<dyn IoFilter>> {
        let index = self.index_of(name)?;
        Ok(self.entries.remove(index).1)
    }

    pub fn replace(&mut self, name: &str, filter: Arc<dyn IoFilter>) -> Result<Arc<dyn IoFilter>> {
        let index = self.index_of(name)?;
        Ok(std::mem::replace(&mut self.entries[index].1, filter))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn IoFilter>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, filter)| Arc::clone(filter))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Appends every entry to `chain`, in order.
    pub fn build_chain(&self, chain: &FilterChain) -> Result<()> {
        for (name, filter) in &self.entries {
            chain.add_last(name.clone(), Arc::clone(filter))?;
        }
        Ok(())
    }
}

impl fmt::Debug for DefaultFilterChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
