//! Program and kernel cache.
//!
//! Programs are keyed by source identifier and kernels by
//! `(source identifier, entry name)`. Building a program drops every kernel
//! cached for its identifier, so kernels are always created from the
//! program currently in the cache.

use crate::device::{Kernel, Program};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub programs_built: u64,
    pub build_failures: u64,
    pub kernels_created: u64,
    pub kernel_hits: u64,
}

#[derive(Debug, Default)]
pub struct ProgramCache {
    programs: HashMap<String, Arc<Program>>,
    kernels: HashMap<String, HashMap<String, Arc<Kernel>>>,
    stats: CacheStats,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the kernel `entry` of `source_id`, building the program with
    /// `build` the first time the identifier is seen.
    ///
    /// A failed build leaves no entry behind. An unknown entry name fails
    /// without touching the cached program.
    pub fn ensure<F>(&mut self, source_id: &str, entry: &str, build: F) -> Result<Arc<Kernel>>
    where
        F: FnOnce(&str) -> Result<Program>,
    {
        let (program, rebuilt) = match self.programs.get(source_id) {
            Some(program) => (Arc::clone(program), false),
            None => match build(source_id) {
                Ok(program) => {
                    let program = Arc::new(program);
                    debug!(source = source_id, program = program.id(), "program built");
                    self.stats.programs_built += 1;
                    self.programs.insert(source_id.to_string(), Arc::clone(&program));
                    self.kernels.remove(source_id);
                    (program, true)
                }
                Err(e) => {
                    warn!(source = source_id, error = %e, "program build failed");
                    self.stats.build_failures += 1;
                    return Err(e);
                }
            },
        };

        let kernels = self.kernels.entry(source_id.to_string()).or_default();
        if !rebuilt {
            if let Some(kernel) = kernels.get(entry) {
                self.stats.kernel_hits += 1;
                return Ok(Arc::clone(kernel));
            }
        }

        let kernel = Arc::new(Kernel::create(&program, entry)?);
        debug!(source = source_id, kernel = entry, "kernel created");
        kernels.insert(entry.to_string(), Arc::clone(&kernel));
        self.stats.kernels_created += 1;
        Ok(kernel)
    }

    pub fn program(&self, source_id: &str) -> Option<&Arc<Program>> {
        self.programs.get(source_id)
    }

    pub fn kernel(&self, source_id: &str, entry: &str) -> Option<&Arc<Kernel>> {
        self.kernels.get(source_id).and_then(|k| k.get(entry))
    }

    pub fn contains_program(&self, source_id: &str) -> bool {
        self.programs.contains_key(source_id)
    }

    pub fn contains_kernel(&self, source_id: &str, entry: &str) -> bool {
        self.kernel(source_id, entry).is_some()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn kernel_count(&self) -> usize {
        self.kernels.values().map(HashMap::len).sum()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drop a program and its kernels; the next `ensure` rebuilds it.
    /// Returns whether anything was cached.
    pub fn invalidate(&mut self, source_id: &str) -> bool {
        self.kernels.remove(source_id);
        let removed = self.programs.remove(source_id).is_some();
        if removed {
            debug!(source = source_id, "program invalidated");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.programs.clear();
        self.kernels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::KernelLibrary;
    use crate::error::Error;

    const SOURCE: &str = "__kernel void a(int x) {}\n__kernel void b(int x) {}";

    fn library() -> KernelLibrary {
        KernelLibrary::new().with("a", |_, _| {}).with("b", |_, _| {})
    }

    fn build(id: &str) -> Result<Program> {
        Program::build(id, SOURCE, "", &library())
    }

    #[test]
    fn test_builds_once_and_reuses_kernels() {
        let mut cache = ProgramCache::new();

        let first = cache.ensure("k.cl", "a", build).unwrap();
        let second = cache.ensure("k.cl", "a", |_| panic!("must not rebuild")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        cache.ensure("k.cl", "b", |_| panic!("must not rebuild")).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.programs_built, 1);
        assert_eq!(stats.kernels_created, 2);
        assert_eq!(stats.kernel_hits, 1);
        assert_eq!(cache.program_count(), 1);
        assert_eq!(cache.kernel_count(), 2);
    }

    #[test]
    fn test_failed_build_leaves_no_entry() {
        let mut cache = ProgramCache::new();
        let err = cache
            .ensure("bad.cl", "a", |id| Program::build(id, "__kernel void a(", "", &library()))
            .unwrap_err();

        assert!(err.build_log().is_some());
        assert!(!cache.contains_program("bad.cl"));
        assert_eq!(cache.stats().build_failures, 1);

        cache.ensure("bad.cl", "a", build).unwrap();
        assert!(cache.contains_kernel("bad.cl", "a"));
    }

    #[test]
    fn test_unknown_entry_keeps_program() {
        let mut cache = ProgramCache::new();
        let err = cache.ensure("k.cl", "missing", build).unwrap_err();

        assert!(matches!(err, Error::KernelNotFound { .. }));
        assert!(cache.contains_program("k.cl"));
        assert_eq!(cache.kernel_count(), 0);
    }

    #[test]
    fn test_rebuild_recreates_kernels() {
        let mut cache = ProgramCache::new();
        let before = cache.ensure("k.cl", "a", build).unwrap();

        assert!(cache.invalidate("k.cl"));
        assert!(!cache.contains_kernel("k.cl", "a"));
        assert!(!cache.invalidate("k.cl"));

        let after = cache.ensure("k.cl", "a", build).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_ne!(before.program().id(), after.program().id());
        assert_eq!(cache.stats().programs_built, 2);
    }

    #[test]
    fn test_clear() {
        let mut cache = ProgramCache::new();
        cache.ensure("one.cl", "a", build).unwrap();
        cache.ensure("two.cl", "b", build).unwrap();

        cache.clear();
        assert_eq!(cache.program_count(), 0);
        assert_eq!(cache.kernel_count(), 0);
    }
}
