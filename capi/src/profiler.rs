use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Observer of foreign calls.
pub trait Profiler: Send + Sync {
    fn method_entered(&self, name: &str);
    fn method_exited(&self, name: &str);
}

/// Scope guard around exactly one foreign call.
pub struct MethodEntry<'a> {
    profiler: Arc<dyn Profiler>,
    name: &'a str,
}

impl<'a> MethodEntry<'a> {
    pub fn new(profiler: Arc<dyn Profiler>, name: &'a str) -> Self {
        profiler.method_entered(name);
        Self { profiler, name }
    }
}

impl Drop for MethodEntry<'_> {
    fn drop(&mut self) {
        self.profiler.method_exited(self.name);
    }
}

/// Counts calls per method.
#[derive(Default)]
pub struct CallCounter {
    calls: Mutex<BTreeMap<String, u64>>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, name: &str) -> u64 {
        self.calls.lock().get(name).copied().unwrap_or(0)
    }

    /// Method names with their call counts, sorted by name.
    pub fn report(&self) -> Vec<(String, u64)> {
        self.calls
            .lock()
            .iter()
            .map(|(name, &n)| (name.clone(), n))
            .collect()
    }
}

impl Profiler for CallCounter {
    fn method_entered(&self, name: &str) {
        *self.calls.lock().entry(name.to_owned()).or_default() += 1;
    }

    fn method_exited(&self, _name: &str) {}
}
