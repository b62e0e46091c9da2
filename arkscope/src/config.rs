//! Unwinder configuration

/// Default bound on frames visited by one walk
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Default size of the method name cache
pub const DEFAULT_NAME_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindConfig {
    /// Frames visited before the walk gives up with `DepthExceeded`
    pub max_depth: usize,
    /// Gate in-process reads on the readable mappings of the target
    pub check_heap_regions: bool,
    /// Entries kept by the method name cache before the oldest is evicted
    pub name_cache_capacity: usize,
    /// Resolve a method identity for every frame that carries a function
    pub resolve_methods: bool,
}

impl Default for UnwindConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            check_heap_regions: true,
            name_cache_capacity: DEFAULT_NAME_CACHE_CAPACITY,
            resolve_methods: true,
        }
    }
}

impl UnwindConfig {
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}
