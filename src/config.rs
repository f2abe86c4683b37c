/// Configuration for the arena allocator: a single contiguous region, carved
/// into fixed-size pages per SPEC_FULL §3/§4.1.
#[derive(Debug, Clone, Copy)]
pub struct ArenaConfig {
    /// Page size in bytes. Must be a power of two, at least 64 (room for the
    /// trailing 8-byte refcount plus at least one small object).
    pub page_size: usize,
    /// Total region size in bytes. Must be a multiple of `page_size`.
    pub region_size: usize,
}

impl ArenaConfig {
    /// Creates a new configuration.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two `>= 64`, or if `region_size`
    /// is not a positive multiple of `page_size`.
    pub const fn new(page_size: usize, region_size: usize) -> Self {
        assert!(
            page_size >= 64 && page_size.is_power_of_two(),
            "page_size must be a power of two and at least 64"
        );
        assert!(
            region_size >= page_size && region_size % page_size == 0,
            "region_size must be a positive multiple of page_size"
        );

        Self {
            page_size,
            region_size,
        }
    }

    /// Number of usable bytes per page (the page minus its trailing refcount).
    #[inline]
    pub const fn usable_page_bytes(&self) -> usize {
        self.page_size - 8
    }

    /// Number of pages the region is carved into.
    #[inline]
    pub const fn page_count(&self) -> usize {
        self.region_size / self.page_size
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(4096, 4096 * 256)
    }
}

/// A small region (16 pages of 4KiB) suited to unit tests and BUSY/NOMEM
/// boundary scenarios.
pub const SMALL_TEST_CONFIG: ArenaConfig = ArenaConfig::new(4096, 4096 * 16);

/// A larger region (4096 pages of 4KiB = 16MiB) suited to sustained
/// throughput workloads.
pub const HIGH_THROUGHPUT_CONFIG: ArenaConfig = ArenaConfig::new(4096, 4096 * 4096);
