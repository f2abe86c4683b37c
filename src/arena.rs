//! Page arena allocator (SPEC_FULL §3/§4.1).
//!
//! A single contiguous region is carved into fixed-size pages. The trailing
//! 8 bytes of every page hold an atomic refcount: allocating an object from a
//! page increments it, freeing one decrements it (I2: a page with a live
//! object always has refcount >= 1). The region never grows; once every page
//! has been claimed, further allocation fails with [`DsResult::NoMem`].
//!
//! Allocation is split into a shared, atomic page cursor (`next_page`) and a
//! per-context, non-atomic [`Cursor`] that privately bump-allocates within
//! the one page it currently owns. Two contexts never contend on the same
//! page's bump offset; they only contend, briefly, on claiming a fresh page.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::ArenaConfig;
use crate::invariants::debug_assert_refcount_nonneg;
use crate::result::{DsError, DsResult};

const REFCOUNT_BYTES: usize = 8;

/// A single allocation context. Bump-allocates downward within its current
/// page until the page is exhausted, then claims the next page from the
/// arena's shared counter.
///
/// Not `Sync`: a `Cursor` is owned by exactly one logical allocator (one
/// thread, or one producer in a restricted context) at a time.
#[derive(Debug, Default)]
pub struct Cursor {
    page: Option<usize>,
    /// Offset from the start of the current page; decreases with each
    /// allocation until it can no longer satisfy a request.
    offset: usize,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Fixed-capacity page arena.
pub struct Arena {
    config: ArenaConfig,
    region: Box<[u8]>,
    next_page: AtomicUsize,
}

// SAFETY: all shared mutable state inside `region` (the per-page trailing
// refcounts) is accessed exclusively through atomic operations on
// `AtomicU64`; the allocated byte ranges handed out by `alloc` never alias
// between two live allocations (each page's bump cursor is privately owned).
unsafe impl Sync for Arena {}
unsafe impl Send for Arena {}

impl Arena {
    /// Creates a new arena backed by a freshly zeroed region.
    pub fn new(config: ArenaConfig) -> Result<Self, DsError> {
        if config.page_size < REFCOUNT_BYTES || !config.page_size.is_power_of_two() {
            return Err(DsError::InvalidPageSize(config.page_size));
        }
        if config.region_size == 0 || config.region_size % config.page_size != 0 {
            return Err(DsError::InvalidRegionSize {
                region_size: config.region_size,
                page_size: config.page_size,
            });
        }
        if config.page_count() == 0 {
            return Err(DsError::RegionTooSmall { pages: 0 });
        }

        let region = vec![0u8; config.region_size].into_boxed_slice();
        Ok(Self {
            config,
            region,
            next_page: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn config(&self) -> ArenaConfig {
        self.config
    }

    /// Number of pages claimed so far (monotonic; never decreases).
    #[inline]
    pub fn pages_claimed(&self) -> usize {
        self.next_page.load(Ordering::Relaxed).min(self.config.page_count())
    }

    fn region_base(&self) -> *mut u8 {
        self.region.as_ptr() as *mut u8
    }

    fn page_ptr(&self, page: usize) -> *mut u8 {
        // SAFETY: `page` is always `< page_count()` at call sites (checked in
        // `claim_page` and `free`), so this stays within `region`.
        unsafe { self.region_base().add(page * self.config.page_size) }
    }

    fn refcount_cell(&self, page: usize) -> &AtomicU64 {
        let trailer = unsafe { self.page_ptr(page).add(self.config.usable_page_bytes()) };
        // SAFETY: the trailing 8 bytes of every page are reserved for the
        // refcount and are never handed out by `alloc` (allocations are
        // bounded to `usable_page_bytes()`). `u64`-alignment holds because
        // `page_size` is a power of two >= 64 and pages start at
        // `page * page_size`.
        unsafe { &*(trailer as *const AtomicU64) }
    }

    fn claim_page(&self) -> Result<usize, DsResult> {
        let page = self.next_page.fetch_add(1, Ordering::Relaxed);
        if page >= self.config.page_count() {
            return Err(DsResult::NoMem);
        }
        Ok(page)
    }

    /// Allocates space for one `T`, 8-byte aligned, from `cursor`'s current
    /// page, claiming a new page first if needed.
    ///
    /// Returns [`DsResult::NoMem`] if the region is exhausted, or if `T`
    /// (rounded up to 8 bytes) is so large that no page could ever hold it
    /// alongside its trailing refcount — `size >= usable_page_bytes()` can
    /// never be satisfied by any page, so it is exhaustion, not a malformed
    /// request.
    pub fn alloc<T>(&self, cursor: &mut Cursor) -> Result<NonNull<T>, DsResult> {
        let layout = Layout::new::<T>();
        let size = align_up(layout.size().max(1), 8);
        let usable = self.config.usable_page_bytes();
        if size >= usable {
            return Err(DsResult::NoMem);
        }

        if cursor.page.is_none() || cursor.offset < size {
            let page = self.claim_page()?;
            cursor.page = Some(page);
            cursor.offset = usable;
        }

        let page = cursor.page.expect("page set above");
        cursor.offset -= size;
        let ptr = unsafe { self.page_ptr(page).add(cursor.offset) } as *mut T;
        self.refcount_cell(page).fetch_add(1, Ordering::AcqRel);

        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    /// Releases one reference to the page backing `ptr`, previously returned
    /// by [`Arena::alloc`]. Does not run `T`'s destructor and does not
    /// physically reclaim the page for reuse (page reuse is out of scope;
    /// see SPEC_FULL §9).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `self.alloc::<T>(..)` and must not be
    /// freed more than once.
    pub unsafe fn free<T>(&self, ptr: NonNull<T>) {
        let addr = ptr.as_ptr() as usize;
        let base = self.region_base() as usize;
        let page = (addr - base) / self.config.page_size;
        let prev = self.refcount_cell(page).fetch_sub(1, Ordering::AcqRel);
        debug_assert_refcount_nonneg!(prev);
    }

    /// Current refcount of the page backing `ptr`. Exposed for `verify()`
    /// implementations in the containers built on top of this arena.
    pub fn page_refcount<T>(&self, ptr: NonNull<T>) -> u64 {
        let addr = ptr.as_ptr() as usize;
        let base = self.region_base() as usize;
        let page = (addr - base) / self.config.page_size;
        self.refcount_cell(page).load(Ordering::Acquire)
    }
}

#[inline]
const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}
