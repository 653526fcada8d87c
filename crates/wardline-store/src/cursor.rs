//! Per-room pagination cursor for backward history walks.

/// Transient pagination state for one room. Reset whenever the active room
/// changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationCursor {
    /// Oldest page already loaded; `-1` until the initial load has run.
    pub current_page: i64,
    pub total_pages: u32,
    pub fetch_in_progress: bool,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self {
            current_page: -1,
            total_pages: 0,
            fetch_in_progress: false,
        }
    }
}

impl PaginationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the initial load has not run yet.
    pub fn is_undetermined(&self) -> bool {
        self.current_page == -1
    }

    /// Whether older pages remain to be fetched.
    pub fn has_more(&self) -> bool {
        self.current_page > 0
    }

    /// Single-flight guard: claim the cursor for a fetch. Returns false when
    /// a fetch is already in flight.
    pub fn begin_fetch(&mut self) -> bool {
        if self.fetch_in_progress {
            return false;
        }
        self.fetch_in_progress = true;
        true
    }

    pub fn end_fetch(&mut self) {
        self.fetch_in_progress = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
