pub mod btree;

pub mod failpoint;

pub mod page;

pub mod pager;

pub mod relation;

pub const PAGE_SIZE: usize = 4096;

pub type PageId = u32;

/// Position of a tuple inside a relation file: page number and slot on that page.
///
/// Ordered by page first, then slot, which is also the physical order of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub tuple_id: u32,
}

impl Rid {
    pub fn new(page_id: PageId, tuple_id: u32) -> Self {
        Self { page_id, tuple_id }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.page_id, self.tuple_id)
    }
}

pub use page::Page;
