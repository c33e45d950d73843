//! The layout of a page on disk.
//!
//! Every file in the system is a sequence of `PAGE_SIZE` pages of big-endian
//! 32-bit integers. Relation pages start with a two-word header
//! `[attributes per tuple][tuples on page]` followed by the packed tuples.
use bytes::{Buf, BufMut};

use crate::{PageId, PAGE_SIZE};

/// Size of one stored integer.
pub const WORD_SIZE: usize = 4;

/// Bytes taken by the relation page header.
pub const RELATION_HEADER_SIZE: usize = 2 * WORD_SIZE;

/// Number of tuples of the given width that fit on one relation page.
pub fn tuples_per_page(num_attributes: usize) -> usize {
    let width = num_attributes.max(1) * WORD_SIZE;
    ((PAGE_SIZE - RELATION_HEADER_SIZE) / width).max(1)
}

/// A page is a fixed-size block of data that is read from and written to disk.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    /// Creates a zeroed page.
    pub fn new(id: PageId) -> Self {
        Page {
            id,
            data: [0; PAGE_SIZE],
        }
    }

    /// Zeroes the page contents and assigns it a new id.
    pub fn clear(&mut self, id: PageId) {
        self.id = id;
        self.data.fill(0);
    }

    /// Reads the word stored at the given word index.
    pub fn word(&self, index: usize) -> i32 {
        let offset = index * WORD_SIZE;
        (&self.data[offset..offset + WORD_SIZE]).get_i32()
    }

    /// Overwrites the word stored at the given word index.
    pub fn set_word(&mut self, index: usize, value: i32) {
        let offset = index * WORD_SIZE;
        (&mut self.data[offset..offset + WORD_SIZE]).put_i32(value);
    }

    /// Number of words a page holds.
    pub const fn capacity_words() -> usize {
        PAGE_SIZE / WORD_SIZE
    }

    pub fn relation_header(&self) -> RelationPageHeader {
        RelationPageHeader {
            num_attributes: self.word(0),
            num_tuples: self.word(1),
        }
    }

    pub fn write_relation_header(&mut self, header: &RelationPageHeader) {
        self.set_word(0, header.num_attributes);
        self.set_word(1, header.num_tuples);
    }

    /// Copies the tuple in `slot` out of a relation page.
    pub fn relation_tuple(&self, num_attributes: usize, slot: usize) -> Vec<i32> {
        let base = 2 + slot * num_attributes;
        (0..num_attributes).map(|i| self.word(base + i)).collect()
    }

    /// Stores a tuple into `slot` of a relation page.
    pub fn set_relation_tuple(&mut self, slot: usize, values: &[i32]) {
        let base = 2 + slot * values.len();
        for (i, value) in values.iter().enumerate() {
            self.set_word(base + i, *value);
        }
    }
}

/// The header of a relation page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationPageHeader {
    pub num_attributes: i32,
    pub num_tuples: i32,
}
