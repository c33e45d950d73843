//! Bulk-loaded B+-tree index files.
//!
//! Layout, one node per page:
//! - page 0: header `[root page][leaf count][order]`
//! - pages `1..=leaf count`: leaves in key order,
//!   `[0][entry count]([key][rid count]([page][slot])*)*`
//! - remaining pages: internal nodes, one layer after the other, the root last,
//!   `[1][key count][key]*[child page]*` with one more child than keys.
//!
//! A tree of order `d` holds at most `2d` entries per leaf and `2d + 1` children
//! per internal node. Trees are built once from sorted data entries and are
//! read-only afterwards.
use std::io;
use std::path::Path;

use crate::pager::Pager;
use crate::{Page, PageId, Rid};

pub type Key = i32;

const LEAF_NODE: i32 = 0;
const INTERNAL_NODE: i32 = 1;
const MAX_DEPTH: usize = 64;

/// All record ids sharing one key value, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntry {
    pub key: Key,
    pub rids: Vec<Rid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub root: PageId,
    pub leaf_count: u32,
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexNode {
    Leaf { entries: Vec<DataEntry> },
    Internal { keys: Vec<Key>, children: Vec<PageId> },
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

impl IndexNode {
    fn encoded_words(&self) -> usize {
        match self {
            IndexNode::Leaf { entries } => {
                2 + entries.iter().map(|e| 2 + 2 * e.rids.len()).sum::<usize>()
            }
            IndexNode::Internal { keys, children } => 2 + keys.len() + children.len(),
        }
    }

    /// Serializes the node into `page`, failing if it does not fit.
    pub fn encode(&self, page: &mut Page) -> io::Result<()> {
        if self.encoded_words() > Page::capacity_words() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "index node for page {} needs {} words but a page holds {}",
                    page.id,
                    self.encoded_words(),
                    Page::capacity_words()
                ),
            ));
        }
        let mut at = 0;
        let mut put = |page: &mut Page, value: i32| {
            page.set_word(at, value);
            at += 1;
        };
        match self {
            IndexNode::Leaf { entries } => {
                put(page, LEAF_NODE);
                put(page, entries.len() as i32);
                for entry in entries {
                    put(page, entry.key);
                    put(page, entry.rids.len() as i32);
                    for rid in &entry.rids {
                        put(page, rid.page_id as i32);
                        put(page, rid.tuple_id as i32);
                    }
                }
            }
            IndexNode::Internal { keys, children } => {
                put(page, INTERNAL_NODE);
                put(page, keys.len() as i32);
                for key in keys {
                    put(page, *key);
                }
                for child in children {
                    put(page, *child as i32);
                }
            }
        }
        Ok(())
    }

    /// Deserializes a node, rejecting counts that run past the page.
    pub fn decode(page: &Page) -> io::Result<Self> {
        let capacity = Page::capacity_words();
        let mut at = 0;
        let mut take = |what: &str| -> io::Result<i32> {
            if at >= capacity {
                return Err(invalid_data(format!(
                    "index page {} truncated while reading {}",
                    page.id, what
                )));
            }
            let value = page.word(at);
            at += 1;
            Ok(value)
        };
        let count = |value: i32, what: &str| -> io::Result<usize> {
            usize::try_from(value).map_err(|_| {
                invalid_data(format!("index page {} has negative {}", page.id, what))
            })
        };

        match take("node type")? {
            LEAF_NODE => {
                let entry_count = count(take("entry count")?, "entry count")?;
                let mut entries = Vec::with_capacity(entry_count.min(capacity));
                for _ in 0..entry_count {
                    let key = take("key")?;
                    let rid_count = count(take("rid count")?, "rid count")?;
                    let mut rids = Vec::with_capacity(rid_count.min(capacity));
                    for _ in 0..rid_count {
                        let page_id = count(take("rid page")?, "rid page")?;
                        let tuple_id = count(take("rid slot")?, "rid slot")?;
                        rids.push(Rid::new(page_id as PageId, tuple_id as u32));
                    }
                    entries.push(DataEntry { key, rids });
                }
                Ok(IndexNode::Leaf { entries })
            }
            INTERNAL_NODE => {
                let key_count = count(take("key count")?, "key count")?;
                let mut keys = Vec::with_capacity(key_count.min(capacity));
                for _ in 0..key_count {
                    keys.push(take("key")?);
                }
                let mut children = Vec::with_capacity(key_count.min(capacity) + 1);
                for _ in 0..=key_count {
                    children.push(count(take("child")?, "child")? as PageId);
                }
                Ok(IndexNode::Internal { keys, children })
            }
            other => Err(invalid_data(format!(
                "index page {} has unknown node type {}",
                page.id, other
            ))),
        }
    }
}

/// Splits `count` items into nodes of at most `capacity`, never leaving a
/// trailing node under `minimum`: when the remainder would, the last two nodes
/// share it evenly.
fn layer_sizes(count: usize, capacity: usize, minimum: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut remaining = count;
    while remaining > 0 {
        if remaining > capacity && remaining < capacity + minimum {
            let first = remaining / 2;
            sizes.push(first);
            sizes.push(remaining - first);
            break;
        }
        let take = remaining.min(capacity);
        sizes.push(take);
        remaining -= take;
    }
    sizes
}

/// Serializes a B+-tree bottom-up from data entries sorted by key.
#[derive(Debug, Clone, Copy)]
pub struct IndexBuilder {
    order: u32,
}

impl IndexBuilder {
    pub fn new(order: u32) -> Self {
        Self {
            order: order.max(1),
        }
    }

    pub fn build<P: AsRef<Path>>(&self, path: P, entries: Vec<DataEntry>) -> io::Result<IndexHeader> {
        if let Some(pair) = entries.windows(2).find(|pair| pair[0].key >= pair[1].key) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "data entries must have strictly increasing keys ({} then {})",
                    pair[0].key, pair[1].key
                ),
            ));
        }

        let order = self.order as usize;
        let mut pager = Pager::create(path)?;
        let mut page = Page::new(0);
        let mut next_page: PageId = 1;

        // (page id, smallest key of the subtree)
        let mut layer: Vec<(PageId, Key)> = Vec::new();
        let leaf_sizes = if entries.is_empty() {
            vec![0]
        } else {
            layer_sizes(entries.len(), 2 * order, order)
        };
        let mut remaining = entries.into_iter();
        for size in leaf_sizes {
            let chunk: Vec<DataEntry> = remaining.by_ref().take(size).collect();
            let smallest = chunk.first().map_or(Key::MIN, |e| e.key);
            page.clear(next_page);
            IndexNode::Leaf { entries: chunk }.encode(&mut page)?;
            pager.write_page(&page)?;
            layer.push((next_page, smallest));
            next_page += 1;
        }
        let leaf_count = layer.len() as u32;
        tracing::debug!(leaf_count, order, "index leaves written");

        loop {
            let mut parents = Vec::new();
            let mut children = layer.into_iter();
            for size in layer_sizes(children.len(), 2 * order + 1, order + 1) {
                let group: Vec<(PageId, Key)> = children.by_ref().take(size).collect();
                let node = IndexNode::Internal {
                    keys: group.iter().skip(1).map(|(_, key)| *key).collect(),
                    children: group.iter().map(|(id, _)| *id).collect(),
                };
                page.clear(next_page);
                node.encode(&mut page)?;
                pager.write_page(&page)?;
                parents.push((next_page, group[0].1));
                next_page += 1;
            }
            tracing::debug!(nodes = parents.len(), "index layer written");
            layer = parents;
            if layer.len() == 1 {
                break;
            }
        }

        let header = IndexHeader {
            root: layer[0].0,
            leaf_count,
            order: self.order,
        };
        page.clear(0);
        page.set_word(0, header.root as i32);
        page.set_word(1, header.leaf_count as i32);
        page.set_word(2, header.order as i32);
        pager.write_page(&page)?;
        pager.sync()?;
        Ok(header)
    }
}

/// Traverses an index file from the root and walks its leaves in key order.
#[derive(Debug)]
pub struct IndexReader {
    pager: Pager,
    header: IndexHeader,
    leaf_page: Option<PageId>,
    entries: Vec<DataEntry>,
    entry: usize,
    rid: usize,
}

impl IndexReader {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut pager = Pager::open(path)?;
        let page = pager.read_page(0)?;
        let (root, leaf_count, order) = (page.word(0), page.word(1), page.word(2));
        if root <= leaf_count
            || leaf_count < 1
            || order < 1
            || root as u32 >= pager.num_pages
        {
            return Err(invalid_data(format!(
                "index {} has a corrupt header (root {}, leaves {}, order {}, pages {})",
                pager.path().display(),
                root,
                leaf_count,
                order,
                pager.num_pages
            )));
        }
        Ok(Self {
            pager,
            header: IndexHeader {
                root: root as PageId,
                leaf_count: leaf_count as u32,
                order: order as u32,
            },
            leaf_page: None,
            entries: Vec::new(),
            entry: 0,
            rid: 0,
        })
    }

    pub fn header(&self) -> IndexHeader {
        self.header
    }

    fn read_node(&mut self, page_id: PageId) -> io::Result<IndexNode> {
        if page_id == 0 || page_id >= self.pager.num_pages {
            return Err(invalid_data(format!(
                "index {} points at page {} outside the tree",
                self.pager.path().display(),
                page_id
            )));
        }
        let page = self.pager.read_page(page_id)?;
        let node = IndexNode::decode(&page)?;
        let is_leaf_page = page_id <= self.header.leaf_count;
        if matches!(node, IndexNode::Leaf { .. }) != is_leaf_page {
            return Err(invalid_data(format!(
                "index {} page {} has the wrong node kind",
                self.pager.path().display(),
                page_id
            )));
        }
        Ok(node)
    }

    fn load_leaf(&mut self, page_id: PageId) -> io::Result<()> {
        match self.read_node(page_id)? {
            IndexNode::Leaf { entries } => {
                self.entries = entries;
                self.leaf_page = Some(page_id);
                self.entry = 0;
                self.rid = 0;
                Ok(())
            }
            IndexNode::Internal { .. } => Err(invalid_data(format!(
                "index page {} is not a leaf",
                page_id
            ))),
        }
    }

    /// Positions the reader at the smallest key greater than or equal to `key`.
    pub fn seek(&mut self, key: Key) -> io::Result<()> {
        let mut page_id = self.header.root;
        for _ in 0..MAX_DEPTH {
            match self.read_node(page_id)? {
                IndexNode::Internal { keys, children } => {
                    let slot = keys.partition_point(|k| *k <= key);
                    page_id = children[slot];
                }
                IndexNode::Leaf { entries } => {
                    self.entry = entries.partition_point(|e| e.key < key);
                    self.entries = entries;
                    self.leaf_page = Some(page_id);
                    self.rid = 0;
                    return Ok(());
                }
            }
        }
        Err(invalid_data(format!(
            "index {} is deeper than {} levels",
            self.pager.path().display(),
            MAX_DEPTH
        )))
    }

    /// Forgets the current position; iteration restarts from the first leaf.
    pub fn reset(&mut self) {
        self.leaf_page = None;
        self.entries.clear();
        self.entry = 0;
        self.rid = 0;
    }

    /// Returns the next (key, record id) pair in key order.
    pub fn next_rid(&mut self) -> io::Result<Option<(Key, Rid)>> {
        loop {
            if let Some(current) = self.entries.get(self.entry) {
                if let Some(rid) = current.rids.get(self.rid) {
                    self.rid += 1;
                    return Ok(Some((current.key, *rid)));
                }
                self.entry += 1;
                self.rid = 0;
                continue;
            }
            let next_leaf = self.leaf_page.map_or(1, |page| page + 1);
            if next_leaf > self.header.leaf_count {
                self.entries.clear();
                self.entry = 0;
                return Ok(None);
            }
            self.load_leaf(next_leaf)?;
        }
    }

    /// Returns the next whole data entry in key order.
    pub fn next_entry(&mut self) -> io::Result<Option<DataEntry>> {
        loop {
            if let Some(current) = self.entries.get(self.entry) {
                let entry = current.clone();
                self.entry += 1;
                self.rid = 0;
                return Ok(Some(entry));
            }
            let next_leaf = self.leaf_page.map_or(1, |page| page + 1);
            if next_leaf > self.header.leaf_count {
                self.entries.clear();
                self.entry = 0;
                return Ok(None);
            }
            self.load_leaf(next_leaf)?;
        }
    }
}
