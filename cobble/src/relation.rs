//! Sequential and positional access to relation files.
//!
//! A relation file is a sequence of pages, each holding
//! `[attributes per tuple][tuples on page]` followed by the tuples of that page
//! in row-major order. Every page except the last is full.
use std::io;
use std::path::Path;

use crate::page::{tuples_per_page, RelationPageHeader};
use crate::pager::Pager;
use crate::{Page, PageId, Rid, PAGE_SIZE};

/// Buffers tuples into a page and writes the page out once the next tuple would
/// not fit, or when the writer is finished.
#[derive(Debug)]
pub struct TupleWriter {
    pager: Pager,
    page: Page,
    num_attributes: Option<usize>,
    tuples_on_page: usize,
    written: u64,
}

impl TupleWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let pager = Pager::create(path)?;
        Ok(Self {
            pager,
            page: Page::new(0),
            num_attributes: None,
            tuples_on_page: 0,
            written: 0,
        })
    }

    /// Appends one tuple. All tuples of a file must have the same width.
    pub fn write(&mut self, values: &[i32]) -> io::Result<()> {
        let width = *self.num_attributes.get_or_insert(values.len());
        if values.len() != width {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "tuple of width {} written to {} which holds width {}",
                    values.len(),
                    self.pager.path().display(),
                    width
                ),
            ));
        }
        if self.tuples_on_page == tuples_per_page(width) {
            self.flush_page()?;
        }
        self.page.set_relation_tuple(self.tuples_on_page, values);
        self.tuples_on_page += 1;
        self.written += 1;
        Ok(())
    }

    fn flush_page(&mut self) -> io::Result<()> {
        if self.tuples_on_page == 0 {
            return Ok(());
        }
        self.page.write_relation_header(&RelationPageHeader {
            num_attributes: self.num_attributes.unwrap_or(0) as i32,
            num_tuples: self.tuples_on_page as i32,
        });
        self.pager.write_page(&self.page)?;
        let next_id = self.page.id + 1;
        self.page.clear(next_id);
        self.tuples_on_page = 0;
        Ok(())
    }

    /// Writes the partially filled page and returns the number of tuples written.
    pub fn finish(mut self) -> io::Result<u64> {
        self.flush_page()?;
        self.pager.sync()?;
        tracing::debug!(
            path = %self.pager.path().display(),
            tuples = self.written,
            pages = self.pager.num_pages,
            "relation written"
        );
        Ok(self.written)
    }
}

/// Reads a relation file one page at a time.
#[derive(Debug)]
pub struct TupleReader {
    pager: Pager,
    page: Page,
    header: RelationPageHeader,
    loaded: bool,
    next_page: PageId,
    slot: usize,
}

impl TupleReader {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let pager = Pager::open(path)?;
        Ok(Self {
            pager,
            page: Page::new(0),
            header: RelationPageHeader {
                num_attributes: 0,
                num_tuples: 0,
            },
            loaded: false,
            next_page: 0,
            slot: 0,
        })
    }

    pub fn num_pages(&self) -> u32 {
        self.pager.num_pages
    }

    fn load(&mut self, page_id: PageId) -> io::Result<()> {
        self.pager.read_page_into(page_id, &mut self.page)?;
        let header = self.page.relation_header();
        let words = header.num_attributes as i64 * header.num_tuples as i64;
        if header.num_attributes < 0
            || header.num_tuples < 0
            || words * 4 + 8 > PAGE_SIZE as i64
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "corrupt relation page {} in {}: {} attributes x {} tuples",
                    page_id,
                    self.pager.path().display(),
                    header.num_attributes,
                    header.num_tuples
                ),
            ));
        }
        self.header = header;
        self.loaded = true;
        self.next_page = page_id + 1;
        Ok(())
    }

    /// Returns the next tuple along with its record id.
    pub fn next_with_rid(&mut self) -> io::Result<Option<(Rid, Vec<i32>)>> {
        loop {
            if self.loaded && self.slot < self.header.num_tuples as usize {
                let width = self.header.num_attributes as usize;
                let values = self.page.relation_tuple(width, self.slot);
                let rid = Rid::new(self.page.id, self.slot as u32);
                self.slot += 1;
                return Ok(Some((rid, values)));
            }
            if self.next_page >= self.pager.num_pages {
                self.loaded = false;
                return Ok(None);
            }
            self.load(self.next_page)?;
            self.slot = 0;
        }
    }

    pub fn next(&mut self) -> io::Result<Option<Vec<i32>>> {
        Ok(self.next_with_rid()?.map(|(_, values)| values))
    }

    /// Rewinds to the first tuple of the file.
    pub fn reset(&mut self) {
        self.reset_to_page(0);
    }

    /// Positions the reader at the first tuple of `page_id`.
    pub fn reset_to_page(&mut self, page_id: PageId) {
        self.loaded = false;
        self.next_page = page_id;
        self.slot = 0;
    }

    /// Positions the reader so that the next tuple returned is the one at `rid`.
    pub fn reset_to(&mut self, rid: Rid) -> io::Result<()> {
        if rid.page_id >= self.pager.num_pages {
            self.reset_to_page(rid.page_id);
            return Ok(());
        }
        if !(self.loaded && self.page.id == rid.page_id) {
            self.load(rid.page_id)?;
        }
        self.slot = rid.tuple_id as usize;
        Ok(())
    }

    /// Fetches the tuple at `rid`; the sequential cursor continues after it.
    pub fn read_at(&mut self, rid: Rid) -> io::Result<Vec<i32>> {
        if rid.page_id >= self.pager.num_pages {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no page for record {} in {}", rid, self.pager.path().display()),
            ));
        }
        self.reset_to(rid)?;
        match self.next_with_rid()? {
            Some((found, values)) if found == rid => Ok(values),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no tuple at record {} in {}", rid, self.pager.path().display()),
            )),
        }
    }
}

/// Reads every tuple of a relation file.
pub fn read_all<P: AsRef<Path>>(path: P) -> io::Result<Vec<Vec<i32>>> {
    let mut reader = TupleReader::open(path)?;
    let mut tuples = Vec::new();
    while let Some(values) = reader.next()? {
        tuples.push(values);
    }
    Ok(tuples)
}

/// Writes the tuples to a new relation file.
pub fn write_all<P: AsRef<Path>>(path: P, tuples: &[Vec<i32>]) -> io::Result<u64> {
    let mut writer = TupleWriter::create(path)?;
    for tuple in tuples {
        writer.write(tuple)?;
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failpoint;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn sample(n: i32, width: usize) -> Vec<Vec<i32>> {
        (0..n)
            .map(|i| (0..width as i32).map(|c| i * 10 + c).collect())
            .collect()
    }

    #[test]
    fn round_trip_spans_pages_and_survives_reset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rel");
        let tuples = sample(1000, 3);
        assert_eq!(write_all(&path, &tuples).unwrap(), 1000);

        let mut reader = TupleReader::open(&path).unwrap();
        assert_eq!(reader.num_pages(), 3);
        let mut first = Vec::new();
        while let Some(t) = reader.next().unwrap() {
            first.push(t);
        }
        reader.reset();
        let mut second = Vec::new();
        while let Some(t) = reader.next().unwrap() {
            second.push(t);
        }
        assert_eq!(first, tuples);
        assert_eq!(second, tuples);
    }

    #[test]
    fn pages_are_filled_before_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rel");
        write_all(&path, &sample(341, 3)).unwrap();

        let mut pager = Pager::open(&path).unwrap();
        assert_eq!(pager.num_pages, 2);
        assert_eq!(pager.read_page(0).unwrap().relation_header().num_tuples, 340);
        assert_eq!(pager.read_page(1).unwrap().relation_header().num_tuples, 1);
    }

    #[test]
    fn reset_to_page_and_rid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rel");
        let tuples = sample(700, 3);
        write_all(&path, &tuples).unwrap();

        let mut reader = TupleReader::open(&path).unwrap();
        reader.reset_to_page(1);
        assert_eq!(reader.next().unwrap(), Some(tuples[340].clone()));

        reader.reset_to(Rid::new(0, 5)).unwrap();
        let (rid, values) = reader.next_with_rid().unwrap().unwrap();
        assert_eq!(rid, Rid::new(0, 5));
        assert_eq!(values, tuples[5]);

        assert_eq!(reader.read_at(Rid::new(2, 3)).unwrap(), tuples[683]);
        assert_eq!(reader.next().unwrap(), Some(tuples[684].clone()));
        assert!(reader.read_at(Rid::new(2, 200)).is_err());
    }

    #[test]
    fn empty_relation_yields_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rel");
        write_all(&path, &[]).unwrap();
        let mut reader = TupleReader::open(&path).unwrap();
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn mixed_widths_are_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = TupleWriter::create(dir.path().join("rel")).unwrap();
        writer.write(&[1, 2]).unwrap();
        let err = writer.write(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn injected_read_failure_surfaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rel");
        write_all(&path, &sample(10, 2)).unwrap();
        let mut reader = TupleReader::open(&path).unwrap();
        failpoint::enable("pager.read_page");
        let result = reader.next();
        failpoint::disable("pager.read_page");
        assert!(result.is_err());
        assert_eq!(reader.next().unwrap(), Some(vec![0, 1]));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]
        #[test]
        fn written_tuples_read_back_in_order(
            tuples in prop::collection::vec(prop::collection::vec(any::<i32>(), 4), 0..1200)
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("rel");
            write_all(&path, &tuples).unwrap();
            prop_assert_eq!(read_all(&path).unwrap(), tuples);
        }
    }
}
