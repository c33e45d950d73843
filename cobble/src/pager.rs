//! The Pager is responsible for reading and writing whole pages of a file.
use std::cell::Cell;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::failpoint;
use crate::{Page, PageId, PAGE_SIZE};

thread_local! {
    static OPEN_FILES: Cell<usize> = const { Cell::new(0) };
}

/// Number of pagers currently open on this thread.
///
/// Queries run on a single thread, so after a query finishes (successfully or
/// not) this returns to the value it had before the query started.
pub fn open_file_count() -> usize {
    OPEN_FILES.with(|count| count.get())
}

/// The Pager is responsible for reading and writing pages of one file.
#[derive(Debug)]
pub struct Pager {
    file: File,
    path: PathBuf,
    pub num_pages: u32,
}

impl Pager {
    /// Opens an existing file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).open(path)?;
        Self::from_file(file, path)
    }

    /// Creates (or truncates) a file for writing, creating its parent directories.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::from_file(file, path)
    }

    fn from_file(file: File, path: &Path) -> io::Result<Self> {
        let file_size = file.metadata()?.len();
        let num_pages = file_size.div_ceil(PAGE_SIZE as u64) as u32;
        tracing::trace!(path = %path.display(), num_pages, "pager opened");
        OPEN_FILES.with(|count| count.set(count.get() + 1));
        Ok(Self {
            file,
            path: path.to_path_buf(),
            num_pages,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads a page into `page`. A short final page is zero-filled.
    pub fn read_page_into(&mut self, page_id: PageId, page: &mut Page) -> io::Result<()> {
        failpoint::maybe_fail("pager.read_page")?;
        if page_id >= self.num_pages {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "page {} is past the end of {} ({} pages)",
                    page_id,
                    self.path.display(),
                    self.num_pages
                ),
            ));
        }
        page.clear(page_id);
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let read = self.file.read(&mut page.data[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(())
    }

    /// Reads a page from the file.
    pub fn read_page(&mut self, page_id: PageId) -> io::Result<Page> {
        let mut page = Page::new(page_id);
        self.read_page_into(page_id, &mut page)?;
        Ok(page)
    }

    /// Writes a page at the position given by its id.
    pub fn write_page(&mut self, page: &Page) -> io::Result<()> {
        let offset = page.id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&page.data)?;
        if page.id >= self.num_pages {
            self.num_pages = page.id + 1;
        }
        Ok(())
    }

    /// Flushes written pages to disk.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        OPEN_FILES.with(|count| count.set(count.get().saturating_sub(1)));
    }
}
