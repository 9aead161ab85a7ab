//! POSIX backing file for the shared region.
//!
//! The region is a regular file under
//! `<path>/.cloudtoid/interprocess/mmf/`, mapped shared read/write. The
//! first creator (or a create-or-override opener) owns the file and
//! unlinks it on dispose; late joiners attach non-destructively.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use memmap2::MmapOptions;
use tracing::{debug, warn};

use crate::errors::QueueError;
use crate::memory::{queue_directory, queue_file_path, MemoryView};
use crate::queue::QueueOptions;

/// Owns the backing file and its mapping for the lifetime of one queue
/// endpoint.
pub struct MemoryFile {
    view: Mutex<Option<MemoryView>>,
    _file: File,
    file_path: PathBuf,
    is_owner: bool,
    disposed: AtomicBool,
}

impl MemoryFile {
    /// Creates or attaches to the backing file per the queue options.
    ///
    /// Exclusive creation wins ownership; on collision a
    /// `create_or_override` opener truncates and takes ownership, anyone
    /// else attaches after verifying the on-disk length. Partial failures
    /// roll back: an owned file that could not be sized or mapped is
    /// best-effort unlinked, with the cleanup error logged rather than
    /// masking the original.
    pub fn create_or_open(options: &QueueOptions) -> Result<Self, QueueError> {
        let directory = queue_directory(&options.path);
        fs::create_dir_all(&directory)?;
        let file_path = queue_file_path(&options.path, &options.queue_name);
        let bytes_capacity = options.bytes_capacity();

        let (file, is_owner) = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&file_path)
        {
            Ok(file) => (file, true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if options.create_or_override {
                    // Last writer wins; holders of a prior mapping keep
                    // operating against the old inode until they re-open.
                    let file = OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(&file_path)?;
                    (file, true)
                } else {
                    let file = OpenOptions::new().read(true).write(true).open(&file_path)?;
                    let actual = file.metadata()?.len() as usize;
                    if actual != bytes_capacity {
                        return Err(QueueError::AlreadyExistsIncompatible {
                            expected: bytes_capacity,
                            actual,
                        });
                    }
                    (file, false)
                }
            }
            Err(e) => return Err(e.into()),
        };

        if is_owner {
            if let Err(e) = file.set_len(bytes_capacity as u64) {
                Self::rollback(&file_path, file);
                return Err(e.into());
            }
        }

        let mmap = unsafe { MmapOptions::new().map_mut(&file) };
        let mmap = match mmap {
            Ok(m) => m,
            Err(e) => {
                if is_owner {
                    Self::rollback(&file_path, file);
                }
                return Err(e.into());
            }
        };

        debug!(
            path = %file_path.display(),
            bytes = bytes_capacity,
            owner = is_owner,
            "shared region mapped"
        );

        Ok(Self {
            view: Mutex::new(Some(MemoryView::new(mmap))),
            _file: file,
            file_path,
            is_owner,
            disposed: AtomicBool::new(false),
        })
    }

    /// Base address of the mapping, or `None` once disposed.
    pub fn base_ptr(&self) -> Option<*mut u8> {
        self.lock_view().as_ref().map(|view| view.as_ptr())
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Releases the mapping, then (owner only) best-effort unlinks the
    /// on-disk artifact, in that order. Idempotent; never raises. Callers
    /// must not hand out addresses derived from the mapping past this
    /// point.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.lock_view().take());
        if self.is_owner {
            if let Err(e) = fs::remove_file(&self.file_path) {
                warn!(
                    path = %self.file_path.display(),
                    error = %e,
                    "failed to unlink backing file"
                );
            }
        }
    }

    fn lock_view(&self) -> MutexGuard<'_, Option<MemoryView>> {
        match self.view.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn rollback(file_path: &PathBuf, file: File) {
        drop(file);
        if let Err(e) = fs::remove_file(file_path) {
            warn!(
                path = %file_path.display(),
                error = %e,
                "cleanup after failed mapping also failed"
            );
        }
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        self.dispose();
    }
}
