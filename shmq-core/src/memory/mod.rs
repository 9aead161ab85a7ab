//! Platform-specific ownership of the shared region and the in-process
//! view over it.

mod view;

#[cfg(unix)]
mod file;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use file::MemoryFile;
pub use view::MemoryView;
#[cfg(windows)]
pub use windows::MemoryFile;

#[cfg(unix)]
use std::path::{Path, PathBuf};

/// Directory under the queue path that holds backing files and signal
/// sockets.
#[cfg(unix)]
pub(crate) const SHARED_DIRECTORY: &str = ".cloudtoid/interprocess/mmf";

#[cfg(unix)]
pub(crate) fn queue_directory(path: &Path) -> PathBuf {
    path.join(SHARED_DIRECTORY)
}

#[cfg(unix)]
pub(crate) fn queue_file_path(path: &Path, queue_name: &str) -> PathBuf {
    queue_directory(path).join(format!("{}.qu", queue_name))
}
