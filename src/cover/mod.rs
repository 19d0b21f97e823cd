//! Album cover art resolution.
//!
//! After a sync touches an album without a cover, one is taken from:
//!
//! 1. **Embedded tags** - picture data in the synced file
//! 2. **Sidecar files** - `cover.jpg`, `folder.png`, etc. next to the file
//!
//! Directory scans for sidecars are cached (see [`cache`]) because a bulk
//! sync visits the same folder once per track. The chosen image is written
//! into a [`CoverStore`] and its file name recorded on the album.

pub mod cache;
mod resolver;
pub mod sidecar;
mod store;

pub use cache::{MemoryScanCache, ScanCache};
pub use resolver::{CoverResolver, CoverSource, ResolvedCover};
pub use sidecar::{DirectoryLister, FsLister};
pub use store::{CoverStore, StoredCover};
