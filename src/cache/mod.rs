//! Content-addressed attachment re-upload.
//!
//! ## Module Structure
//!
//! - `store`: persistent hash -> upload mapping on SQLite
//! - `media`: fingerprinting, single-flight resolution, stale checks
//! - `download`: fetching attachment content from its source link
//! - `imgur`: the Imgur [`ImageHost`]
//! - `mock` (tests only): scripted host and downloader

pub mod download;
pub mod imgur;
pub mod media;
#[cfg(test)]
pub mod mock;
pub mod store;

pub use download::{HttpDownloader, MAX_DOWNLOAD_BYTES};
pub use imgur::ImgurHost;
pub use media::MediaResolver;
pub use store::ReuploadCache;
