//! Model catalog and on-demand downloads

pub mod catalog;
pub mod downloader;

pub use catalog::{CatalogAvailability, CatalogError, DownloadClaim, ModelCatalog, ModelDescriptor};
pub use downloader::{DownloadError, ModelDownloader, OllamaPuller};
