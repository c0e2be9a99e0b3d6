//! # Arlo Media
//!
//! Bulk download of recordings from the cloud library or a base station's
//! local storage.
//!
//! ```text
//! listing ─▶ enumerate ─▶ DownloadTask ─▶ Router ─┬─▶ Tunnel  (/hmsls/download/..)
//!                (skip existing)                   └─▶ CloudDownloader per host
//!                                                            │
//!                                   .part file ─▶ sync ─▶ rename ◀┘
//! ```
//!
//! [`run`] drives the tasks through a bounded worker pool; one task's
//! failure is reported, never propagated to its siblings.

pub mod errors;
pub mod library;
pub mod pipeline;
pub mod router;
pub mod transfer;

pub use errors::{Result, TransferError};
pub use library::{
    destination_for, enumerate, fetch_cloud_library, fetch_local_library, library_window,
    DownloadTask, LocalStorage, MediaItem, MediaSource, CLOUD_LIBRARY_PATH, LOCAL_LIBRARY_PATH,
};
pub use pipeline::{download_cloud_library, download_station_library};
pub use router::{
    route, CloudDownloader, HostClient, HostClientFactory, HttpClientFactory, MediaFetcher,
    RetryPolicy, Route, Router, LOCAL_DOWNLOAD_PATH,
};
pub use transfer::{fetch, run, FetchOutcome, TransferReport};
