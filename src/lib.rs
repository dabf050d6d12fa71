pub mod archive;
pub mod cli;
pub mod cloner;
pub mod css;
pub mod downloader;
pub mod error;
pub mod html_parser;
pub mod logging;
pub mod naming;

// Re-export main types for convenience
pub use cli::CloneCommand;
pub use cloner::{clone_page, clone_with, validate_target, CloneOptions, CloneOutput, WebsiteCloner};
pub use downloader::{AssetEntry, AssetRegistry, AssetState, AssetTable, FetchError, Fetcher, HttpFetcher};
pub use error::{CloneError, ErrorReport};
pub use html_parser::{Discovery, Page};
