#[cfg(feature = "browser")]
pub mod browser;
pub mod extractor;
pub mod http;

#[cfg(feature = "browser")]
pub use browser::ChromiumRenderer;
pub use extractor::{ExtractionSpec, SelectorExtractor};
pub use http::HttpRenderer;
