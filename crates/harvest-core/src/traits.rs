use std::future::Future;

use crate::error::AppError;
use crate::models::{CountHint, Entity, Extraction, Record, RenderedPage};

/// Launches rendering sessions (a headless browser, an HTTP client, ...).
pub trait PageRenderer: Send + Sync {
    type Session: RenderSession;

    /// Acquire a session. One session is shared by a whole pipeline phase.
    fn open(&self) -> impl Future<Output = Result<Self::Session, AppError>> + Send;
}

/// A live rendering session, released with [`RenderSession::close`].
pub trait RenderSession: Send + Sync {
    type Page: PageHandle;

    /// Open a page handle (a browser tab). Handles are scoped to one entity.
    fn new_page(&self) -> impl Future<Output = Result<Self::Page, AppError>> + Send;

    fn close(self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A single navigable page.
pub trait PageHandle: Send {
    /// Navigate to `url`, wait for the page to settle, and snapshot its HTML.
    ///
    /// Fails with [`AppError::Navigation`] or [`AppError::Timeout`].
    fn fetch(&self, url: &str) -> impl Future<Output = Result<RenderedPage, AppError>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Maps rendered pages to entities and records.
///
/// Selectors live entirely in implementations. "Nothing matched" is an
/// empty result, never an error: an empty page is a valid terminal signal.
pub trait Extractor: Send + Sync + Clone {
    fn extract_entities(&self, page: &RenderedPage) -> Extraction<Vec<Entity>>;

    fn extract_records(&self, page: &RenderedPage, entity: &Entity) -> Vec<Record>;

    fn extract_total_count(&self, page: &RenderedPage) -> Option<CountHint>;

    /// URL of the "next page" affordance, if the page shows one.
    fn find_next_page(&self, page: &RenderedPage) -> Option<String>;
}
