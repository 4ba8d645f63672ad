//! clubdesk — membership dashboard core.
//! Filter engine over spreadsheet-backed member records, a debounced batch
//! writer for staff annotations, and an AI adapter that tags free-text
//! feedback against a fixed concern vocabulary.

pub mod ai;
pub mod api;
pub mod error;
pub mod filter;
pub mod member;
pub mod queue;
pub mod store;

pub use store::SharedStore;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub queue: queue::AnnotationQueue,
    pub ai: Option<ai::AiConfig>,
    pub api_key: Option<String>,
    pub started_at: std::time::Instant,
}
