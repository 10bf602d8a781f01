pub mod handlers;
pub mod server;
pub mod service;
pub mod store;

use uuid::Uuid;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: service::NoteService,
    /// Base URL used to build shareable note links.
    pub public_url: String,
}

impl AppState {
    pub fn note_url(&self, id: Uuid) -> String {
        format!("{}/notes/{}", self.public_url.trim_end_matches('/'), id)
    }
}

pub use server::{resolve_data_dir, router, run, ServerConfig};
pub use service::{CreateOutcome, CreateRequest, NoteService, ReadOutcome, ReadRequest};
pub use store::Store;
