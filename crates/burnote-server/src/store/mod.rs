pub mod db;
pub mod error;
pub mod model;

pub use db::Store;
pub use error::{Field, StoreError};
pub use model::{expiry_instant, Delivery, NoteMeta, NoteRecord};
