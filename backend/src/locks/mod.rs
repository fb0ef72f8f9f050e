pub mod model;
pub mod repository_sqlx;
pub mod service;

pub use model::{DocumentLock, LockKey, LockResult, LockableDocumentType};
pub use service::DocumentLockService;
