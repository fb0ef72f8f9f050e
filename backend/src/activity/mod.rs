pub mod model;
pub mod repository_sqlx;
pub mod service;

pub use model::{Activity, ActivityFilter, NewActivity};
pub use service::ActivityFeedService;
