pub mod channels;
pub mod model;
pub mod repository_sqlx;
pub mod service;

pub use channels::ChannelAdapter;
pub use model::{Channel, DeliveryStatus, NotificationPreferences};
pub use service::NotificationService;
