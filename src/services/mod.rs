//! Service layer: integrations and cross-cutting business operations.
//!
//! Redis caching, email and push delivery, the background job queue and
//! scheduler, notifications, moderation, chat fan-out and media storage.

pub mod audience;
pub mod audit;
pub mod cache;
pub mod chat_hub;
pub mod email;
pub mod jobs;
pub mod mailer;
pub mod moderation;
pub mod notifications;
pub mod push;
pub mod scheduler;
pub mod storage;
pub mod templates;

pub use cache::RedisCache;
pub use chat_hub::ChatHub;
pub use jobs::JobQueue;
pub use mailer::EmailSender;
pub use push::PushClient;
pub use storage::MediaStorage;
