pub mod cache;
pub mod catalog;
pub mod client;
pub mod config;
pub mod course;
pub mod error;
pub mod persist;
pub mod session;
pub mod store;

pub use cache::{shared_cache, CacheStats, CourseCache, SharedCourseCache};
pub use catalog::{build_courses, RemoteProduct, RemoteUser};
pub use client::{refresh_catalog, CatalogClient, LoginResponse};
pub use config::{ApiConfig, AppConfig, StorageConfig};
pub use course::{Course, CourseId, Instructor};
pub use error::{CatalogError, ClientError, ConfigError, SessionError, StoreError};
pub use persist::PersistFailure;
pub use session::{CredentialStore, FileCredentialStore, MemoryCredentialStore, Session, User};
pub use store::{CacheSnapshot, JsonFileStore, MemoryStore, SnapshotStore};
