pub mod auth;
pub mod http;
pub mod realtime;
pub mod records;

pub use auth::{AuthError, SupabaseAuth};
pub use http::{ApiClient, ApiClientConfig, ApiError};
pub use realtime::RealtimeFeed;
pub use records::PostgrestStore;
