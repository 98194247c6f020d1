mod api_key;
mod connection_string;
mod uuid;

pub use api_key::ApiKey;
pub use connection_string::ConnectionString;
pub use uuid::Uuid;
