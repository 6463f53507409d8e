pub mod credentials;
pub mod error;
pub mod telemetry;

pub use credentials::{
    ClientSecretProvider, Credential, CredentialProvider, StoredCredentialProvider,
    CLOUD_PLATFORM_SCOPE, GOOGLE_TOKEN_URI,
};
pub use error::CredentialError;
