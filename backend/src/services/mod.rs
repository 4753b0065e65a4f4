pub mod directory_client;
pub mod media_client;
pub mod network_quality;
pub mod orchestrator;
pub mod presence;
pub mod token_issuer;
pub mod token_refresh;

pub use directory_client::HttpSessionDirectory;
pub use orchestrator::{ClassroomIdentity, SessionOrchestrator, SessionState};
pub use token_issuer::{HttpTokenIssuer, TokenIssuer};
