pub mod session_directory;

pub use session_directory::{PgSessionDirectory, SessionDirectory};

// MockSessionDirectory is only available in test builds via #[cfg(test)]
#[cfg(test)]
pub use session_directory::MockSessionDirectory;
