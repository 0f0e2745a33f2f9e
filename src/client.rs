//! Credentialed session to the chat web app.
//!
//! Keep the public surface small: build a [`CredentialedSession`], `init` it,
//! then `generate` / `generate_stream`. Implementation details are split into
//! submodules under `src/client/`.

pub mod auth;
pub mod builder;
pub mod core;
pub mod execution;
pub mod gems;
pub mod rotate;
pub mod upload;

pub use auth::{AuthContext, CredentialSource};
pub use builder::{CredentialedSessionBuilder, SessionOptions};
pub use core::{CredentialedSession, SessionState};
pub use execution::GenerateRequest;
pub use gems::GemCatalog;
pub use upload::{ContentPushUploader, FileInput, FileUploader, UploadedFile};
