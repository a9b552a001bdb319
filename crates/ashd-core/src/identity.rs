//! Resolved user identities and the credential-resolver boundary.
//!
//! The transport boundary verifies remote credentials; a configured
//! [`CredentialResolver`] turns the verified login into an OS identity.
//! The core never authenticates anyone itself - it only refuses to run a
//! session whose identity is missing or not numeric.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An OS identity resolved from verified remote credentials.
///
/// Produced once per connection by the credential resolver and never
/// shared across sessions. The uid/gid stay strings until the orchestrator
/// parses them; resolvers may hand through values from sources (directory
/// services, tokens) the core should not trust blindly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedUser {
    /// Login name, forced into the child's `USER`.
    pub username: String,
    /// Numeric uid as a string.
    pub uid: String,
    /// Numeric gid as a string.
    pub gid: String,
    /// Home directory; the child's working directory and `HOME`.
    pub home_dir: String,
    /// Login shell to invoke.
    pub shell: String,
}

impl ResolvedUser {
    /// Parse the numeric credential pair this session must drop to.
    ///
    /// The error messages are peer-visible (see [`Error::Identity`]).
    pub fn credentials(&self) -> Result<(u32, u32)> {
        let uid = self.uid.parse::<u32>().map_err(|_| Error::Identity {
            message: "Invalid user".into(),
        })?;
        let gid = self.gid.parse::<u32>().map_err(|_| Error::Identity {
            message: "Invalid user group".into(),
        })?;
        Ok((uid, gid))
    }
}

/// Converts a verified login into a resolved OS identity.
///
/// Returning `None` means the login maps to no local identity; the session
/// is then refused before any process is spawned.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, login: &str) -> Option<ResolvedUser>;
}
