//! Passwd-backed credential resolver.

use nix::unistd::User;
use tracing::debug;

use ashd_core::identity::{CredentialResolver, ResolvedUser};

/// Resolves verified logins against the local passwd database.
#[derive(Debug, Default, Clone, Copy)]
pub struct PasswdResolver;

impl CredentialResolver for PasswdResolver {
    fn resolve(&self, login: &str) -> Option<ResolvedUser> {
        let user = match User::from_name(login) {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!(login, "No passwd entry for login");
                return None;
            }
            Err(e) => {
                debug!(login, error = %e, "Passwd lookup failed");
                return None;
            }
        };

        Some(ResolvedUser {
            username: user.name.clone(),
            uid: user.uid.as_raw().to_string(),
            gid: user.gid.as_raw().to_string(),
            home_dir: user.dir.to_string_lossy().into_owned(),
            shell: user.shell.to_string_lossy().into_owned(),
        })
    }
}
