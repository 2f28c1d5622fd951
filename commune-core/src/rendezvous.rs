//! Rendezvous addressing: one configured path, two derived addresses.
//!
//! Cooperating processes agree on a single path. Both the socket address the
//! leader binds and the lock address the election is decided on are derived
//! from it deterministically, so every process resolves the same pair
//! without further coordination.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Immutable identity of one logical process network.
///
/// `path` is the rendezvous point; `id` is an optional human-readable label
/// for this participant, carried into trace output only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkIdentity {
    path: PathBuf,
    id: Option<String>,
}

impl NetworkIdentity {
    /// Create an identity for the network rendezvoused at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id: None,
        }
    }

    /// Attach a participant label, used in trace output.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The configured rendezvous path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The participant label, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Derived socket address: `<path>.sock` on Unix.
    ///
    /// On Windows the same identity maps into the named-pipe namespace; see
    /// [`NetworkIdentity::pipe_name`].
    pub fn socket_path(&self) -> PathBuf {
        let mut os: OsString = self.path.clone().into_os_string();
        os.push(".sock");
        PathBuf::from(os)
    }

    /// Derived lock address: `<path>.lock`.
    pub fn lock_path(&self) -> PathBuf {
        let mut os: OsString = self.path.clone().into_os_string();
        os.push(".lock");
        PathBuf::from(os)
    }

    /// Named-pipe form of the socket address for Windows hosts.
    ///
    /// Path separators and colons are folded to `-` so the whole rendezvous
    /// path fits into the flat `\\.\pipe\` namespace.
    pub fn pipe_name(&self) -> String {
        let flat: String = self
            .path
            .display()
            .to_string()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '-',
                other => other,
            })
            .collect();
        format!(r"\\.\pipe\{}", flat.trim_start_matches('-'))
    }
}

impl std::fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}@{}", id, self.path.display()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivations_are_deterministic() {
        let a = NetworkIdentity::new("/tmp/app");
        let b = NetworkIdentity::new("/tmp/app").with_id("worker-3");

        // The id never influences the shared addresses.
        assert_eq!(a.socket_path(), b.socket_path());
        assert_eq!(a.lock_path(), b.lock_path());
        assert_eq!(a.socket_path(), PathBuf::from("/tmp/app.sock"));
        assert_eq!(a.lock_path(), PathBuf::from("/tmp/app.lock"));
    }

    #[test]
    fn socket_and_lock_addresses_differ() {
        let identity = NetworkIdentity::new("/run/user/1000/net");
        assert_ne!(identity.socket_path(), identity.lock_path());
    }

    #[test]
    fn dotted_paths_keep_their_stem() {
        // A naive set_extension would clobber "v2".
        let identity = NetworkIdentity::new("/tmp/app.v2");
        assert_eq!(identity.socket_path(), PathBuf::from("/tmp/app.v2.sock"));
        assert_eq!(identity.lock_path(), PathBuf::from("/tmp/app.v2.lock"));
    }

    #[test]
    fn pipe_name_is_flat() {
        let identity = NetworkIdentity::new("/tmp/app");
        assert_eq!(identity.pipe_name(), r"\\.\pipe\tmp-app");
    }

    #[test]
    fn display_includes_id_when_set() {
        let identity = NetworkIdentity::new("/tmp/app").with_id("a");
        assert_eq!(identity.to_string(), "a@/tmp/app");
    }
}
