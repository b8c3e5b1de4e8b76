//! Proxy hashes.
//!
//! A hash names one exposed port of one process in one session. It is the
//! proxy service name, the first label of the public hostname and the
//! capability checked by forward-auth, so it must not be guessable and must
//! change whenever the session changes.

use sha2::{Digest, Sha256};
use wb_settings::ProxySettings;

/// Bytes of digest kept; 40 hex chars fit one DNS label.
const HASH_BYTES: usize = 20;

/// Derives proxy hashes under a process-wide salt.
#[derive(Clone)]
pub struct ProxyHasher {
    salt: Vec<u8>,
}

impl std::fmt::Debug for ProxyHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyHasher").finish_non_exhaustive()
    }
}

impl ProxyHasher {
    /// Hasher with a fixed salt.
    pub fn new(salt: impl AsRef<[u8]>) -> Self {
        Self {
            salt: salt.as_ref().to_vec(),
        }
    }

    /// Hasher with 32 random salt bytes.
    pub fn random() -> Self {
        Self {
            salt: rand::random::<[u8; 32]>().to_vec(),
        }
    }

    /// Configured salt, or a random one when none is set.
    pub fn from_settings(settings: &ProxySettings) -> Self {
        if settings.hash_salt.is_empty() {
            Self::random()
        } else {
            Self::new(&settings.hash_salt)
        }
    }

    /// Hash for `port` of `pid` in `resource_id`, owned by `session_id`.
    pub fn hash(&self, resource_id: &str, pid: u32, port: u16, session_id: &str) -> String {
        let mut hasher = Sha256::new();
        for field in [
            self.salt.as_slice(),
            resource_id.as_bytes(),
            &pid.to_be_bytes(),
            &port.to_be_bytes(),
            session_id.as_bytes(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        hasher.finalize()[..HASH_BYTES]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_within_session() {
        let h = ProxyHasher::new("salt");
        let a = h.hash("repo-1", 42, 8080, "s1");
        assert_eq!(a, h.hash("repo-1", 42, 8080, "s1"));
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn fields_do_not_run_together() {
        let h = ProxyHasher::new("");
        assert_ne!(h.hash("ab", 1, 1, "c"), h.hash("a", 1, 1, "bc"));
    }

    #[test]
    fn salt_matters() {
        assert_ne!(
            ProxyHasher::new("a").hash("r", 1, 8000, "s"),
            ProxyHasher::new("b").hash("r", 1, 8000, "s")
        );
    }

    #[test]
    fn empty_setting_means_random_salt() {
        let settings = ProxySettings::default();
        let a = ProxyHasher::from_settings(&settings).hash("r", 1, 8000, "s");
        let b = ProxyHasher::from_settings(&settings).hash("r", 1, 8000, "s");
        assert_ne!(a, b);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn different_sessions_differ(pid in any::<u32>(), port in 8000u16..9000, s1 in "[a-f0-9-]{8,36}", s2 in "[a-f0-9-]{8,36}") {
                prop_assume!(s1 != s2);
                let h = ProxyHasher::new("salt");
                prop_assert_ne!(h.hash("repo", pid, port, &s1), h.hash("repo", pid, port, &s2));
            }

            #[test]
            fn different_ports_differ(pid in any::<u32>(), p1 in any::<u16>(), p2 in any::<u16>()) {
                prop_assume!(p1 != p2);
                let h = ProxyHasher::new("salt");
                prop_assert_ne!(h.hash("repo", pid, p1, "s"), h.hash("repo", pid, p2, "s"));
            }
        }
    }
}
