use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy_signer_local::LocalSigner;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use playbook_core::client::KeyCache;
use playbook_core::Context;

/// Keyfile locations per address, and the keys decrypted from them so far.
pub struct KeystoreCache {
    paths: RwLock<HashMap<Address, PathBuf>>,
    keys: RwLock<HashMap<Address, PrivateKeySigner>>,
    ctx: Context,
}

impl KeystoreCache {
    pub fn new(ctx: Context) -> KeystoreCache {
        KeystoreCache { paths: RwLock::new(HashMap::new()), keys: RwLock::new(HashMap::new()), ctx }
    }

    fn cached(&self, address: Address) -> Option<PrivateKeySigner> {
        self.keys.read().ok()?.get(&address).cloned()
    }

    fn path_of(&self, address: Address) -> Option<PathBuf> {
        self.paths.read().ok()?.get(&address).cloned()
    }
}

impl KeyCache for KeystoreCache {
    fn set_path(&self, address: Address, path: &Path) {
        let Ok(mut paths) = self.paths.write() else {
            return;
        };
        let previous = paths.insert(address, path.to_path_buf());
        if previous.as_deref() != Some(path) {
            if let Ok(mut keys) = self.keys.write() {
                keys.remove(&address);
            }
        }
    }

    fn unset_path(&self, address: Address, path: &Path) {
        let Ok(mut paths) = self.paths.write() else {
            return;
        };
        if paths.get(&address).map(PathBuf::as_path) == Some(path) {
            paths.remove(&address);
            if let Ok(mut keys) = self.keys.write() {
                keys.remove(&address);
            }
        }
    }

    fn private_key(&self, address: Address, password: &str) -> Option<PrivateKeySigner> {
        if let Some(key) = self.cached(address) {
            return Some(key);
        }
        let path = self.path_of(address)?;
        match LocalSigner::decrypt_keystore(&path, password) {
            Ok(key) => {
                if let Ok(mut keys) = self.keys.write() {
                    keys.insert(address, key.clone());
                }
                Some(key)
            }
            Err(e) => {
                self.ctx.try_log(|logger| {
                    warn!(logger, "unable to decrypt keyfile {}: {}", path.display(), e)
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const PASSWORD: &str = "testpassword";
    const PRIVATE_KEY: &str = "7a28b5ba57c53603b0b07b56bba752f7784bf506fa95edc395f5cf6c7514fe9d";
    const KEYFILE: &str = r#"{
        "crypto": {
            "cipher": "aes-128-ctr",
            "cipherparams": {"iv": "6087dab2f9fdbbfaddc31a909735c1e6"},
            "ciphertext": "5318b4d5bcd28de64ee5559e671353e16f075ecae9f99c7a79a38af5f869aa46",
            "kdf": "pbkdf2",
            "kdfparams": {
                "c": 262144,
                "dklen": 32,
                "prf": "hmac-sha256",
                "salt": "ae3cd4e7013836a3df6bd7241b12db061dbe2c6785853cce422d148a624ce0bd"
            },
            "mac": "517ead924a9d0dc3124507e3393d175ce3ff7c1e96529c6c555ce9e51205e9b2"
        },
        "id": "3198bc9c-6672-5ab3-d995-4942343ae5b6",
        "version": 3
    }"#;

    fn keyfile(dir: &Path) -> (Address, PathBuf) {
        let path = dir.join("alice.json");
        std::fs::write(&path, KEYFILE).unwrap();
        (PrivateKeySigner::from_str(PRIVATE_KEY).unwrap().address(), path)
    }

    #[test]
    fn test_decrypts_registered_keyfile() {
        let dir = tempfile::tempdir().unwrap();
        let (address, path) = keyfile(dir.path());
        let cache = KeystoreCache::new(Context::empty());

        assert!(cache.private_key(address, PASSWORD).is_none());
        cache.set_path(address, &path);
        let key = cache.private_key(address, PASSWORD).unwrap();
        assert_eq!(key.address(), address);

        // served from the cache once decrypted
        std::fs::remove_file(&path).unwrap();
        assert!(cache.private_key(address, PASSWORD).is_some());
    }

    #[test]
    fn test_wrong_password_yields_no_key() {
        let dir = tempfile::tempdir().unwrap();
        let (address, path) = keyfile(dir.path());
        let cache = KeystoreCache::new(Context::empty());
        cache.set_path(address, &path);
        assert!(cache.private_key(address, "wrong").is_none());
    }

    #[test]
    fn test_unset_path_forgets_key() {
        let dir = tempfile::tempdir().unwrap();
        let (address, path) = keyfile(dir.path());
        let cache = KeystoreCache::new(Context::empty());
        cache.set_path(address, &path);
        assert!(cache.private_key(address, PASSWORD).is_some());

        cache.unset_path(address, Path::new("/elsewhere.json"));
        assert!(cache.private_key(address, PASSWORD).is_some());

        cache.unset_path(address, &path);
        assert!(cache.private_key(address, PASSWORD).is_none());
    }
}
