use alloy::primitives::{Address, U256};
use alloy::signers::local::PrivateKeySigner;
use indexmap::IndexMap;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::client::KeyCache;
use crate::errors::{PlaybookError, PlaybookErrorExt, PlaybookResult};
use crate::manifest::WalletSection;
use crate::playbook_error;
use crate::types::params::{WalletDirectory, WalletField};
use crate::types::{u256_to_bigint, Value};
use crate::Context;

const KEYSTORE_SCHEME: &str = "keystore://";

#[derive(Debug, Clone)]
pub enum Credential {
    /// Key given inline in the playbook, already parsed.
    Embedded(PrivateKeySigner),
    /// Encrypted keyfile registered with the key cache.
    Keyfile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct WalletRecord {
    pub name: String,
    pub address: Address,
    pub password: Option<String>,
    pub keystore: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    pub credential: Credential,
    /// Last balance fetched during this run.
    pub balance: Option<U256>,
}

impl WalletRecord {
    /// Signing key, from the key cache first and the inline key otherwise.
    pub fn signer(&self, key_cache: &dyn KeyCache) -> Option<PrivateKeySigner> {
        if let Some(password) = &self.password {
            if let Some(key) = key_cache.private_key(self.address, password) {
                return Some(key);
            }
        }
        match &self.credential {
            Credential::Embedded(signer) => Some(signer.clone()),
            Credential::Keyfile(_) => None,
        }
    }

    fn from_section(
        name: &str,
        section: &WalletSection,
        base_dir: &Path,
        key_cache: &dyn KeyCache,
        ctx: &Context,
    ) -> PlaybookResult<WalletRecord> {
        let declared = declared_address(section.address.as_deref())?;
        let password = non_empty(&section.password).map(str::to_string);

        if let Some(privkey) = non_empty(&section.privkey) {
            if password.is_some() {
                ctx.try_log(|logger| {
                    warn!(logger, "wallet {}: private key is loaded from string, password is ignored", name)
                });
            }
            if non_empty(&section.keyfile).is_some() {
                ctx.try_log(|logger| {
                    warn!(logger, "wallet {}: private key is loaded from string, keyfile is ignored", name)
                });
            }
            let signer = PrivateKeySigner::from_str(privkey).map_err(|e| {
                playbook_error!(PlaybookError::Validation, "failed to unpack privkey: {}", e)
            })?;
            let address = match declared {
                None => {
                    ctx.try_log(|logger| {
                        info!(logger, "wallet {}: loaded address {:#x} from privkey", name, signer.address())
                    });
                    signer.address()
                }
                Some(declared) if declared != signer.address() => {
                    return Err(playbook_error!(
                        PlaybookError::Validation,
                        "address {:#x} loaded from privkey differs from specified address {:#x}",
                        signer.address(),
                        declared
                    ))
                }
                Some(declared) => declared,
            };
            return Ok(WalletRecord {
                name: name.to_string(),
                address,
                password: None,
                keystore: None,
                keyfile: None,
                credential: Credential::Embedded(signer),
                balance: None,
            });
        }

        if let Some(keyfile) = non_empty(&section.keyfile) {
            let password = password.ok_or_else(|| {
                playbook_error!(PlaybookError::Validation, "no password is provided for the account keyfile")
            })?;
            let (keystore, keyfile) = split_keyfile_location(
                non_empty(&section.keystore).map(PathBuf::from),
                keyfile,
                name,
                ctx,
            );
            let path = resolve_path(base_dir, &keystore.clone().unwrap_or_default().join(&keyfile));
            if !path.is_file() {
                return Err(playbook_error!(
                    PlaybookError::Validation,
                    "keyfile {} is not found or cannot be read",
                    path.display()
                ));
            }
            let keyfile_address = read_keyfile_address(&path)?;
            let address = match declared {
                None => {
                    ctx.try_log(|logger| {
                        info!(logger, "wallet {}: loaded address {:#x} from keyfile", name, keyfile_address)
                    });
                    keyfile_address
                }
                Some(declared) if declared != keyfile_address => {
                    return Err(playbook_error!(
                        PlaybookError::Validation,
                        "address {:#x} loaded from keyfile differs from specified address {:#x}",
                        keyfile_address,
                        declared
                    ))
                }
                Some(declared) => declared,
            };
            unlock(key_cache, address, &password, &path)?;
            return Ok(WalletRecord {
                name: name.to_string(),
                address,
                password: Some(password),
                keystore,
                keyfile: Some(keyfile),
                credential: Credential::Keyfile(path),
                balance: None,
            });
        }

        let Some(keystore) = non_empty(&section.keystore) else {
            return Err(playbook_error!(
                PlaybookError::Validation,
                "no privkey, keyfile or keystore specified"
            ));
        };
        let address = declared.ok_or_else(|| {
            playbook_error!(
                PlaybookError::Validation,
                "an address is required to search the keyfile in keystore"
            )
        })?;
        let password = password.ok_or_else(|| {
            playbook_error!(PlaybookError::Validation, "no password is provided for the account keyfile")
        })?;
        let store = resolve_path(base_dir, Path::new(keystore));
        let path = find_keyfile(&store, address, ctx)?.ok_or_else(|| {
            playbook_error!(
                PlaybookError::Validation,
                "no keyfile for {:#x} found in keystore {}",
                address,
                store.display()
            )
        })?;
        unlock(key_cache, address, &password, &path)?;
        Ok(WalletRecord {
            name: name.to_string(),
            address,
            password: Some(password),
            keystore: Some(store),
            keyfile: path.file_name().map(PathBuf::from),
            credential: Credential::Keyfile(path),
            balance: None,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn declared_address(address: Option<&str>) -> PlaybookResult<Option<Address>> {
    match address.map(str::trim) {
        None | Some("") | Some("0x0") => Ok(None),
        Some(address) => Address::from_str(address).map(Some).map_err(|e| {
            playbook_error!(
                PlaybookError::Validation,
                "address '{}' is not valid (must be a 0x-prefixed hex string): {}",
                address,
                e
            )
        }),
    }
}

/// Splits a keyfile setting into (keystore dir, file). `keystore://dir/file` overrides the keystore.
fn split_keyfile_location(
    keystore: Option<PathBuf>,
    keyfile: &str,
    name: &str,
    ctx: &Context,
) -> (Option<PathBuf>, PathBuf) {
    if let Some(location) = keyfile.strip_prefix(KEYSTORE_SCHEME) {
        if keystore.is_some() {
            ctx.try_log(|logger| {
                warn!(logger, "wallet {}: replacing keystore path with keyfile dir (keystore:// prefix)", name)
            });
        }
        let location = Path::new(location);
        let dir = location.parent().map(Path::to_path_buf).filter(|p| !p.as_os_str().is_empty());
        let file = location.file_name().map(PathBuf::from).unwrap_or_default();
        return (dir, file);
    }
    let keyfile = PathBuf::from(keyfile);
    if keyfile.is_absolute() {
        if keystore.is_some() {
            ctx.try_log(|logger| {
                warn!(logger, "wallet {}: ignoring keystore path, keyfile path is absolute", name)
            });
        }
        return (None, keyfile);
    }
    (keystore, keyfile)
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn unlock(key_cache: &dyn KeyCache, address: Address, password: &str, path: &Path) -> PlaybookResult<()> {
    key_cache.set_path(address, path);
    match key_cache.private_key(address, password) {
        Some(key) if key.address() == address => Ok(()),
        Some(key) => {
            key_cache.unset_path(address, path);
            Err(playbook_error!(
                PlaybookError::Validation,
                "address {:#x} loaded from keyfile {} differs from specified address {:#x}",
                key.address(),
                path.display(),
                address
            ))
        }
        None => {
            key_cache.unset_path(address, path);
            Err(playbook_error!(
                PlaybookError::Validation,
                "unable to load private key from keyfile {}",
                path.display()
            ))
        }
    }
}

#[derive(Deserialize)]
struct KeyfileHeader {
    address: String,
}

/// Reads the `address` field of an encrypted keyfile without decrypting it.
pub fn read_keyfile_address(path: &Path) -> PlaybookResult<Address> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        playbook_error!(PlaybookError::Validation, "unable to read keyfile {}: {}", path.display(), e)
    })?;
    let header: KeyfileHeader = serde_json::from_str(&data).map_err(|e| {
        playbook_error!(PlaybookError::Validation, "keyfile {} has wrong format: {}", path.display(), e)
    })?;
    Address::from_str(header.address.trim()).map_err(|e| {
        playbook_error!(
            PlaybookError::Validation,
            "wrong (not hex) address in {}: {}",
            path.display(),
            e
        )
    })
}

/// Scans the top level of a keystore directory for the keyfile of `address`.
pub fn find_keyfile(store: &Path, address: Address, ctx: &Context) -> PlaybookResult<Option<PathBuf>> {
    let entries = std::fs::read_dir(store).map_err(|e| {
        playbook_error!(
            PlaybookError::Validation,
            "failed to search keyfile in keystore {}: {}",
            store.display(),
            e
        )
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match read_keyfile_address(&path) {
            Ok(found) if found == address => return Ok(Some(path)),
            Ok(_) => {}
            Err(_) => ctx.try_log(|logger| {
                warn!(logger, "skipping {}: not a keyfile", path.display())
            }),
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, Default)]
pub struct Wallets {
    records: IndexMap<String, WalletRecord>,
}

impl Wallets {
    pub fn validate(
        sections: Option<&IndexMap<String, WalletSection>>,
        base_dir: &Path,
        key_cache: &dyn KeyCache,
        ctx: &Context,
    ) -> PlaybookResult<Wallets> {
        let mut records = IndexMap::new();
        for (name, section) in sections.into_iter().flatten() {
            let record = WalletRecord::from_section(name, section, base_dir, key_cache, ctx)
                .with_site("WALLETS", name.clone())?;
            records.insert(name.clone(), record);
        }
        Ok(Wallets { records })
    }

    pub fn get(&self, name: &str) -> Option<&WalletRecord> {
        self.records.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut WalletRecord> {
        self.records.get_mut(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WalletRecord> {
        self.records.values()
    }

    /// Names of wallets matching `selector`, in declaration order.
    pub fn matching(&self, selector: &Regex) -> Vec<String> {
        self.records.keys().filter(|name| selector.is_match(name)).cloned().collect()
    }
}

impl WalletDirectory for Wallets {
    fn contains_wallet(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    fn wallet_field(&self, name: &str, field: WalletField) -> Option<Value> {
        let record = self.records.get(name)?;
        match field {
            WalletField::Address => Some(Value::Address(record.address)),
            WalletField::Balance => record.balance.map(|b| Value::uint(u256_to_bigint(&b))),
            WalletField::Keystore => {
                record.keystore.as_ref().map(|p| Value::String(p.display().to_string()))
            }
            WalletField::Keyfile => {
                record.keyfile.as_ref().map(|p| Value::String(p.display().to_string()))
            }
        }
    }
}

/// Compiles a wallet selector into a regex matching whole wallet names.
pub fn compile_selector(selector: &str) -> PlaybookResult<Regex> {
    let pattern = if selector.is_empty() { ".*".to_string() } else { format!("^(?:{})$", selector) };
    Regex::new(&pattern).map_err(|e| {
        playbook_error!(PlaybookError::Validation, "wallet selector '{}' is not a valid regex: {}", selector, e)
    })
}

/// Picks one wallet per sticky key. The pick only depends on the key and the
/// candidate names, so repeated runs agree.
#[derive(Debug, Default)]
pub struct StickySelector {
    bound: HashMap<String, String>,
}

impl StickySelector {
    pub fn select(&mut self, key: &str, candidates: &[String]) -> PlaybookResult<String> {
        if candidates.is_empty() {
            return Err(playbook_error!(PlaybookError::Validation, "no wallet matches the selector"));
        }
        if let Some(bound) = self.bound.get(key) {
            if candidates.contains(bound) {
                return Ok(bound.clone());
            }
            return Err(playbook_error!(
                PlaybookError::Validation,
                "ambiguous wallet: sticky key '{}' is bound to '{}', which does not match the selector",
                key,
                bound
            ));
        }
        let mut sorted = candidates.to_vec();
        sorted.sort();
        let digest = Sha256::digest(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let index = (u64::from_be_bytes(prefix) % sorted.len() as u64) as usize;
        let chosen = sorted.swap_remove(index);
        self.bound.insert(key.to_string(), chosen.clone());
        Ok(chosen)
    }
}
