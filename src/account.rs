//! Account data model and on-disk persistence.
//!
//! The field layout follows spec §3's Account/DeviceProfile/Quota shapes;
//! the persistence pattern (one JSON file per account under an accounts
//! directory, an index file tracking which ids exist, atomic
//! write-to-temp-then-rename) is carried over from `modules/account.rs`
//! and `proxy/token_manager.rs` in the source repo.

use crate::device_profile::DeviceProfile;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quota {
    pub project_id: Option<String>,
    pub subscription_tier: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub is_forbidden: bool,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            project_id: None,
            subscription_tier: None,
            models: Vec::new(),
            is_forbidden: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthBundle {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) at which `access_token` expires.
    pub expiry_timestamp: i64,
}

impl OAuthBundle {
    /// `access-token` is considered expired five minutes before
    /// `expiry-time`, to mask clock skew between us and upstream.
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() >= self.expiry_timestamp - 300
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    pub token: OAuthBundle,
    #[serde(default)]
    pub device_profile: Option<DeviceProfile>,
    #[serde(default)]
    pub device_history: Vec<DeviceProfile>,
    #[serde(default)]
    pub quota: Quota,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountSummary {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountIndex {
    #[serde(default)]
    pub accounts: Vec<AccountSummary>,
    #[serde(default)]
    pub current_account_id: Option<String>,
}

impl AccountIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

const ACCOUNTS_INDEX: &str = "accounts.json";
const ACCOUNTS_DIR: &str = "accounts";

/// Flat-JSON-file account store rooted at a configured data directory.
pub struct AccountStore {
    data_dir: PathBuf,
}

impl AccountStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn accounts_dir(&self) -> PathBuf {
        self.data_dir.join(ACCOUNTS_DIR)
    }

    fn account_path(&self, id: &str) -> PathBuf {
        self.accounts_dir().join(format!("{}.json", id))
    }

    fn index_path(&self) -> PathBuf {
        self.data_dir.join(ACCOUNTS_INDEX)
    }

    pub fn load_index(&self) -> AppResult<AccountIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(AccountIndex::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_index(&self, index: &AccountIndex) -> AppResult<()> {
        fs::create_dir_all(&self.data_dir)?;
        let path = self.index_path();
        let tmp = self.data_dir.join(format!("{}.tmp", ACCOUNTS_INDEX));
        fs::write(&tmp, serde_json::to_string_pretty(index)?)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> AppResult<Account> {
        let path = self.account_path(id);
        if !path.exists() {
            return Err(AppError::AccountNotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, account: &Account) -> AppResult<()> {
        fs::create_dir_all(self.accounts_dir())?;
        let path = self.account_path(&account.id);
        let tmp = self.accounts_dir().join(format!("{}.json.tmp", account.id));
        fs::write(&tmp, serde_json::to_string_pretty(account)?)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    /// List all accounts, auto-repairing the index if it references a file
    /// that no longer exists.
    pub fn list(&self) -> AppResult<Vec<Account>> {
        let mut index = self.load_index()?;
        let mut accounts = Vec::new();
        let mut invalid_ids = Vec::new();

        for summary in &index.accounts {
            match self.load(&summary.id) {
                Ok(account) => accounts.push(account),
                Err(AppError::AccountNotFound(_)) => invalid_ids.push(summary.id.clone()),
                Err(e) => tracing::warn!("failed to load account {}: {}", summary.id, e),
            }
        }

        if !invalid_ids.is_empty() {
            index.accounts.retain(|s| !invalid_ids.contains(&s.id));
            if let Some(current) = &index.current_account_id {
                if invalid_ids.contains(current) {
                    index.current_account_id = index.accounts.first().map(|s| s.id.clone());
                }
            }
            self.save_index(&index)?;
        }

        Ok(accounts)
    }

    /// Load every `*.json` file directly under the accounts directory,
    /// independent of the index (used at boot to seed the token pool,
    /// mirroring `token_manager.rs`'s `load_accounts`).
    pub fn load_all_from_disk(&self) -> AppResult<Vec<Account>> {
        let dir = self.accounts_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut accounts = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match self.load_from_path(&path) {
                Ok(account) => accounts.push(account),
                Err(e) => tracing::warn!("failed to load account file {:?}: {}", path, e),
            }
        }
        Ok(accounts)
    }

    fn load_from_path(&self, path: &Path) -> AppResult<Account> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            display_name: String::new(),
            token: OAuthBundle {
                access_token: "at".into(),
                refresh_token: "rt".into(),
                expiry_timestamp: chrono::Utc::now().timestamp() + 3600,
            },
            device_profile: None,
            device_history: Vec::new(),
            quota: Quota::default(),
        }
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempdir_for_test();
        let store = AccountStore::new(dir.clone());
        let account = sample_account("acc-1");
        store.save(&account).unwrap();
        let loaded = store.load("acc-1").unwrap();
        assert_eq!(loaded.email, "acc-1@example.com");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn list_repairs_dangling_index_entry() {
        let dir = tempdir_for_test();
        let store = AccountStore::new(dir.clone());
        let account = sample_account("acc-2");
        store.save(&account).unwrap();
        let mut index = AccountIndex::new();
        index.accounts.push(AccountSummary {
            id: "acc-2".into(),
            email: account.email.clone(),
        });
        index.accounts.push(AccountSummary {
            id: "ghost".into(),
            email: "ghost@example.com".into(),
        });
        index.current_account_id = Some("ghost".into());
        store.save_index(&index).unwrap();

        let accounts = store.list().unwrap();
        assert_eq!(accounts.len(), 1);
        let repaired = store.load_index().unwrap();
        assert_eq!(repaired.accounts.len(), 1);
        assert_eq!(repaired.current_account_id, Some("acc-2".to_string()));
        let _ = fs::remove_dir_all(dir);
    }

    fn tempdir_for_test() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "antigravity-bridge-test-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn expiry_margin_is_five_minutes() {
        let now = chrono::Utc::now().timestamp();
        let bundle = OAuthBundle {
            access_token: "x".into(),
            refresh_token: "y".into(),
            expiry_timestamp: now + 200,
        };
        assert!(bundle.is_expired());
        let bundle2 = OAuthBundle {
            expiry_timestamp: now + 400,
            ..bundle
        };
        assert!(!bundle2.is_expired());
    }
}
