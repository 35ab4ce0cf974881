// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A stored credential for one provider.
///
/// The on-disk form matches the wire contract of `auth.json`:
/// `{"type":"api","key":…}` or `{"type":"oauth","refresh":…,"access":…,"expires":…}`.
/// `expires` is wall-clock milliseconds since the epoch.  `access` and
/// `expires` may be empty/zero when only the long-lived refresh token is
/// known (freshly completed device flow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credential {
    Api {
        key: String,
    },
    Oauth {
        refresh: String,
        #[serde(default)]
        access: String,
        #[serde(default)]
        expires: i64,
    },
}

/// Per-user credential file, the single source of truth for provider
/// authentication.  At most one credential per provider id.
///
/// All mutations are read-modify-write cycles serialised by a process-level
/// mutex; each write lands via temp-file + rename so the file is always
/// either the previous or the new fully-valid state.  Concurrent writers
/// from other processes are not supported.
pub struct CredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the credential for `provider_id`.  A missing file, missing key,
    /// or unparseable file yields `None` (parse errors are logged).
    pub async fn get(&self, provider_id: &str) -> Option<Credential> {
        self.read_map().await.remove(provider_id)
    }

    /// All stored credentials keyed by provider id.
    pub async fn all(&self) -> HashMap<String, Credential> {
        self.read_map().await
    }

    /// Insert or replace the credential for `provider_id` and persist.
    pub async fn set(&self, provider_id: &str, cred: Credential) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await;
        map.insert(provider_id.to_string(), cred);
        self.write_map(&map).await?;
        info!(provider = provider_id, "saved credential");
        Ok(())
    }

    /// Remove the credential for `provider_id`.  No-op when absent.
    pub async fn remove(&self, provider_id: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await;
        if map.remove(provider_id).is_some() {
            self.write_map(&map).await?;
            info!(provider = provider_id, "removed credential");
        }
        Ok(())
    }

    async fn read_map(&self) -> HashMap<String, Credential> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(_) => return HashMap::new(),
        };
        match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "credential file unparseable");
                HashMap::new()
            }
        }
    }

    async fn write_map(&self, map: &HashMap<String, Credential>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let json = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming into {}", self.path.display()))?;

        // Owner read/write only — the file holds API keys and OAuth tokens.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.path, perms)
                .await
                .with_context(|| format!("chmod 600 {}", self.path.display()))?;
        }

        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> CredentialStore {
        CredentialStore::new(dir.path().join("auth.json"))
    }

    #[tokio::test]
    async fn get_on_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.get("openai").await.is_none());
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .set("openai", Credential::Api { key: "sk-test".into() })
            .await
            .unwrap();
        let cred = store.get("openai").await.unwrap();
        assert_eq!(cred, Credential::Api { key: "sk-test".into() });
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_oauth_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let cred = Credential::Oauth {
            refresh: "gho_refresh".into(),
            access: "tid=abc".into(),
            expires: 1_700_000_000_000,
        };
        store.set("github-copilot", cred.clone()).await.unwrap();
        assert_eq!(store.get("github-copilot").await.unwrap(), cred);
    }

    #[tokio::test]
    async fn wire_format_uses_type_tag() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .set("openai", Credential::Api { key: "k".into() })
            .await
            .unwrap();
        let text = std::fs::read_to_string(dir.path().join("auth.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["openai"]["type"], "api");
        assert_eq!(v["openai"]["key"], "k");
    }

    #[tokio::test]
    async fn oauth_missing_access_defaults_to_empty() {
        // A freshly completed device flow stores only the refresh token.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(
            &path,
            r#"{"github-copilot":{"type":"oauth","refresh":"gho_x"}}"#,
        )
        .unwrap();
        let store = CredentialStore::new(&path);
        match store.get("github-copilot").await.unwrap() {
            Credential::Oauth { refresh, access, expires } => {
                assert_eq!(refresh, "gho_x");
                assert!(access.is_empty());
                assert_eq!(expires, 0);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_mode_is_0600_after_write() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .set("openai", Credential::Api { key: "k".into() })
            .await
            .unwrap();
        let mode = std::fs::metadata(dir.path().join("auth.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn set_overwrites_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .set("openai", Credential::Api { key: "old".into() })
            .await
            .unwrap();
        store
            .set("openai", Credential::Api { key: "new".into() })
            .await
            .unwrap();
        assert_eq!(
            store.get("openai").await.unwrap(),
            Credential::Api { key: "new".into() }
        );
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_deletes_only_named_provider() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .set("openai", Credential::Api { key: "a".into() })
            .await
            .unwrap();
        store
            .set("anthropic", Credential::Api { key: "b".into() })
            .await
            .unwrap();
        store.remove("openai").await.unwrap();
        assert!(store.get("openai").await.is_none());
        assert!(store.get("anthropic").await.is_some());
    }

    #[tokio::test]
    async fn remove_missing_provider_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.remove("nope").await.unwrap();
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = CredentialStore::new(&path);
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .set("openai", Credential::Api { key: "k".into() })
            .await
            .unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
