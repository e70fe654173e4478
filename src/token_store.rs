use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};

/// 永続化されるリフレッシュトークン
///
/// リフレッシュトークンは使用のたびにローテーションされるため、
/// プロセス再起動後も継続できるようファイルに書き戻す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRefreshToken {
    pub refresh_token: String,
}

/// リフレッシュトークン永続化の抽象化トレイト
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// 保存済みトークンを読み込み（未保存・読込不能の場合はNone）
    async fn load(&self) -> Option<PersistedRefreshToken>;

    /// ローテーション後のトークンを保存
    async fn save(&self, token: &PersistedRefreshToken) -> Result<()>;
}

/// JSONファイルベースのトークンストア
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Option<PersistedRefreshToken> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "no stored refresh token");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(token) => {
                debug!(path = %self.path.display(), "loaded refresh token from store");
                Some(token)
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "could not decode stored refresh token");
                None
            }
        }
    }

    async fn save(&self, token: &PersistedRefreshToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(Error::IoError)?;
        }

        let json_data = serde_json::to_string(token)?;

        let mut file = fs::File::create(&self.path).await.map_err(Error::IoError)?;
        file.write_all(json_data.as_bytes())
            .await
            .map_err(Error::IoError)?;
        file.sync_all().await.map_err(Error::IoError)?;

        debug!(path = %self.path.display(), "persisted rotated refresh token");
        Ok(())
    }
}
