use foundation::ids::Pnu;
use parcels::normalize::{ParcelRow, RawParcel};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::{BoxFuture, RemoteError, RemoteStore};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_table() -> String {
    "parcels".to_string()
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            table: default_table(),
        }
    }
}

/// PostgREST client for the parcel table.
pub struct SupabaseStore {
    config: SupabaseConfig,
    client: reqwest::Client,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.anon_key)
            .map_err(|e| RemoteError::Network(format!("invalid api key: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.anon_key))
            .map_err(|e| RemoteError::Network(format!("invalid api key: {e}")))?;
        headers.insert("apikey", key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Self { config, client })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.url.trim_end_matches('/'),
            self.config.table
        )
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

impl RemoteStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), RemoteError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(self.table_url())
                .query(&[("select", "pnu"), ("limit", "1")])
                .send()
                .await?;
            check(resp).await?;
            Ok(())
        })
    }

    fn select_all(&self) -> BoxFuture<'_, Result<Vec<RawParcel>, RemoteError>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(self.table_url())
                .query(&[("select", "*")])
                .send()
                .await?;
            let values: Vec<serde_json::Value> = check(resp).await?.json().await?;
            Ok(values.into_iter().filter_map(RawParcel::from_value).collect())
        })
    }

    fn upsert(&self, rows: Vec<ParcelRow>) -> BoxFuture<'_, Result<(), RemoteError>> {
        Box::pin(async move {
            if rows.is_empty() {
                return Ok(());
            }
            let resp = self
                .client
                .post(self.table_url())
                .query(&[("on_conflict", "pnu")])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(&rows)
                .send()
                .await?;
            check(resp).await?;
            Ok(())
        })
    }

    fn delete(&self, pnu: Pnu) -> BoxFuture<'_, Result<(), RemoteError>> {
        Box::pin(async move {
            let filter = format!("eq.{}", pnu.as_str());
            let resp = self
                .client
                .delete(self.table_url())
                .query(&[("pnu", filter.as_str())])
                .send()
                .await?;
            check(resp).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{SupabaseConfig, SupabaseStore};

    #[test]
    fn table_url_tolerates_trailing_slash() {
        let store =
            SupabaseStore::new(SupabaseConfig::new("https://example.supabase.co/", "anon")).unwrap();
        assert_eq!(store.table_url(), "https://example.supabase.co/rest/v1/parcels");
    }

    #[test]
    fn config_defaults_table_name() {
        let cfg: SupabaseConfig =
            serde_json::from_str(r#"{"url": "https://x", "anon_key": "k"}"#).unwrap();
        assert_eq!(cfg.table, "parcels");
    }

    #[test]
    fn rejects_unprintable_key() {
        assert!(SupabaseStore::new(SupabaseConfig::new("https://x", "bad\nkey")).is_err());
    }
}
