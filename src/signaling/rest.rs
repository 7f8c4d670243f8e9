use async_trait::async_trait;
use reqwest::{Client, Method, Response, Url};
use serde_json::Value;
use tracing::debug;

use crate::error::SignalingError;
use crate::pairing::PairingCode;
use crate::signaling::SignalingStore;
use crate::utils::now_millis;

/// REST-хранилище в стиле Firebase Realtime Database: `{base}/{code}{/path}.json`.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base: Url,
}

impl RestStore {
    pub fn new(base_url: &str) -> Result<Self, SignalingError> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| SignalingError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(SignalingError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            client: Client::new(),
            base,
        })
    }

    /// Адрес узла с `?ts=` против кэширования на стороне CDN
    pub fn url(&self, code: &PairingCode, path: Option<&str>) -> Result<Url, SignalingError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SignalingError::InvalidUrl(self.base.to_string()))?;
            segments.pop_if_empty();
            let mut parts: Vec<&str> = vec![code.as_str()];
            parts.extend(path.into_iter().flat_map(|p| p.split('/')).filter(|p| !p.is_empty()));
            let last = parts.pop().unwrap_or_default();
            segments.extend(parts);
            segments.push(&format!("{last}.json"));
        }
        url.query_pairs_mut()
            .append_pair("ts", &now_millis().to_string());
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        label: &'static str,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response, SignalingError> {
        debug!(%url, "{label}");
        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(SignalingError::Status {
                method: label,
                status: resp.status().as_u16(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl SignalingStore for RestStore {
    async fn put(&self, code: &PairingCode, value: Value) -> Result<(), SignalingError> {
        let url = self.url(code, None)?;
        self.send(Method::PUT, "PUT", url, Some(&value)).await?;
        Ok(())
    }

    async fn patch(&self, code: &PairingCode, value: Value) -> Result<(), SignalingError> {
        let url = self.url(code, None)?;
        self.send(Method::PATCH, "PATCH", url, Some(&value)).await?;
        Ok(())
    }

    async fn get(
        &self,
        code: &PairingCode,
        path: Option<&str>,
    ) -> Result<Option<Value>, SignalingError> {
        let url = self.url(code, path)?;
        let resp = self.send(Method::GET, "GET", url, None).await?;
        // отсутствующий узел приходит как `null`
        match resp.json::<Value>().await? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    async fn delete(&self, code: &PairingCode) -> Result<(), SignalingError> {
        let url = self.url(code, None)?;
        self.send(Method::DELETE, "DELETE", url, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_the_rtdb_layout() {
        let store = RestStore::new("https://demo.firebasedatabase.app/signals/").unwrap();
        let code = PairingCode::parse("abcd2345").unwrap();

        let url = store.url(&code, None).unwrap();
        assert_eq!(url.path(), "/signals/ABCD2345.json");
        assert!(url.query().unwrap().starts_with("ts="));

        let url = store.url(&code, Some("answer")).unwrap();
        assert_eq!(url.path(), "/signals/ABCD2345/answer.json");
    }

    #[test]
    fn bad_base_is_rejected() {
        assert!(matches!(
            RestStore::new("not a url"),
            Err(SignalingError::InvalidUrl(_))
        ));
        assert!(matches!(
            RestStore::new("mailto:someone@example.com"),
            Err(SignalingError::InvalidUrl(_))
        ));
    }
}
