use async_trait::async_trait;
use reqwest::{header::HeaderMap, header::HeaderValue, Client, StatusCode};
use url::Url;

use common::cloud::{CloudBackupRecord, RemoteError, RemoteShareStore};

/// Remote share store speaking plain JSON over HTTP
///
/// One document per `(user, tenant)` at
/// `{base}/key_escrow/{user}/shares/{tenant}`.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    pub remote: Url,
    client: Client,
}

impl HttpRemoteStore {
    pub fn new(remote: &Url) -> Result<Self, reqwest::Error> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder().default_headers(default_headers).build()?;

        Ok(Self {
            remote: remote.clone(),
            client,
        })
    }

    fn endpoint(&self, user_id: &str, tenant_id: &str) -> Result<Url, RemoteError> {
        let mut url = self.remote.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Rejected(format!("{} cannot be a base url", self.remote)))?
            .pop_if_empty()
            .extend(["key_escrow", user_id, "shares", tenant_id]);
        Ok(url)
    }
}

/// 5xx and 429 are worth retrying, any other failure status is final
fn classify(status: StatusCode, body: String) -> RemoteError {
    let message = format!("HTTP status {}: {}", status, body);
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RemoteError::Unreachable(message)
    } else {
        RemoteError::Rejected(message)
    }
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Unreachable(e.to_string())
}

#[async_trait]
impl RemoteShareStore for HttpRemoteStore {
    async fn put(
        &self,
        user_id: &str,
        tenant_id: &str,
        record: &CloudBackupRecord,
    ) -> Result<(), RemoteError> {
        let url = self.endpoint(user_id, tenant_id)?;
        let response = self
            .client
            .put(url)
            .json(record)
            .send()
            .await
            .map_err(transport)?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            Err(classify(status, response.text().await.unwrap_or_default()))
        }
    }

    async fn get(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Option<CloudBackupRecord>, RemoteError> {
        let url = self.endpoint(user_id, tenant_id)?;
        let response = self.client.get(url).send().await.map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let record = response
                    .json::<CloudBackupRecord>()
                    .await
                    .map_err(|e| RemoteError::Default(anyhow::anyhow!("bad backup record: {}", e)))?;
                Ok(Some(record))
            }
            status => Err(classify(status, response.text().await.unwrap_or_default())),
        }
    }

    async fn delete(&self, user_id: &str, tenant_id: &str) -> Result<bool, RemoteError> {
        let url = self.endpoint(user_id, tenant_id)?;
        let response = self.client.delete(url).send().await.map_err(transport)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(classify(status, response.text().await.unwrap_or_default())),
        }
    }
}
