//! Client for the GeoServer importer REST API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use geonode_core::GeoServerConfig;

use crate::sessions::{ImportSessionClient, ImportSessionState};

#[derive(Debug, Deserialize)]
struct ImportEnvelope {
    import: ImportBody,
}

#[derive(Debug, Deserialize)]
struct ImportBody {
    state: String,
}

fn parse_import_state(body: &str) -> anyhow::Result<ImportSessionState> {
    let envelope: ImportEnvelope = serde_json::from_str(body)?;
    ImportSessionState::parse(&envelope.import.state)
        .ok_or_else(|| anyhow::anyhow!("Unknown import state: {}", envelope.import.state))
}

pub struct GeoServerImporterClient {
    client: reqwest::Client,
    config: GeoServerConfig,
}

impl GeoServerImporterClient {
    pub fn new(config: GeoServerConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn import_url(&self, import_id: i64) -> String {
        format!(
            "{}/rest/imports/{}",
            self.config.url.trim_end_matches('/'),
            import_id
        )
    }
}

#[async_trait]
impl ImportSessionClient for GeoServerImporterClient {
    async fn session_state(&self, import_id: i64) -> anyhow::Result<Option<ImportSessionState>> {
        let response = self
            .client
            .get(self.import_url(import_id))
            .basic_auth(&self.config.user, Some(&self.config.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.text().await?;
                parse_import_state(&body).map(Some)
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                tracing::error!(import_id, status = %status, body = %text, "Importer request failed");
                Err(anyhow::anyhow!("GeoServer importer returned {}", status))
            }
        }
    }

    async fn delete_session(&self, import_id: i64) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.import_url(import_id))
            .basic_auth(&self.config.user, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            tracing::debug!(import_id, "Importer session deleted");
            return Ok(());
        }
        Err(anyhow::anyhow!(
            "GeoServer importer refused to delete import {}: {}",
            import_id,
            status
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_import_payload() {
        let body = r#"{"import": {"id": 7, "href": "http://gs/rest/imports/7", "state": "COMPLETE", "archive": false}}"#;
        assert_eq!(parse_import_state(body).unwrap(), ImportSessionState::Complete);
        assert!(parse_import_state(r#"{"import": {"state": "WHATEVER"}}"#).is_err());
        assert!(parse_import_state("<html/>").is_err());
    }

    #[test]
    fn builds_import_urls() {
        let client = GeoServerImporterClient::new(GeoServerConfig {
            url: "http://localhost:8080/geoserver/".to_string(),
            user: "admin".to_string(),
            password: "geoserver".to_string(),
        });
        assert_eq!(
            client.import_url(42),
            "http://localhost:8080/geoserver/rest/imports/42"
        );
    }
}
