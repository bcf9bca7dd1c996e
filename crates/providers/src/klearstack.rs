use super::{OcrProvider, ProviderError, TokenStage};
use async_trait::async_trait;
use invproc_core::models::TokenPair;
use invproc_core::parsing::{extract_batch_id, parse_lenient_json};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Account and endpoint settings for the KlearStack extraction API.
#[derive(Clone)]
pub struct KlearstackConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub company_id: String,
    pub document_type: String,
    pub preference: String,
}

#[derive(Clone)]
pub struct KlearstackClient {
    config: KlearstackConfig,
    http_client: reqwest::Client,
}

impl KlearstackClient {
    pub fn new(config: KlearstackConfig) -> Result<Arc<Self>, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(15))
            .build()?;

        Ok(Arc::new(Self {
            config,
            http_client,
        }))
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn account_form(&self, form: Form) -> Form {
        form.text("username", self.config.username.clone())
            .text("company_id", self.config.company_id.clone())
    }

    async fn read_token_pair(
        resp: reqwest::Response,
        stage: TokenStage,
    ) -> Result<TokenPair, ProviderError> {
        let status = resp.status();
        let body = resp.text().await.map_err(|e| ProviderError::TokenAcquisition {
            stage,
            status: Some(status.as_u16()),
            message: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            return Err(ProviderError::TokenAcquisition {
                stage,
                status: Some(status.as_u16()),
                message: body,
            });
        }

        parse_lenient_json(&body)
            .ok()
            .and_then(|v| serde_json::from_value::<TokenPair>(v).ok())
            .filter(|t| !t.access_token.is_empty() && !t.refresh_token.is_empty())
            .ok_or_else(|| ProviderError::TokenAcquisition {
                stage,
                status: Some(status.as_u16()),
                message: format!("response lacks access_token/refresh_token: {body}"),
            })
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl OcrProvider for KlearstackClient {
    async fn issue_token(&self) -> Result<TokenPair, ProviderError> {
        let params = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
            ("company_id", self.config.company_id.as_str()),
        ];

        let resp = self
            .http_client
            .post(self.url("get_token"))
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::TokenAcquisition {
                stage: TokenStage::Issue,
                status: None,
                message: e.to_string(),
            })?;

        Self::read_token_pair(resp, TokenStage::Issue).await
    }

    async fn refresh_token(&self, issued: &TokenPair) -> Result<TokenPair, ProviderError> {
        let params = [("refresh_token", issued.refresh_token.as_str())];

        let resp = self
            .http_client
            .post(self.url("refresh_token"))
            .header("Authorization", issued.bearer())
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::TokenAcquisition {
                stage: TokenStage::Refresh,
                status: None,
                message: e.to_string(),
            })?;

        Self::read_token_pair(resp, TokenStage::Refresh).await
    }

    async fn process_document(
        &self,
        token: &TokenPair,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ProviderError> {
        let file_part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_for(file_name))?;

        let form = self
            .account_form(Form::new())
            .part("files", file_part)
            .text("document_type", self.config.document_type.clone())
            .text("preference", self.config.preference.clone());

        let resp = self
            .http_client
            .post(self.url("document_processing"))
            .header("Authorization", token.bearer())
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::Upload {
                status: status.as_u16(),
                body,
            });
        }

        let batch_id = parse_lenient_json(&body)
            .ok()
            .as_ref()
            .and_then(extract_batch_id)
            .ok_or(ProviderError::MissingBatchId { body })?;

        tracing::info!(%batch_id, %file_name, "Document accepted by KlearStack");
        Ok(batch_id)
    }

    async fn batch_status(
        &self,
        token: &TokenPair,
        batch_id: &str,
    ) -> Result<Value, ProviderError> {
        let form = self
            .account_form(Form::new())
            .text("batch_id", batch_id.to_string());

        let resp = self
            .http_client
            .post(self.url("batch_status"))
            .header("Authorization", token.bearer())
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::StatusCheck {
                status: status.as_u16(),
                body,
            });
        }

        parse_lenient_json(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> Arc<KlearstackClient> {
        KlearstackClient::new(KlearstackConfig {
            base_url: server.uri(),
            username: "acct".into(),
            password: "pw".into(),
            company_id: "c-1".into(),
            document_type: "invoice".into(),
            preference: "accuracy".into(),
        })
        .unwrap()
    }

    fn issued() -> TokenPair {
        TokenPair {
            access_token: "a1".into(),
            refresh_token: "r1".into(),
        }
    }

    #[tokio::test]
    async fn issue_token_posts_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_token"))
            .and(body_string_contains("username=acct"))
            .and(body_string_contains("password=pw"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "a1", "refresh_token": "r1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = client_for(&server).issue_token().await.unwrap();
        assert_eq!(token, issued());
    }

    #[tokio::test]
    async fn refresh_uses_issued_token_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/refresh_token"))
            .and(header("Authorization", "Bearer a1"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "a2", "refresh_token": "r2"})),
            )
            .mount(&server)
            .await;

        let token = client_for(&server).refresh_token(&issued()).await.unwrap();
        assert_eq!(token.access_token, "a2");
    }

    #[tokio::test]
    async fn token_without_refresh_field_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "a1"})))
            .mount(&server)
            .await;

        let err = client_for(&server).issue_token().await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::TokenAcquisition {
                stage: TokenStage::Issue,
                status: Some(200),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn token_http_failure_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/get_token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = client_for(&server).issue_token().await.unwrap_err();
        assert_eq!(err.provider_status(), Some(401));
    }

    #[tokio::test]
    async fn process_document_reads_noisy_batch_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/document_processing"))
            .and(header("Authorization", "Bearer a1"))
            .and(body_string_contains("name=\"document_type\""))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("warn: slow disk\n{\"OCR_ref_no\":\"B-77\"}"),
            )
            .mount(&server)
            .await;

        let batch = client_for(&server)
            .process_document(&issued(), "inv.pdf", b"%PDF-1.4".to_vec())
            .await
            .unwrap();
        assert_eq!(batch, "B-77");
    }

    #[tokio::test]
    async fn process_document_without_batch_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/document_processing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "queued"})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .process_document(&issued(), "inv.pdf", vec![1, 2, 3])
            .await
            .unwrap_err();
        match err {
            ProviderError::MissingBatchId { body } => assert!(body.contains("queued")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn process_document_passes_provider_status_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/document_processing"))
            .respond_with(ResponseTemplate::new(413).set_body_string("file too large"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .process_document(&issued(), "inv.pdf", vec![0; 16])
            .await
            .unwrap_err();
        assert_eq!(err.provider_status(), Some(413));
        assert_eq!(err.provider_body(), Some("file too large"));
    }

    #[tokio::test]
    async fn batch_status_returns_parsed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/batch_status"))
            .and(body_string_contains("B-77"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"status": "Completed", "data": {"total": 10}})),
            )
            .mount(&server)
            .await;

        let body = client_for(&server)
            .batch_status(&issued(), "B-77")
            .await
            .unwrap();
        assert_eq!(body["data"]["total"], 10);
    }

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for("a.PDF"), "application/pdf");
        assert_eq!(mime_for("scan.jpeg"), "image/jpeg");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }
}
