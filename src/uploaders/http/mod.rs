use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use crate::config::{Config, Routes};
use crate::core::{
    AccountSuggester,
    CsvUploader,
    ProgressSender,
    ProgressSnapshot,
    RawFile,
    Result,
    Suggestions,
    UploadError,
    UploadRequest,
    UploadResponse,
};
use super::progress_stream::{chunk_stream, ProgressStream};

/// 后台 REST 接口客户端：账户匹配、CSV 上传、处理进度
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    endpoint: Url,
    token: Option<String>,
    routes: Routes,
}

impl HttpBackend {
    pub fn new(client: Client, endpoint: &str, token: Option<String>, routes: Routes) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;

        Ok(Self {
            client,
            endpoint,
            token,
            routes,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Self::new(client, &config.endpoint, config.token.clone(), config.routes.clone())
    }

    pub fn url(&self, route: &str) -> Result<Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let route = route.trim_start_matches('/');

        Ok(Url::parse(&format!("{}/{}", base, route))?)
    }

    /// 进度查询地址，upload_id 作为单独的路径段转义
    pub fn progress_url(&self, upload_id: &str) -> Result<Url> {
        let mut url = self.url(&self.routes.progress)?;
        url.path_segments_mut()
            .map_err(|_| UploadError::Config(format!("Endpoint cannot be a base url: {}", self.endpoint)))?
            .pop_if_empty()
            .push(upload_id);

        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn file_part(file: &RawFile, progress: Option<ProgressSender>) -> Result<Part> {
        let body = match progress {
            Some(progress_tx) => Body::wrap_stream(ProgressStream::new(
                chunk_stream(file.data.clone()),
                file.size(),
                progress_tx,
            )),
            None => Body::from(file.data.clone()),
        };

        let content_type = file.content_type.as_deref().unwrap_or("text/csv");
        let part = Part::stream_with_length(body, file.size())
            .file_name(file.name.clone())
            .mime_str(content_type)?;

        Ok(part)
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// 从错误响应体中提取可读的信息
pub fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();

    let field = parsed.as_ref().and_then(|value| {
        value
            .get("detail")
            .or_else(|| value.get("message"))
            .or_else(|| value.get("error"))
    });

    match field {
        Some(serde_json::Value::String(message)) => message.clone(),
        Some(other) => other.to_string(),
        None if body.trim().is_empty() => "Empty response".to_string(),
        None => body.trim().to_string(),
    }
}

async fn server_error(response: Response) -> UploadError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    UploadError::server_error(status, error_message(&body))
}

#[async_trait]
impl AccountSuggester for HttpBackend {
    async fn suggest_accounts(&self, file: &RawFile) -> Result<Suggestions> {
        let url = self.url(&self.routes.suggest)?;
        let form = Form::new().part("file", Self::file_part(file, None)?);

        debug!(url = %url, file = %file.name, "requesting account suggestions");
        let response = self
            .authorize(self.client.post(url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        Self::read_json(response).await
    }
}

#[async_trait]
impl CsvUploader for HttpBackend {
    async fn upload(&self, request: UploadRequest, progress: ProgressSender) -> Result<UploadResponse> {
        let url = self.url(&self.routes.upload)?;
        let form = Form::new()
            .part("file", Self::file_part(&request.file, Some(progress))?)
            .text("account_id", request.account_id.to_string())
            .text("data_type", request.data_type.as_str());

        debug!(url = %url, file = %request.file.name, "uploading csv");
        let response = self
            .authorize(self.client.post(url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Self::read_json(response).await;
        }

        // 校验失败时服务端也可能返回 {success: false, message}
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<UploadResponse>(&body) {
            Ok(parsed) if !parsed.success && !parsed.message.is_empty() => Ok(parsed),
            _ => Err(UploadError::server_error(status.as_u16(), error_message(&body))),
        }
    }

    async fn upload_progress(&self, upload_id: &str) -> Result<ProgressSnapshot> {
        let url = self.progress_url(upload_id)?;

        let response = self.authorize(self.client.get(url)).send().await?;
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        Self::read_json(response).await
    }
}
