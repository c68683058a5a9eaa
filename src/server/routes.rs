use axum::{
    body::Body,
    extract::{FromRequest, Multipart, Request, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue,
    },
    response::Response,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{error::ApiError, AppState};
use crate::media::{select_format, ProxyJob, SelectionRequest};
use crate::wifi::{self, WifiError};

const QR_FIELD: &str = "qrImage";

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Serialize)]
pub struct WifiResponse {
    success: bool,
    network: String,
    password: String,
    security: String,
}

pub async fn scan_wifi(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<WifiResponse>, ApiError> {
    debug!("Processing QR upload");

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(QR_FIELD) {
            continue;
        }
        let content_type = field.content_type().map(|ct| ct.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
        upload = Some((content_type, data));
        break;
    }

    let (content_type, data) = upload.ok_or(WifiError::MissingImage)?;
    info!(
        "Received QR image: {} bytes, type {:?}",
        data.len(),
        content_type
    );

    let max_bytes = state.max_upload_bytes;
    let creds = tokio::task::spawn_blocking(move || {
        wifi::scan_upload(&data, content_type.as_deref(), max_bytes)
    })
    .await
    .map_err(|e| ApiError::internal("Error processing the image").with_details(e.to_string()))??;

    info!("WiFi credentials parsed for network {}", creds.ssid);
    Ok(Json(WifiResponse {
        success: true,
        network: creds.ssid,
        password: creds.password,
        security: creds.security,
    }))
}

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    #[serde(rename = "urlVideo")]
    url_video: String,
}

pub async fn video_info(
    State(state): State<AppState>,
    Json(request): Json<InfoRequest>,
) -> Result<Json<Value>, ApiError> {
    info!(
        "Fetching info for {} via {}",
        request.url_video,
        state.metadata.name()
    );
    let info = state.metadata.fetch_info(&request.url_video).await?;

    Ok(Json(json!({"success": true, "info": info.raw})))
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(rename = "urlVideo")]
    url_video: String,
    #[serde(default)]
    format: String,
    #[serde(rename = "audioFormat", default)]
    audio_format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    success: bool,
    #[serde(rename = "downloadUrl")]
    download_url: Option<String>,
    filename: String,
    filesize: Option<u64>,
    format: String,
    format_id: String,
    ext: String,
}

pub async fn resolve_download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, ApiError> {
    info!(
        "Resolving download for {} (format {:?}, audio {:?})",
        request.url_video, request.format, request.audio_format
    );

    let info = state.metadata.fetch_info(&request.url_video).await?;
    let selection_request = SelectionRequest::new(&request.format, request.audio_format);
    let selection = select_format(&info.formats, &info.title, &selection_request)?;
    let variant = selection.variant;

    info!(
        "Selected format {} for {:?}: {}",
        variant.format_id, selection_request.class, selection.filename
    );

    Ok(Json(DownloadResponse {
        success: true,
        download_url: variant.url.clone(),
        filename: selection.filename.clone(),
        filesize: variant.effective_size().map(|size| size as u64),
        format: variant.label().to_string(),
        format_id: variant.format_id.clone(),
        ext: selection.extension.clone(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProxyRequest {
    url: Option<String>,
    filename: Option<String>,
    #[serde(rename = "formatId")]
    format_id: Option<String>,
}

/// Browsers posting `FormData` send multipart; plain HTML forms send
/// urlencoded. Both carry the same text fields.
impl<S> FromRequest<S> for ProxyRequest
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Form(request) = Form::<ProxyRequest>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            return Ok(request);
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        let mut request = ProxyRequest::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
        {
            let slot = match field.name() {
                Some("url") => &mut request.url,
                Some("filename") => &mut request.filename,
                Some("formatId") => &mut request.format_id,
                _ => continue,
            };
            *slot = Some(
                field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid form field: {e}")))?,
            );
        }

        Ok(request)
    }
}

/// Quotes and control characters would break out of the header parameter.
fn header_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

pub async fn proxy_download(
    State(state): State<AppState>,
    request: ProxyRequest,
) -> Result<Response, ApiError> {
    let job = ProxyJob::new(request.url, request.filename, request.format_id)?;

    let disposition = format!("attachment; filename=\"{}\"", header_filename(&job.filename));
    let disposition = HeaderValue::from_bytes(disposition.as_bytes())
        .map_err(|e| ApiError::bad_request(format!("Invalid filename: {e}")))?;

    let stream = state.proxy.proxy_download(job).await?;

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(CONTENT_DISPOSITION, disposition);

    Ok(response)
}
