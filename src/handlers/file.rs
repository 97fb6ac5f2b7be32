use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use chrono::Utc;
use futures::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::error::{ApiResponse, AppError, Result};
use crate::models::UploadResponse;
use crate::services::FileService;
use crate::AppState;

/// Upload a file
/// POST /api/upload
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<UploadResponse>>> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let stream = field.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        let mut reader = StreamReader::new(Box::pin(stream));

        let record = FileService::upload_file(
            &state.table,
            state.storage.as_ref(),
            &file_name,
            &mut reader,
            Utc::now(),
        )
        .await?;

        let download_url = format!(
            "{}/api/download/{}",
            state.config.server.public_url(),
            record.id
        );
        return Ok(Json(ApiResponse::success(UploadResponse {
            id: record.id,
            download_url,
        })));
    }

    Err(AppError::BadRequest("No file provided".to_string()))
}

/// Download a file
/// GET /api/download/:id
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let download =
        FileService::download_file(&state.table, state.storage.as_ref(), &id, Utc::now()).await?;

    let name = &download.record.original_name;
    let content_type = mime_guess::from_path(name).first_or_octet_stream();
    let fallback_name: String = name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded_name = urlencoding::encode(name);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, download.size)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from_stream(ReaderStream::new(download.file)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}
