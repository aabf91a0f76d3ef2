//! Multipart parsing for image uploads.

use axum::{
    extract::{Multipart, multipart::MultipartError},
    http::StatusCode,
};

use crate::error::ServiceError;

/// Name of the form field carrying the image.
pub const FILE_FIELD: &str = "file";

/// A file uploaded via the multipart form.
#[derive(Debug, Clone)]
pub struct FileField {
    pub data: Vec<u8>,
    /// Content-Type declared on the part, if any.
    pub content_type: Option<String>,
    /// Original filename declared on the part, if any.
    pub file_name: Option<String>,
}

/// Read the `file` part of an upload form, ignoring any other part.
///
/// Reading stops as soon as the part grows past `max_file_size`.
pub async fn read_file_field(
    multipart: &mut Multipart,
    max_file_size: usize,
) -> Result<FileField, ServiceError> {
    let mut file = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        if file.is_some() {
            return Err(ServiceError::InvalidInput(
                "only one file may be uploaded per request".into(),
            ));
        }

        let content_type = field.content_type().map(str::to_owned);
        let file_name = field.file_name().map(str::to_owned);

        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if data.len() + chunk.len() > max_file_size {
                return Err(ServiceError::PayloadTooLarge(format!(
                    "file exceeds the {max_file_size} byte limit"
                )));
            }
            data.extend_from_slice(&chunk);
        }

        file = Some(FileField {
            data,
            content_type,
            file_name,
        });
    }

    file.ok_or_else(|| {
        ServiceError::InvalidInput(format!(
            "no file provided; use the '{FILE_FIELD}' field of a multipart form"
        ))
    })
}

fn multipart_error(err: MultipartError) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge(err.body_text())
    } else {
        ServiceError::InvalidInput(format!("failed to parse multipart: {}", err.body_text()))
    }
}
