use axum::extract::FromRequest;

use crate::error::AppError;

/// `Json` body extractor whose rejections (syntax errors, missing fields,
/// wrong content type) are reported as `validation_error` bodies.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);
