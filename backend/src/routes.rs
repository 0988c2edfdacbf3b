use std::path::{Path, PathBuf};
use std::time::Duration;

use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::error::InternalError;
use actix_web::http::header;
use actix_web::{HttpResponse, web};
use futures::TryStreamExt;
use log::{error, info, warn};
use serde::Deserialize;
use shared::{
    ErrorResponse, MessageResponse, PredictionMode, PredictionResponse, ProcessImageResponse,
    ThresholdRequest, ThresholdResponse,
};

use crate::imaging::filters::DEFAULT_THRESHOLD;
use crate::inference::InferencePipeline;
use crate::pipeline::{self, Cancellation, ErrorKind, PipelineError};
use crate::storage::ArtifactStore;

/// Per-process HTTP settings shared by all handlers.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub uploads_dir: PathBuf,
    pub public_prefix: String,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl ServiceSettings {
    fn public_path(&self, relative: &str) -> String {
        format!("{}/{}", self.public_prefix.trim_end_matches('/'), relative)
    }
}

#[derive(Debug, Deserialize)]
struct PredictQuery {
    mode: Option<PredictionMode>,
}

#[derive(Debug, Deserialize)]
struct FilterQuery {
    filter_type: Option<String>,
    threshold: Option<i64>,
}

struct UploadedFile {
    filename: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, artifact_root: PathBuf, public_prefix: String) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        let response = rejected_body(&err);
        InternalError::from_response(err, response).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        let response = rejected_body(&err);
        InternalError::from_response(err, response).into()
    }))
    .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/process-image").route(web::post().to(process_image)))
        .service(web::resource("/apply-threshold").route(web::post().to(apply_threshold)))
        .service(web::resource("/apply-filter").route(web::post().to(apply_filter)))
        .service(web::resource("/upload").route(web::post().to(upload)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(Files::new(&public_prefix, artifact_root));
}

async fn predict(
    inference: web::Data<InferencePipeline>,
    settings: web::Data<ServiceSettings>,
    query: web::Query<PredictQuery>,
    payload: Multipart,
) -> HttpResponse {
    let mode = query.mode.unwrap_or_default();
    let file = match read_file_field(payload, settings.max_upload_bytes).await {
        Ok(file) => file,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = selected_filename(&file) {
        return error_response(&e);
    }

    let inference = inference.clone();
    let result = run_blocking(settings.request_timeout, Cancellation::new(), move || {
        pipeline::predict_upload(&inference, &file.bytes, file.content_type.as_deref(), mode)
    })
    .await;

    match result {
        Ok(predictions) => HttpResponse::Ok().json(PredictionResponse { predictions }),
        Err(e) => error_response(&e),
    }
}

async fn process_image(
    store: web::Data<ArtifactStore>,
    settings: web::Data<ServiceSettings>,
    payload: Multipart,
) -> HttpResponse {
    let file = match read_file_field(payload, settings.max_upload_bytes).await {
        Ok(file) => file,
        Err(e) => return error_response(&e),
    };
    let filename = match selected_filename(&file) {
        Ok(filename) => filename,
        Err(e) => return error_response(&e),
    };

    let store = store.clone();
    let cancel = Cancellation::new();
    let job_cancel = cancel.clone();
    let result = run_blocking(settings.request_timeout, cancel, move || {
        pipeline::process_image(
            &store,
            &file.bytes,
            file.content_type.as_deref(),
            &filename,
            &job_cancel,
        )
    })
    .await;

    match result {
        Ok(processed) => {
            let paths = processed
                .paths
                .into_iter()
                .map(|(variant, rel)| (variant, settings.public_path(&rel)))
                .collect();
            HttpResponse::Ok().json(ProcessImageResponse {
                message: "Image processed successfully".to_string(),
                paths,
                folder: processed.folder,
            })
        }
        Err(e) => error_response(&e),
    }
}

async fn apply_threshold(
    store: web::Data<ArtifactStore>,
    settings: web::Data<ServiceSettings>,
    request: web::Json<ThresholdRequest>,
) -> HttpResponse {
    let ThresholdRequest { folder, threshold } = request.into_inner();
    let cutoff = match pipeline::parse_cutoff(threshold) {
        Ok(cutoff) => cutoff,
        Err(e) => return error_response(&e),
    };

    let store = store.clone();
    let result = run_blocking(settings.request_timeout, Cancellation::new(), move || {
        pipeline::rethreshold(&store, &folder, cutoff)
    })
    .await;

    match result {
        Ok(rel) => HttpResponse::Ok().json(ThresholdResponse {
            path: settings.public_path(&rel),
            threshold: cutoff,
        }),
        Err(e) => error_response(&e),
    }
}

async fn apply_filter(
    settings: web::Data<ServiceSettings>,
    query: web::Query<FilterQuery>,
    payload: Multipart,
) -> HttpResponse {
    let FilterQuery {
        filter_type,
        threshold,
    } = query.into_inner();
    let filter_type = filter_type.unwrap_or_else(|| "original".to_string());
    let cutoff = match threshold.map(pipeline::parse_cutoff).transpose() {
        Ok(cutoff) => cutoff.unwrap_or(DEFAULT_THRESHOLD),
        Err(e) => return error_response(&e),
    };
    let file = match read_file_field(payload, settings.max_upload_bytes).await {
        Ok(file) => file,
        Err(e) => return error_response(&e),
    };

    let result = run_blocking(settings.request_timeout, Cancellation::new(), move || {
        pipeline::apply_filter(&file.bytes, file.content_type.as_deref(), &filter_type, cutoff)
    })
    .await;

    match result {
        Ok(png) => HttpResponse::Ok()
            .content_type("image/png")
            .insert_header((header::CACHE_CONTROL, "no-cache"))
            .body(png),
        Err(e) => error_response(&e),
    }
}

async fn upload(settings: web::Data<ServiceSettings>, payload: Multipart) -> HttpResponse {
    let file = match read_file_field(payload, settings.max_upload_bytes).await {
        Ok(file) => file,
        Err(e) => return error_response(&e),
    };
    let name = match selected_filename(&file).map(|raw| safe_basename(&raw)) {
        Ok(Some(name)) => name,
        Ok(None) => {
            return error_response(&PipelineError::InvalidInput("Invalid file name".into()));
        }
        Err(e) => return error_response(&e),
    };

    let uploads_dir = settings.uploads_dir.clone();
    let target_name = name.clone();
    let result = run_blocking(settings.request_timeout, Cancellation::new(), move || {
        std::fs::create_dir_all(&uploads_dir)
            .and_then(|_| std::fs::write(uploads_dir.join(&target_name), &file.bytes))
            .map_err(|e| PipelineError::Worker(format!("Failed to store upload: {}", e)))
    })
    .await;

    match result {
        Ok(()) => {
            info!("Stored upload {}", name);
            HttpResponse::Ok().json(MessageResponse {
                message: format!("File {} uploaded successfully", name),
            })
        }
        Err(e) => error_response(&e),
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Reads the multipart field named `file`, skipping any others.
async fn read_file_field(
    mut payload: Multipart,
    max_bytes: usize,
) -> Result<UploadedFile, PipelineError> {
    let malformed = |e: actix_multipart::MultipartError| {
        PipelineError::InvalidInput(format!("Malformed multipart body: {}", e))
    };

    while let Some(mut field) = payload.try_next().await.map_err(malformed)? {
        if field.name() != Some("file") {
            while field.try_next().await.map_err(malformed)?.is_some() {}
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);
        let content_type = field.content_type().map(|mime| mime.to_string());
        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(malformed)? {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(PipelineError::InvalidInput(format!(
                    "File too large (limit {} bytes)",
                    max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(UploadedFile {
            filename,
            content_type,
            bytes,
        });
    }
    Err(PipelineError::InvalidInput("No file uploaded".into()))
}

/// Runs CPU-bound work on the blocking pool under the request deadline. On
/// expiry the job is told to stop through `cancel`; if it committed first, its
/// result is awaited instead.
async fn run_blocking<T, F>(
    deadline: Duration,
    cancel: Cancellation,
    work: F,
) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    let mut job = std::pin::pin!(web::block(work));
    let outcome = match tokio::time::timeout(deadline, job.as_mut()).await {
        Ok(outcome) => outcome,
        Err(_) if cancel.cancel() => return Err(PipelineError::Timeout(deadline)),
        Err(_) => job.await,
    };
    outcome.map_err(|e| PipelineError::Worker(e.to_string()))?
}

/// The client-supplied file name; absent and empty names are both rejected.
fn selected_filename(file: &UploadedFile) -> Result<String, PipelineError> {
    file.filename
        .clone()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| PipelineError::InvalidInput("No selected file".into()))
}

fn safe_basename(raw: &str) -> Option<String> {
    let name = Path::new(raw).file_name()?.to_str()?;
    (!name.is_empty() && !name.starts_with('.')).then(|| name.to_string())
}

/// 400 body for requests an extractor refused before any handler ran.
fn rejected_body(err: &impl std::fmt::Display) -> HttpResponse {
    warn!("Rejected request: {}", err);
    HttpResponse::BadRequest().json(ErrorResponse {
        error: err.to_string(),
    })
}

fn error_response(err: &PipelineError) -> HttpResponse {
    let body = ErrorResponse {
        error: err.to_string(),
    };
    match err.kind() {
        ErrorKind::InvalidInput => {
            warn!("Rejected request: {}", err);
            HttpResponse::BadRequest().json(body)
        }
        ErrorKind::NotFound => {
            warn!("Not found: {}", err);
            HttpResponse::NotFound().json(body)
        }
        ErrorKind::Internal => {
            error!("Request failed: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}
