mod config;
mod imaging;
mod inference;
mod pipeline;
mod routes;
mod storage;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use config::AppConfig;
use inference::InferencePipeline;
use inference::classifier::load_classifier;
use routes::{ServiceSettings, configure_routes};
use storage::ArtifactStore;

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, err);
    std::io::Error::other(format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load().map_err(|e| startup_error("Invalid configuration", e))?;

    // Refuse to serve anything without a working classifier.
    let classifier =
        load_classifier(&config.model).map_err(|e| startup_error("Model loading failed", e))?;
    log::info!("Model loaded successfully");
    let inference = InferencePipeline::new(classifier, &config.model);

    let store = ArtifactStore::new(&config.artifact_root)
        .map_err(|e| startup_error("Artifact directory unavailable", e))?;
    std::fs::create_dir_all(&config.uploads_dir)?;

    let settings = ServiceSettings {
        uploads_dir: config.uploads_dir.clone(),
        public_prefix: config.public_prefix.clone(),
        request_timeout: config.request_timeout(),
        max_upload_bytes: config.max_upload_bytes,
    };

    let bind_address = config.bind_address();
    let artifact_root = store.root().to_path_buf();
    let public_prefix = config.public_prefix.clone();
    log::info!(
        "Serving artifacts from {} at {}",
        artifact_root.display(),
        public_prefix
    );
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(inference.clone()))
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(settings.clone()))
            .configure(|cfg| configure_routes(cfg, artifact_root.clone(), public_prefix.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
