// HTTP endpoint that takes JPEG frames from ESP32 cameras and commits them
// to a GitHub repository, keeping a per-device manifest next to them.
//
// Could be better:
// * manifest commits that lose a race are dropped, not retried
// * two frames from one camera in the same second collide
#[macro_use]
extern crate log;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use serde::Serialize;
use std::sync::Arc;

mod config;
mod error;
mod github;
mod index;
mod store;
mod upload;

use config::{Args, Config, USAGE};
use error::UploadError;
use github::GitHubStore;
use index::IndexManager;
use upload::Uploader;

const DEVICE_HEADER: &str = "X-ESP-ID";

struct AppState {
    uploader: Uploader,
    /// `owner/name`, echoed back to the cameras
    repo: String,
    /// unix seconds, `None` when the system clock can't be read
    clock: fn() -> Option<u64>,
}

type HandlerState = web::Data<AppState>;

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    esp_id: String,
    filename: String,
    image_path: String,
    repo: String,
}

fn unix_now() -> Option<u64> {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => Some(d.as_secs()),
        Err(e) => {
            warn!("system clock is before the unix epoch: {}", e);
            None
        }
    }
}

async fn health(state: HandlerState) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain")
        .body(format!("ESP32-CAM Image Upload Server ({}) is running", state.repo))
}

async fn upload_image(
    state: HandlerState,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, UploadError> {
    let header = match req.headers().get(DEVICE_HEADER) {
        Some(value) => Some(std::str::from_utf8(value.as_bytes()).map_err(|_| {
            UploadError::Validation(format!("{} is not valid UTF-8", DEVICE_HEADER))
        })?),
        None => None,
    };
    let device_id = upload::device_id(header)?;
    let timestamp = (state.clock)().ok_or(UploadError::Clock)?;

    let receipt = state
        .uploader
        .upload(&device_id, &body, timestamp)
        .await?;

    Ok(HttpResponse::Ok().json(UploadResponse {
        status: "ok",
        esp_id: receipt.device_id,
        filename: receipt.filename,
        image_path: receipt.image_path,
        repo: state.repo.clone(),
    }))
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(health))
        .route("/upload", web::post().to(upload_image));
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = docopt::Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let config = Config::resolve(&args, |k| std::env::var(k).ok()).map_err(|e| {
        error!("{}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    info!(
        "storing into {} via {} under {}/, manifest {}",
        config.remote.repo(),
        config.remote.api_base,
        config.images_root,
        config.index_path.as_deref().unwrap_or("disabled"),
    );

    let store: Arc<dyn store::ObjectStore> = Arc::new(GitHubStore::new(&config.remote).map_err(|e| {
        error!("{}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?);
    let index = config
        .index_path
        .as_deref()
        .map(|path| IndexManager::new(store.clone(), path));

    let state = web::Data::new(AppState {
        uploader: Uploader::new(store, index, &config.images_root),
        repo: config.remote.repo(),
        clock: unix_now,
    });
    let max_body = config.max_body;

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(max_body))
            .configure(routes)
    })
    .bind((config.bind.as_str(), config.port))?
    .run()
    .await
}
