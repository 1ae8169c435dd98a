use std::sync::Arc;

use actix_web::http::header::{
    self, Charset, ContentDisposition, DispositionParam, DispositionType, ExtendedValue,
};
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use async_stream::stream;
use log::{info, warn};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::controller::{DeliveryError, OpenedDownload};
use crate::options::OptionsUpdate;
use crate::session::{CacheFile, SessionError};
use crate::state::AppState;
use crate::store::Session;

#[derive(Deserialize)]
pub struct UrlRequest {
    pub url: String,
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/sessions").route(web::post().to(create_session)))
        .service(
            web::resource("/sessions/{id}")
                .route(web::get().to(get_session))
                .route(web::delete().to(end_session)),
        )
        .service(web::resource("/sessions/{id}/url").route(web::put().to(set_url)))
        .service(web::resource("/sessions/{id}/options").route(web::put().to(set_options)))
        .service(web::resource("/sessions/{id}/extract").route(web::post().to(extract)))
        .service(web::resource("/sessions/{id}/download").route(web::get().to(download)));
}

fn error_json(status: StatusCode, message: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::build(status)
        .append_header((header::CACHE_CONTROL, "no-store"))
        .json(serde_json::json!({
            "error": message.to_string()
        }))
}

fn session_error(e: &SessionError) -> HttpResponse {
    let status = match e {
        SessionError::Busy | SessionError::InvalidTransition { .. } => StatusCode::CONFLICT,
        SessionError::OptionsIncomplete => StatusCode::BAD_REQUEST,
        SessionError::AtCapacity(_) => StatusCode::TOO_MANY_REQUESTS,
        SessionError::Ended => StatusCode::GONE,
    };
    error_json(status, e)
}

fn view_json(view: impl serde::Serialize) -> HttpResponse {
    HttpResponse::Ok()
        .append_header((header::CACHE_CONTROL, "no-store"))
        .json(view)
}

async fn lookup(state: &AppState, id: Uuid) -> Result<Arc<Session>, HttpResponse> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| error_json(StatusCode::NOT_FOUND, format!("Unknown session: {}", id)))
}

/// `attachment` with an ASCII fallback name plus the exact UTF-8 name.
fn attachment(filename: &str) -> ContentDisposition {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![
            DispositionParam::Filename(fallback),
            DispositionParam::FilenameExt(ExtendedValue {
                charset: Charset::Ext("UTF-8".to_string()),
                language_tag: None,
                value: filename.as_bytes().to_vec(),
            }),
        ],
    }
}

pub async fn index() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "service": "SoundHarvest",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /": "Health check",
            "POST /sessions": "Start a session",
            "GET /sessions/{id}": "Current session state and control visibility",
            "DELETE /sessions/{id}": "End a session and drop its cached files",
            "PUT /sessions/{id}/url": "Enter or change the video URL (body: {url})",
            "PUT /sessions/{id}/options": "Select codec/quality/CBR (body: {codec, quality, constant_bitrate})",
            "POST /sessions/{id}/extract": "Extract the audio track",
            "GET /sessions/{id}/download": "Download the extracted file (deleted afterwards)"
        }
    }))
}

pub async fn create_session(state: web::Data<AppState>) -> impl Responder {
    let session = state.sessions.create().await;
    HttpResponse::Created()
        .append_header((header::CACHE_CONTROL, "no-store"))
        .json(serde_json::json!({
            "session_id": session.id(),
            "state": session.view().await,
        }))
}

pub async fn get_session(path: web::Path<Uuid>, state: web::Data<AppState>) -> impl Responder {
    match lookup(&state, path.into_inner()).await {
        Ok(session) => view_json(session.view().await),
        Err(resp) => resp,
    }
}

pub async fn end_session(path: web::Path<Uuid>, state: web::Data<AppState>) -> impl Responder {
    let id = path.into_inner();
    match state.sessions.end(id).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => error_json(StatusCode::NOT_FOUND, format!("Unknown session: {}", id)),
        Err(e) => session_error(&e),
    }
}

pub async fn set_url(
    path: web::Path<Uuid>,
    req: web::Json<UrlRequest>,
    state: web::Data<AppState>,
) -> impl Responder {
    let session = match lookup(&state, path.into_inner()).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.controller.enter_url(&session, &req.url).await {
        Ok(view) => view_json(view),
        Err(e) => session_error(&e),
    }
}

pub async fn set_options(
    path: web::Path<Uuid>,
    req: web::Json<OptionsUpdate>,
    state: web::Data<AppState>,
) -> impl Responder {
    let session = match lookup(&state, path.into_inner()).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.controller.select_options(&session, req.into_inner()).await {
        Ok(view) => view_json(view),
        Err(e) => session_error(&e),
    }
}

pub async fn extract(path: web::Path<Uuid>, state: web::Data<AppState>) -> impl Responder {
    let session = match lookup(&state, path.into_inner()).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match state.controller.extract(session).await {
        Ok(view) => view_json(view),
        Err(e) => session_error(&e),
    }
}

pub async fn download(path: web::Path<Uuid>, state: web::Data<AppState>) -> impl Responder {
    let session = match lookup(&state, path.into_inner()).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let OpenedDownload {
        mut file,
        len,
        filename,
        mime_type,
        guard,
    } = match state.controller.open_download(&session).await {
        Ok(d) => d,
        Err(DeliveryError::Session(e)) => return session_error(&e),
        Err(DeliveryError::Io(_)) => {
            return error_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                "The extracted file could not be delivered.",
            )
        }
    };

    // The guard rides inside the body so the file is deleted when the response ends,
    // whether it completed, failed mid-read, or the client went away.
    let session_id = session.id();
    let body = stream! {
        let _guard: CacheFile = guard;

        let mut buffer = vec![0u8; 64 * 1024];
        let mut sent: u64 = 0;
        loop {
            match file.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => {
                    sent += n as u64;
                    yield Ok(bytes::Bytes::copy_from_slice(&buffer[..n]));
                }
                Err(e) => {
                    warn!("[DOWNLOAD] {} read failed after {} bytes: {}", session_id, sent, e);
                    yield Err(e);
                    break;
                }
            }
        }
        info!("[DOWNLOAD] {} finished ({} bytes)", session_id, sent);
    };

    HttpResponse::Ok()
        .content_type(mime_type)
        .append_header((header::CONTENT_LENGTH, len.to_string()))
        .insert_header(attachment(&filename))
        .append_header((header::CACHE_CONTROL, "no-store"))
        .streaming(body)
}
