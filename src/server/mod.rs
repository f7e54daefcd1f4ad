use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{
    error::{ErrorBadRequest, ErrorConflict, ErrorInternalServerError, ErrorNotFound},
    http::header,
    middleware::Logger,
    web, App, HttpResponse, HttpServer,
};
use anyhow::{Context, Result};
use futures::stream;
use tokio::sync::{broadcast::error::RecvError, Mutex};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::job::run_job;
use crate::progress::ProgressLog;
use crate::records::InputTable;
use crate::tabular::{self, OutputFormat, OutputOptions};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    progress: ProgressLog,
    // One browser, one job.
    job_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(settings: Settings, progress: ProgressLog) -> Self {
        Self {
            settings: Arc::new(settings),
            progress,
            job_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// One SSE event; multi-line messages become several `data:` fields.
fn sse_frame(message: &str) -> String {
    let mut frame: String = message
        .lines()
        .map(|line| format!("data: {}\n", line))
        .collect();
    if frame.is_empty() {
        frame.push_str("data: \n");
    }
    frame.push('\n');
    frame
}

fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".csv") {
        "text/csv; charset=utf-8"
    } else if name.ends_with(".xlsx") {
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    } else {
        "application/octet-stream"
    }
}

async fn logs_handler(state: web::Data<AppState>) -> HttpResponse {
    let rx = state.progress.subscribe();

    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(line) => {
                    let frame = web::Bytes::from(sse_frame(&line));
                    return Some((Ok::<_, actix_web::Error>(frame), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Log subscriber lagged, {} lines dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(events)
}

/// Runs one upload to completion and returns the CSV path.
async fn execute_job(state: &AppState, table: InputTable) -> Result<PathBuf> {
    let output_dir = state.settings.output_dir.clone();
    match tabular::purge_previous_outputs(&output_dir) {
        Ok(removed) if removed > 0 => debug!("Removed {} previous result files", removed),
        Ok(_) => {}
        Err(e) => warn!("Failed to clean previous results: {:#}", e),
    }

    let options = OutputOptions {
        dir: output_dir,
        format: OutputFormat::Both,
        detailed: false,
    };
    let report = run_job(table, &state.settings, &options, &state.progress).await?;

    for path in report.artifacts.paths() {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            state
                .progress
                .info(format!("🔗 Link: /outputs/{}", urlencoding::encode(name)));
        }
    }

    report.artifacts.csv.context("CSV result missing")
}

async fn process_handler(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, actix_web::Error> {
    let Ok(running) = state.job_lock.clone().try_lock_owned() else {
        return Err(ErrorConflict("A job is already running"));
    };

    let table = match tabular::read_csv(body.as_ref()) {
        Ok(table) => table,
        Err(e) => {
            state.progress.error(e.to_string());
            return Err(ErrorBadRequest(e.to_string()));
        }
    };

    // Outlives the request if the client hangs up.
    let job_state = state.get_ref().clone();
    let job = tokio::spawn(async move {
        let _running = running;
        let result = execute_job(&job_state, table).await;
        if let Err(e) = &result {
            job_state.progress.error(format!("Internal error: {:#}", e));
        }
        result
    });

    let csv_path = match job.await {
        Ok(Ok(path)) => path,
        Ok(Err(_)) => return Err(ErrorInternalServerError("Internal error")),
        Err(e) => {
            state.progress.error(format!("Job aborted: {}", e));
            return Err(ErrorInternalServerError("Internal error"));
        }
    };
    state.progress.info("📥 Sending CSV for download...");

    let bytes = tokio::fs::read(&csv_path)
        .await
        .map_err(ErrorInternalServerError)?;

    Ok(HttpResponse::Ok()
        .content_type(content_type_for("resultados.csv"))
        .insert_header((
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"resultados.csv\"",
        ))
        .body(bytes))
}

async fn output_handler(
    state: web::Data<AppState>,
    name: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    let name = name.into_inner();
    if !is_safe_file_name(&name) {
        return Err(ErrorBadRequest("Invalid file name"));
    }

    let path = state.settings.output_dir.join(&name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(ErrorNotFound("File not found")),
        Err(e) => return Err(ErrorInternalServerError(e)),
    };

    Ok(HttpResponse::Ok()
        .content_type(content_type_for(&name))
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", name),
        ))
        .body(bytes))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
        .route("/logs", web::get().to(logs_handler))
        .route("/processar", web::post().to(process_handler))
        .route("/outputs/{name}", web::get().to(output_handler));
}

pub async fn run_server(addr: &str, settings: Settings) -> Result<()> {
    let state = AppState::new(settings, ProgressLog::new());

    info!("Starting CND service on {}", addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .configure(routes)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test as actix_test};

    fn state_in(dir: &std::path::Path) -> AppState {
        state_with_driver(dir, crate::config::DEFAULT_WEBDRIVER_URL.to_string())
    }

    fn state_with_driver(dir: &std::path::Path, webdriver_url: String) -> AppState {
        let settings = Settings {
            webdriver_url,
            output_dir: dir.to_path_buf(),
            scratch_dir: dir.join("pdfs"),
            ..Settings::default()
        };
        AppState::new(settings, ProgressLog::new())
    }

    #[test]
    fn test_sse_frame() {
        assert_eq!(sse_frame("🔍 Searching"), "data: 🔍 Searching\n\n");
        assert_eq!(sse_frame("a\nb"), "data: a\ndata: b\n\n");
        assert_eq!(sse_frame(""), "data: \n\n");
    }

    #[test]
    fn test_file_name_checks() {
        assert!(is_safe_file_name("resultados_1.csv"));
        assert!(!is_safe_file_name("../secret"));
        assert!(!is_safe_file_name("a/b.csv"));
        assert!(!is_safe_file_name(""));
    }

    #[actix_web::test]
    async fn test_empty_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let mut logs = state.progress.subscribe();
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/processar")
            .set_payload("")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(logs.try_recv().unwrap().starts_with("❌"));
    }

    #[actix_web::test]
    async fn test_upload_without_property_column_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state_in(dir.path())))
                .configure(routes),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/processar")
            .set_payload("nome\nACME\n")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_second_job_is_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        let lock = state.job_lock.clone();
        let _held = lock.lock().await;

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/processar")
            .set_payload("ncodimov\n123\n")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn test_outputs_are_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("resultados_1.csv"), "ncodimov,cpf/cnpj\n").unwrap();
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state_in(dir.path())))
                .configure(routes),
        )
        .await;

        let req = actix_test::TestRequest::get()
            .uri("/outputs/resultados_1.csv")
            .to_request();
        let body = actix_test::call_and_read_body(&app, req).await;
        assert_eq!(body, web::Bytes::from_static(b"ncodimov,cpf/cnpj\n"));

        let req = actix_test::TestRequest::get()
            .uri("/outputs/missing.csv")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = actix_test::TestRequest::get().uri("/outputs/..env").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_unreachable_browser_fails_job_and_frees_slot() {
        let dir = tempfile::tempdir().unwrap();
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", closed.local_addr().unwrap());
        drop(closed);

        let state = state_with_driver(dir.path(), url);
        let mut logs = state.progress.subscribe();
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes),
        )
        .await;

        for _ in 0..2 {
            let req = actix_test::TestRequest::post()
                .uri("/processar")
                .set_payload("ncodimov\n123\n")
                .to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }

        let mut lines = Vec::new();
        while let Ok(line) = logs.try_recv() {
            lines.push(line);
        }
        assert!(lines.iter().any(|l| l.starts_with("❌ Internal error")));
    }

    #[actix_web::test]
    async fn test_job_outlives_dropped_request() {
        let dir = tempfile::tempdir().unwrap();
        // Accepts connections and never answers, so session setup hangs.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let state = state_with_driver(dir.path(), url);
        let request = process_handler(
            web::Data::new(state.clone()),
            web::Bytes::from_static(b"ncodimov\n123\n"),
        );
        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(100), request).await;
        assert!(abandoned.is_err());

        tokio::task::yield_now().await;
        assert!(state.job_lock.try_lock().is_err());
    }
}
