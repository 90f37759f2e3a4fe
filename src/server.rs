//! Demo web UI over the [`QueryService`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/`, `/home` | Search form |
//! | `POST` | `/search` | Form field `question` → poster list |
//! | `GET`  | `/healthz` | Liveness probe, `READY` |
//!
//! Anything else is `404`. Query-time failures map to `400` (empty
//! question), `502` (embedding provider) or `500` (search); the response
//! body never carries internal error text, which is logged instead.

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::models::SearchHit;
use crate::search::{QueryError, QueryService};
use crate::store::sqlite::SqliteStore;

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Movie Search</title>
</head>
<body>
<h2>Movie Search</h2>
"#;

const PAGE_TAIL: &str = "</body>\n</html>\n";

const SEARCH_FORM: &str = r#"<form action="/search" method="post">
<label for="question">Describe a movie poster:</label><br>
<input type="text" id="question" name="question" size="80"><br><br>
<input type="submit" value="Search">
</form>
"#;

const HOME_LINK: &str = "<p><a href=\"/\">Home</a></p>\n";

/// Starts the web UI using the configured database and embedding provider.
///
/// Binds to `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder: Arc<dyn Embedder> = Arc::from(embedding::create_embedder(&config.embedding)?);
    let store = Arc::new(SqliteStore::connect(&config.db.path).await?);
    let service = Arc::new(QueryService::from_config(config, embedder, store.clone()));

    run_server_with_service(&config.server.bind, service).await?;
    store.close().await;
    Ok(())
}

/// Serve `service` on `bind` until Ctrl-C. Used directly by tests with an
/// in-memory store.
pub async fn run_server_with_service(bind: &str, service: Arc<QueryService>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("web UI listening on http://{}", listener.local_addr()?);
    println!("Listening on http://{}", bind);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down web UI");
        })
        .await?;
    Ok(())
}

pub fn router(service: Arc<QueryService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_home))
        .route("/home", get(handle_home))
        .route("/search", post(handle_search))
        .route("/healthz", get(handle_healthz))
        .fallback(handle_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}

// ============ Error response ============

/// Error converted into a short HTML page.
struct AppError {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = format!(
            "{}<p>{}</p>\n{}{}",
            PAGE_HEAD, self.message, HOME_LINK, PAGE_TAIL
        );
        (self.status, Html(body)).into_response()
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::EmptyQuery => AppError {
                status: StatusCode::BAD_REQUEST,
                message: "Please enter a question.",
            },
            QueryError::Embedding(e) => {
                tracing::error!("search embedding failed: {}", e);
                AppError {
                    status: StatusCode::BAD_GATEWAY,
                    message: "The embedding service is unavailable.",
                }
            }
            QueryError::Search(e) => {
                tracing::error!("vector search failed: {}", e);
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Search failed.",
                }
            }
        }
    }
}

// ============ Handlers ============

async fn handle_home() -> Html<String> {
    Html(format!("{}{}{}", PAGE_HEAD, SEARCH_FORM, PAGE_TAIL))
}

async fn handle_healthz() -> Html<&'static str> {
    Html("<html>READY</html>")
}

async fn handle_not_found() -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        message: "Not found.",
    }
}

#[derive(Deserialize)]
struct SearchForm {
    #[serde(default)]
    question: String,
}

async fn handle_search(
    State(service): State<Arc<QueryService>>,
    Form(form): Form<SearchForm>,
) -> Result<Html<String>, AppError> {
    let hits = service.search(&form.question).await?;
    Ok(Html(render_results(&form.question, &hits)))
}

fn render_results(question: &str, hits: &[SearchHit]) -> String {
    let mut page = String::from(PAGE_HEAD);
    page.push_str(&format!("<p>Results for: <b>{}</b></p>\n", escape_html(question.trim())));
    if hits.is_empty() {
        page.push_str("<p>No results.</p>\n");
    }
    for hit in hits {
        page.push_str(&format!("<h3>{}</h3>\n", escape_html(&hit.title)));
        if let Some(ref poster) = hit.poster_path {
            page.push_str(&format!(
                "<img src=\"{}\" alt=\"{}\" height=\"600\"><br>\n",
                escape_html(poster),
                escape_html(&hit.title)
            ));
        }
    }
    page.push_str(HOME_LINK);
    page.push_str(PAGE_TAIL);
    page
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
