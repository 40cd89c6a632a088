//! Serveur d'origine en mémoire pour les tests du téléchargeur.
//!
//! Le gestionnaire de requêtes est une fermeture fournie par chaque test;
//! l'analyse des plages accepte la forme brute `<début>-<fin>` comme la
//! forme standard `bytes=<début>-<fin>`.
use std::convert::Infallible;
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;

use hyper::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tokio::sync::oneshot;

/// Origine de test; arrêtée proprement à la destruction.
pub struct TestServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Démarre un serveur sur un port éphémère, servi par `handler`.
    pub fn start<H>(handler: H) -> Self
    where
        H: Fn(Request<Body>) -> Response<Body> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let make_svc = make_service_fn(move |_| {
            let handler = Arc::clone(&handler);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let handler = Arc::clone(&handler);
                    async move { Ok::<_, Infallible>(handler(req)) }
                }))
            }
        });

        let server = Server::from_tcp(listener).unwrap().serve(make_svc);
        tokio::spawn(async move {
            let _ = server
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
        });

        Self {
            url: format!("http://{addr}/fichier"),
            shutdown: Some(tx),
        }
    }

    /// Origine standard: HEAD annonce la taille (et `Accept-Ranges` si
    /// `support_range`), GET sert la plage demandée en 206 ou le corps
    /// entier en 200.
    pub fn range_origin(data: Vec<u8>, support_range: bool) -> Self {
        Self::start(move |req| {
            if req.method() == Method::HEAD {
                let mut builder = Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_LENGTH, data.len());
                if support_range {
                    builder = builder.header(ACCEPT_RANGES, "bytes");
                }
                return builder.body(Body::empty()).unwrap();
            }

            if req.method() == Method::GET {
                if support_range {
                    if let Some((start, end)) = request_range(&req) {
                        return range_response(&data, start, end);
                    }
                }
                return Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_LENGTH, data.len())
                    .body(Body::from(data.clone()))
                    .unwrap();
            }

            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::empty())
                .unwrap()
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Plage demandée par la requête, quel que soit le format de l'en-tête.
pub fn request_range(req: &Request<Body>) -> Option<(usize, usize)> {
    parse_range(req.headers().get(RANGE)?.to_str().ok()?)
}

pub fn parse_range(value: &str) -> Option<(usize, usize)> {
    let raw = value.trim();
    let raw = raw.strip_prefix("bytes=").unwrap_or(raw);
    let (start, end) = raw.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Réponse 206 pour la tranche `[start..=end]`, ou 416 quand la plage
/// dépasse le contenu.
pub fn range_response(data: &[u8], start: usize, end: usize) -> Response<Body> {
    if start >= data.len() {
        return Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(CONTENT_RANGE, format!("bytes */{}", data.len()))
            .body(Body::empty())
            .unwrap();
    }

    let end = end.min(data.len() - 1);
    let slice = data[start..=end].to_vec();
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(CONTENT_LENGTH, slice.len())
        .header(CONTENT_RANGE, format!("bytes {start}-{end}/{}", data.len()))
        .body(Body::from(slice))
        .unwrap()
}
