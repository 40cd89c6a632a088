//! Adaptateur HTTP fin: requêtes HEAD/GET avec signature optionnelle.
//!
//! Le client ne connaît ni les segments ni la politique de reprise; il pose
//! l'en-tête `Range` sous la forme brute `<début>-<fin>` (sans préfixe
//! `bytes=`, format observé du protocole) et applique le schéma
//! d'authentification exactement une fois, avant l'envoi.
use reqwest::header::RANGE;
use reqwest::{RequestBuilder, Response};
use url::Url;

use crate::download::types::{DownloadError, Result};

/// Schéma d'authentification appliqué aux requêtes sortantes.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// Authentification basique `Authorization: Basic …`.
    Basic { username: String, password: String },
    /// Jeton porteur `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// Paire clé/jeton générique posée dans un en-tête nommé.
    ApiToken { header: String, token: String },
}

impl AuthScheme {
    /// Pose les en-têtes d'authentification sur la requête.
    pub fn apply(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Basic { username, password } => req.basic_auth(username, Some(password)),
            Self::Bearer { token } => req.bearer_auth(token),
            Self::ApiToken { header, token } => req.header(header.as_str(), token.as_str()),
        }
    }
}

/// Client HTTP partagé en lecture seule par tous les workers.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    auth: Option<AuthScheme>,
}

impl Client {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(DownloadError::Network)?;
        Ok(Self { http, auth: None })
    }

    /// Remplace le transport par un client `reqwest` personnalisé
    /// (mandataire, délais, en-têtes par défaut).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Requête HEAD signée; les échecs de transport sont des erreurs réseau.
    pub async fn head(&self, url: &Url) -> Result<Response> {
        self.sign(self.http.head(url.clone()))
            .send()
            .await
            .map_err(DownloadError::Network)
    }

    /// Requête GET signée, bornée par `range` quand il est fourni.
    pub async fn get(&self, url: &Url, range: Option<(u64, u64)>) -> Result<Response> {
        let mut req = self.http.get(url.clone());
        if let Some((start, end)) = range {
            req = req.header(RANGE, format!("{start}-{end}"));
        }
        self.sign(req).send().await.map_err(DownloadError::Network)
    }

    fn sign(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(auth) => auth.apply(req),
            None => req,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> RequestBuilder {
        reqwest::Client::new().get("http://example.com/fichier")
    }

    #[test]
    fn test_basic_auth_sets_authorization_header() {
        let auth = AuthScheme::Basic {
            username: "user".into(),
            password: "pass".into(),
        };
        let req = auth.apply(builder()).build().unwrap();
        // base64("user:pass")
        assert_eq!(
            req.headers()["authorization"],
            "Basic dXNlcjpwYXNz"
        );
    }

    #[test]
    fn test_bearer_auth_sets_authorization_header() {
        let auth = AuthScheme::Bearer {
            token: "secret".into(),
        };
        let req = auth.apply(builder()).build().unwrap();
        assert_eq!(req.headers()["authorization"], "Bearer secret");
    }

    #[test]
    fn test_api_token_adds_named_header() {
        let auth = AuthScheme::ApiToken {
            header: "x-api-key".into(),
            token: "jeton".into(),
        };
        let req = auth.apply(builder()).build().unwrap();
        assert_eq!(req.headers()["x-api-key"], "jeton");
    }
}
