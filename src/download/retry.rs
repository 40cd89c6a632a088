//! Politique de reprise générique appliquée à chaque segment.
//!
//! Contrats:
//! - Tentatives bornées par `max_retries`; l'épuisement retourne la
//!   dernière erreur observée.
//! - Délai entre tentatives: `retry_delay + (tentative × backoff_factor) ms`
//!   plus une gigue uniforme dans `[0, jitter)` pour désynchroniser les
//!   reprises concurrentes.
//! - `max_total_retry_duration` plafonne la somme des attentes; zéro
//!   désactive le plafond.
//! - L'attente observe le signal d'annulation, jamais un sommeil bloquant.
use std::ops::AsyncFnMut;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::download::types::{DownloadError, Result};

const DEFAULT_MAX_RETRIES: u32 = 5;

/// Prédicat décidant si une erreur mérite une nouvelle tentative; absent,
/// toute erreur est rejouée.
pub type ShouldRetry = Box<dyn Fn(&DownloadError) -> bool + Send + Sync>;

/// Rappel invoqué avant chaque attente: `(id, prochaine tentative, délai)`.
pub type OnRetry = Box<dyn Fn(usize, u32, Duration) + Send + Sync>;

/// Stratégie de rejeu des opérations transitoirement défaillantes.
pub struct RetryPolicy {
    max_retries: u32,
    retry_delay: Duration,
    backoff_factor: f64,
    jitter: Duration,
    max_total_retry_duration: Duration,
    should_retry: Option<ShouldRetry>,
    on_retry: Option<OnRetry>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay: Duration::ZERO,
            backoff_factor: 0.0,
            jitter: Duration::ZERO,
            max_total_retry_duration: Duration::ZERO,
            should_retry: None,
            on_retry: None,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_total_retry_duration(mut self, cap: Duration) -> Self {
        self.max_total_retry_duration = cap;
        self
    }

    pub fn with_should_retry(
        mut self,
        predicate: impl Fn(&DownloadError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Box::new(predicate));
        self
    }

    pub fn with_on_retry(
        mut self,
        callback: impl Fn(usize, u32, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Box::new(callback));
        self
    }

    /// Exécute `task` sous la politique de reprise.
    ///
    /// Chaque tour vérifie d'abord l'annulation, puis lance la tâche; un
    /// succès retourne immédiatement, un refus du prédicat retourne l'erreur
    /// telle quelle. L'attente entre deux tours est interrompue par
    /// l'annulation.
    pub async fn retry<F>(
        &self,
        token: &CancellationToken,
        id: usize,
        mut task: F,
    ) -> Result<()>
    where
        F: AsyncFnMut() -> Result<()>,
    {
        let mut last_err = None;
        let mut total = Duration::ZERO;

        for attempt in 1..=self.max_retries {
            if token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            match task().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if let Some(should_retry) = &self.should_retry {
                        if !should_retry(&e) {
                            return Err(e);
                        }
                    }
                    last_err = Some(e);
                }
            }

            let sleep = self.next_sleep(attempt);

            if !self.max_total_retry_duration.is_zero() {
                total += sleep;
                if total > self.max_total_retry_duration {
                    return Err(DownloadError::MaxTotalRetryDurationExceeded);
                }
            }

            if let Some(on_retry) = &self.on_retry {
                on_retry(id, attempt + 1, sleep);
            }

            tokio::select! {
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Équivalent de [`RetryPolicy::retry`] mais passant `a` et `b` en
    /// paramètres explicites de `task` plutôt que par capture.
    ///
    /// Identique trait pour trait à `retry`: seule la façon dont `task`
    /// reçoit son contexte change. Nécessaire lorsque `task` doit
    /// référencer à la fois un état partagé et un état exclusif
    /// (empruntés séparément) sans que la fermeture ne les capture
    /// elle-même: le compilateur ne parvient pas à prouver que la
    /// fermeture est `Send` quand ces emprunts sont capturés plutôt que
    /// reçus en argument.
    pub async fn retry_with<A, B, F>(
        &self,
        token: &CancellationToken,
        id: usize,
        a: &A,
        b: &mut B,
        mut task: F,
    ) -> Result<()>
    where
        F: AsyncFnMut(&A, &CancellationToken, &mut B) -> Result<()>,
    {
        let mut last_err = None;
        let mut total = Duration::ZERO;

        for attempt in 1..=self.max_retries {
            if token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            match task(a, token, b).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if let Some(should_retry) = &self.should_retry {
                        if !should_retry(&e) {
                            return Err(e);
                        }
                    }
                    last_err = Some(e);
                }
            }

            let sleep = self.next_sleep(attempt);

            if !self.max_total_retry_duration.is_zero() {
                total += sleep;
                if total > self.max_total_retry_duration {
                    return Err(DownloadError::MaxTotalRetryDurationExceeded);
                }
            }

            if let Some(on_retry) = &self.on_retry {
                on_retry(id, attempt + 1, sleep);
            }

            tokio::select! {
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn next_sleep(&self, attempt: u32) -> Duration {
        let backoff = Duration::from_millis((attempt as f64 * self.backoff_factor) as u64);
        let mut sleep = self.retry_delay + backoff;
        if !self.jitter.is_zero() {
            let jitter_ms = (rand::random::<f64>() * self.jitter.as_millis() as f64) as u64;
            sleep += Duration::from_millis(jitter_ms);
        }
        sleep
    }
}

impl Default for RetryPolicy {
    /// Politique par défaut: 5 tentatives, base 1 s, gigue 500 ms,
    /// facteur 2, avec journalisation de chaque reprise.
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
            .with_retry_delay(Duration::from_secs(1))
            .with_jitter(Duration::from_millis(500))
            .with_backoff_factor(2.0)
            .with_on_retry(|id, attempt, next_retry_in| {
                tracing::info!(
                    segment = id,
                    attempt,
                    delay = ?next_retry_in,
                    "nouvelle tentative planifiée"
                );
            })
    }
}
