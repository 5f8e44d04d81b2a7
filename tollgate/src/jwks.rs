//! Remote JSON Web Key Sets

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use aliri::{
    jwt::{self, CoreHeaders, HasAlgorithm},
    Jwks, JwtRef,
};
use arc_swap::ArcSwapOption;
use reqwest::{
    header::{self, HeaderValue},
    Client, StatusCode,
};
use serde::Deserialize;

use crate::{flight::SingleFlight, KeySetError, VerifyError};

/// The minimum time between re-fetches triggered by unknown key IDs
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct VolatileData {
    jwks: Jwks,
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
}

#[derive(Debug)]
struct Inner {
    jwks_url: String,
    client: Client,
    min_refresh_interval: Duration,
    data: ArcSwapOption<VolatileData>,
    last_attempt: Mutex<Option<Instant>>,
    refreshes: SingleFlight<(), Arc<VolatileData>, KeySetError>,
}

/// A JSON Web Key Set held by a remote source
///
/// Keys are fetched on first use. When a token names a key that is not in
/// the set, the set is fetched again, no more than once per refresh
/// interval counted from the last attempt. If that fetch fails, the
/// previous keys stay in use.
///
/// Clones share the same key set.
#[derive(Clone, Debug)]
#[must_use]
pub struct RemoteKeySet {
    inner: Arc<Inner>,
}

impl RemoteKeySet {
    /// Constructs a key set that will be fetched from `jwks_url`
    ///
    /// No request is made until the keys are needed.
    pub fn new(jwks_url: impl Into<String>, client: Client) -> Self {
        Self::with_refresh_interval(jwks_url, client, MIN_REFRESH_INTERVAL)
    }

    /// Constructs a key set with a custom minimum interval between
    /// re-fetches triggered by unknown key IDs
    pub fn with_refresh_interval(
        jwks_url: impl Into<String>,
        client: Client,
        min_refresh_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jwks_url: jwks_url.into(),
                client,
                min_refresh_interval,
                data: ArcSwapOption::empty(),
                last_attempt: Mutex::new(None),
                refreshes: SingleFlight::new(),
            }),
        }
    }

    /// The URL the key set is fetched from
    pub fn url(&self) -> &str {
        &self.inner.jwks_url
    }

    /// Whether the key set has been fetched
    pub fn is_loaded(&self) -> bool {
        self.inner.data.load().is_some()
    }

    /// The current key set, fetching it if it has not been fetched yet
    pub async fn current(&self) -> Result<Jwks, KeySetError> {
        Ok(self.loaded().await?.jwks.clone())
    }

    /// Fetches the key set from the remote URL
    ///
    /// No retries are attempted. If the fetch fails, the previous keys are
    /// kept. Concurrent refreshes share one request.
    pub async fn refresh(&self) -> Result<(), KeySetError> {
        self.refresh_data().await.map(|_| ())
    }

    /// Verifies a token against the key set
    ///
    /// The key is chosen by the token's `kid` and `alg` headers; the
    /// signature and claims are checked by `validator`.
    pub async fn verify<C>(
        &self,
        token: &JwtRef,
        validator: &jwt::CoreValidator,
    ) -> Result<C, VerifyError>
    where
        C: for<'de> Deserialize<'de> + jwt::CoreClaims,
    {
        let decomposed = token.decompose::<jwt::BasicHeaders>()?;
        let kid = decomposed.kid().map(ToOwned::to_owned);
        let alg = decomposed.alg();

        let mut data = self.loaded().await?;

        if data.jwks.get_key_by_opt(kid.as_deref(), alg).is_none() && self.claim_refresh() {
            tracing::debug!(
                jwks.url = %self.inner.jwks_url,
                jwt.kid = kid.as_ref().map(|k| k.as_str()),
                jwt.alg = %alg,
                "no matching key; refreshing JWKS"
            );
            match self.refresh_data().await {
                Ok(fresh) => data = fresh,
                Err(err) => {
                    let error: &dyn std::error::Error = &err;
                    tracing::warn!(error, "JWKS refresh failed; keeping previous keys");
                }
            }
        }

        let Some(key) = data.jwks.get_key_by_opt(kid.as_deref(), alg) else {
            tracing::debug!(
                jwt.kid = kid.as_ref().map(|k| k.as_str()),
                jwt.alg = %alg,
                "unable to find a matching key"
            );
            return Err(VerifyError::UnknownKeyId);
        };

        let (_, claims) = decomposed.verify::<C, _>(key, validator)?.extract();
        Ok(claims)
    }

    /// Reserves the next unknown-`kid` re-fetch if the refresh interval has
    /// passed since the last attempt, successful or not
    fn claim_refresh(&self) -> bool {
        let mut last = self
            .inner
            .last_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if at.elapsed() < self.inner.min_refresh_interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    async fn loaded(&self) -> Result<Arc<VolatileData>, KeySetError> {
        match self.inner.data.load_full() {
            Some(data) => Ok(data),
            None => self.refresh_data().await,
        }
    }

    async fn refresh_data(&self) -> Result<Arc<VolatileData>, KeySetError> {
        let inner = Arc::clone(&self.inner);
        self.inner.refreshes.run((), move || fetch(inner)).await
    }
}

#[tracing::instrument(skip(inner), fields(jwks.url = %inner.jwks_url))]
async fn fetch(inner: Arc<Inner>) -> Result<Arc<VolatileData>, KeySetError> {
    tracing::debug!("fetching JWKS");
    *inner
        .last_attempt
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    let url = || inner.jwks_url.clone();

    let previous = inner.data.load_full();
    let mut request = inner.client.get(&inner.jwks_url);
    if let Some(previous) = &previous {
        if let Some(etag) = &previous.etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        } else if let Some(last_modified) = &previous.last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, last_modified);
        }
    }

    let response = request.send().await.map_err(|err| {
        let error: &dyn std::error::Error = &err;
        tracing::warn!(error, "JWKS fetch failed");
        KeySetError::Fetch {
            url: url(),
            source: Arc::new(err),
        }
    })?;

    let status = response.status();
    if status == StatusCode::NOT_MODIFIED {
        if let Some(previous) = previous {
            tracing::debug!("JWKS not modified");
            let data = Arc::new(VolatileData {
                jwks: previous.jwks.clone(),
                etag: previous.etag.clone(),
                last_modified: previous.last_modified.clone(),
            });
            inner.data.store(Some(Arc::clone(&data)));
            return Ok(data);
        }
    }

    if !status.is_success() {
        tracing::warn!(
            http.status_code = status.as_u16(),
            "JWKS fetch failed; unexpected response status",
        );
        return Err(KeySetError::Status { url: url(), status });
    }

    let etag = response.headers().get(header::ETAG).map(ToOwned::to_owned);
    let last_modified = response
        .headers()
        .get(header::LAST_MODIFIED)
        .map(ToOwned::to_owned);

    let body = response.bytes().await.map_err(|err| KeySetError::Fetch {
        url: url(),
        source: Arc::new(err),
    })?;

    let jwks: Jwks = serde_json::from_slice(&body).map_err(|err| {
        let error: &dyn std::error::Error = &err;
        tracing::warn!(error, "JWKS fetch failed; malformed key set");
        KeySetError::Malformed {
            url: url(),
            source: Arc::new(err),
        }
    })?;

    let data = Arc::new(VolatileData {
        jwks,
        etag,
        last_modified,
    });
    inner.data.store(Some(Arc::clone(&data)));
    tracing::info!("JWKS refreshed");

    Ok(data)
}

/// Hands out one [`RemoteKeySet`] per JWKS URI
///
/// Handles are never evicted.
#[derive(Clone, Debug)]
#[must_use]
pub struct KeySetCache {
    client: Client,
    sets: Arc<Mutex<HashMap<String, RemoteKeySet>>>,
}

impl KeySetCache {
    /// Constructs an empty cache with a default HTTP client
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(crate::default_client()?))
    }

    /// Constructs an empty cache whose key sets fetch with the given client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            sets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The key set for `jwks_uri`, created on first request
    pub fn key_source(&self, jwks_uri: &str) -> RemoteKeySet {
        let mut sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        sets.entry(jwks_uri.to_owned())
            .or_insert_with(|| RemoteKeySet::new(jwks_uri, self.client.clone()))
            .clone()
    }

    /// Whether a key set has been created for `jwks_uri`
    pub fn contains(&self, jwks_uri: &str) -> bool {
        self.sets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(jwks_uri)
    }

    /// The number of key sets created
    pub fn len(&self) -> usize {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no key set has been created
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
