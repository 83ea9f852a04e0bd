//! Binance futures REST client
//!
//! Wraps `reqwest::Client` with the base URL, timeouts, a client-side GCRA
//! rate limiter, and capped exponential back-off for transient failures.
//! Only public market-data endpoints are used; no request signing.

use crate::binance::types::{
    DepthSnapshotResponse, FundingRateEntry, OpenInterestHistEntry, OpenInterestResponse,
    PremiumIndexResponse, RestAggTrade, Ticker24hrResponse,
};
use crate::error::{OrderflowError, Result};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use std::num::NonZeroU32;
use std::time::Duration;

/// Maximum retry attempts for a single REST request
const MAX_RETRIES: u32 = 3;

/// Binance futures REST API client
///
/// Shared across the orderbook synchronizer, the periodic pollers, and the
/// tool handlers; the embedded rate limiter serializes all of them under
/// one request budget.
pub struct FuturesRestClient {
    client: Client,
    base_url: String,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl std::fmt::Debug for FuturesRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesRestClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl FuturesRestClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - e.g. `https://fapi.binance.com`
    /// * `rate_limit_per_min` - request-weight budget per minute
    pub fn new(base_url: impl Into<String>, rate_limit_per_min: u32) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(rate_limit_per_min.max(1)).expect("rate limit must be non-zero"),
        );

        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("orderflow-provider/0.1.0")
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into(),
            limiter: RateLimiter::direct(quota),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Wait for rate-limit permission before issuing a request
    async fn acquire_permit(&self) {
        self.limiter.until_ready().await;
    }

    /// GET a JSON payload with retry on transient failures
    ///
    /// 429 responses honor `Retry-After` (falling back to exponential
    /// back-off); connection errors and 5xx retry with back-off; other
    /// errors surface immediately.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut retry_count = 0u32;

        loop {
            self.acquire_permit().await;

            let response = self.client.get(&url).query(query).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();

                    if status.as_u16() == 429 {
                        if retry_count >= MAX_RETRIES {
                            return Err(OrderflowError::RateLimited(format!(
                                "Rate limit exceeded after {} retries on {}",
                                MAX_RETRIES, path
                            )));
                        }

                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|h| h.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or_else(|| 2_u64.pow(retry_count));

                        tracing::warn!(
                            path,
                            retry = retry_count + 1,
                            wait_secs = retry_after,
                            "Rate limit hit (429), backing off"
                        );

                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        retry_count += 1;
                        continue;
                    }

                    if status.is_server_error() {
                        if retry_count >= MAX_RETRIES {
                            return Err(OrderflowError::Connection(format!(
                                "Binance server error (HTTP {}) on {}",
                                status.as_u16(),
                                path
                            )));
                        }
                        let wait = 2_u64.pow(retry_count);
                        tracing::warn!(
                            path,
                            status = status.as_u16(),
                            wait_secs = wait,
                            "Server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        retry_count += 1;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(OrderflowError::from(resp.error_for_status().unwrap_err()));
                    }

                    return resp
                        .json::<T>()
                        .await
                        .map_err(|e| OrderflowError::Parse(format!("{}: {}", path, e)));
                }
                Err(err) => {
                    let mapped = OrderflowError::from(err);
                    if !mapped.is_retryable() || retry_count >= MAX_RETRIES {
                        return Err(mapped);
                    }
                    let wait = 2_u64.pow(retry_count);
                    tracing::warn!(path, error = %mapped, wait_secs = wait, "Request failed, retrying");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    retry_count += 1;
                }
            }
        }
    }

    /// Fetch an orderbook snapshot: `GET /fapi/v1/depth`
    pub async fn get_depth_snapshot(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<DepthSnapshotResponse> {
        self.get_json(
            "/fapi/v1/depth",
            &[
                ("symbol", symbol.to_uppercase()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    /// Fetch recent aggregated trades: `GET /fapi/v1/aggTrades`
    pub async fn get_agg_trades(
        &self,
        symbol: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: u32,
    ) -> Result<Vec<RestAggTrade>> {
        let mut query = vec![
            ("symbol", symbol.to_uppercase()),
            ("limit", limit.to_string()),
        ];
        if let Some(start) = start_time {
            query.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_time {
            query.push(("endTime", end.to_string()));
        }
        self.get_json("/fapi/v1/aggTrades", &query).await
    }

    /// Fetch 24h rolling ticker statistics: `GET /fapi/v1/ticker/24hr`
    pub async fn get_ticker_24hr(&self, symbol: &str) -> Result<Ticker24hrResponse> {
        self.get_json("/fapi/v1/ticker/24hr", &[("symbol", symbol.to_uppercase())])
            .await
    }

    /// Fetch mark price, index price and funding: `GET /fapi/v1/premiumIndex`
    pub async fn get_premium_index(&self, symbol: &str) -> Result<PremiumIndexResponse> {
        self.get_json("/fapi/v1/premiumIndex", &[("symbol", symbol.to_uppercase())])
            .await
    }

    /// Fetch current open interest: `GET /fapi/v1/openInterest`
    pub async fn get_open_interest(&self, symbol: &str) -> Result<OpenInterestResponse> {
        self.get_json("/fapi/v1/openInterest", &[("symbol", symbol.to_uppercase())])
            .await
    }

    /// Fetch open-interest history: `GET /futures/data/openInterestHist`
    ///
    /// `period` is one of 5m, 15m, 30m, 1h, 2h, 4h, 6h, 12h, 1d.
    pub async fn get_open_interest_hist(
        &self,
        symbol: &str,
        period: &str,
        limit: u32,
    ) -> Result<Vec<OpenInterestHistEntry>> {
        self.get_json(
            "/futures/data/openInterestHist",
            &[
                ("symbol", symbol.to_uppercase()),
                ("period", period.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    /// Fetch funding-rate history: `GET /fapi/v1/fundingRate`
    pub async fn get_funding_rate_history(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<FundingRateEntry>> {
        self.get_json(
            "/fapi/v1/fundingRate",
            &[
                ("symbol", symbol.to_uppercase()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = FuturesRestClient::new("https://fapi.binance.com", 1200);
        assert_eq!(client.base_url(), "https://fapi.binance.com");
    }

    #[tokio::test]
    async fn test_rate_limiter_allows_initial_burst() {
        let client = FuturesRestClient::new("https://fapi.binance.com", 1200);
        // The first permits are immediately available
        client.acquire_permit().await;
        client.acquire_permit().await;
    }
}
