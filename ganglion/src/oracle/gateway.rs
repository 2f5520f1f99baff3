//! Oracle Gateway - Structured Calls with Fallback
//!
//! Wraps an [`Oracle`] with a timeout and implements the single
//! call-then-decode-then-fallback pattern shared by every integration point.
//! A timeout is treated exactly like a failed call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Oracle, OracleError, OracleRequest, OracleResponse};

/// Why a structured call fell back
#[derive(Debug, Clone)]
pub enum FallbackReason {
    /// The oracle call failed or timed out
    Oracle(OracleError),

    /// The oracle answered but the answer did not decode
    Decode(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oracle(e) => write!(f, "{}", e),
            Self::Decode(reason) => write!(f, "undecodable response: {}", reason),
        }
    }
}

/// Timeout-bounded access to the oracle
#[derive(Clone)]
pub struct OracleGateway {
    oracle: Arc<dyn Oracle>,
    timeout: Duration,
}

impl OracleGateway {
    /// Create a gateway with the given per-call timeout
    pub fn new(oracle: Arc<dyn Oracle>, timeout: Duration) -> Self {
        Self { oracle, timeout }
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Call the oracle, converting a timeout into [`OracleError::Timeout`]
    pub async fn call(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
        let call_site = request.call_site;
        debug!("Oracle call [{}] ({} prompt chars)", call_site, request.prompt.len());

        match tokio::time::timeout(self.timeout, self.oracle.complete(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Oracle call [{}] timed out after {:?}", call_site, self.timeout);
                Err(OracleError::Timeout(self.timeout))
            }
        }
    }

    /// Call the oracle and decode its answer, or produce the fallback.
    ///
    /// Never fails: every error path ends in `fallback`.
    pub async fn call_with_fallback<T>(
        &self,
        request: OracleRequest,
        decode: impl FnOnce(OracleResponse) -> Result<T, String>,
        fallback: impl FnOnce(&FallbackReason) -> T,
    ) -> T {
        let call_site = request.call_site;

        let reason = match self.call(request).await {
            Ok(response) => match decode(response) {
                Ok(value) => return value,
                Err(e) => FallbackReason::Decode(e),
            },
            Err(e) => FallbackReason::Oracle(e),
        };

        warn!("Oracle call [{}] falling back: {}", call_site, reason);
        fallback(&reason)
    }
}
