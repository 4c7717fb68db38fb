//! Consent-handling seam.
//!
//! Cookie banners and regional consent interstitials are marketplace
//! specific; their heuristics live outside the core. The executors call
//! these hooks at the navigation points where interruptions appear and
//! treat every outcome as best effort.

use crate::error::HawkerResult;
use crate::session::BrowserSession;
use async_trait::async_trait;
use std::time::Duration;

/// Dismisses consent interruptions on behalf of the executors.
#[async_trait]
pub trait ConsentHandler: Send + Sync {
    /// Dismiss a cookie banner when present. Returns whether one was
    /// dismissed.
    async fn dismiss_cookie_banner(
        &self,
        session: &dyn BrowserSession,
        timeout: Duration,
    ) -> HawkerResult<bool>;

    /// Dismiss a regional consent interstitial when present.
    async fn dismiss_regional_consent(
        &self,
        session: &dyn BrowserSession,
        timeout: Duration,
    ) -> HawkerResult<bool>;

    /// Whether a URL is a consent interruption page. Pure.
    fn is_consent_interruption_page(&self, url: &str) -> bool;
}

/// No-op consent handler for marketplaces without interstitials and for
/// tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConsent;

#[async_trait]
impl ConsentHandler for NoConsent {
    async fn dismiss_cookie_banner(
        &self,
        _session: &dyn BrowserSession,
        _timeout: Duration,
    ) -> HawkerResult<bool> {
        Ok(false)
    }

    async fn dismiss_regional_consent(
        &self,
        _session: &dyn BrowserSession,
        _timeout: Duration,
    ) -> HawkerResult<bool> {
        Ok(false)
    }

    fn is_consent_interruption_page(&self, _url: &str) -> bool {
        false
    }
}
