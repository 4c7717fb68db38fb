/// Chrome-backed browser session adapter.
#[cfg(feature = "chrome")]
pub mod chrome;
