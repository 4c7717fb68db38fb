#![warn(missing_docs)]

//! Message-box automation for managed marketplace accounts.
//!
//! Hawker performs three mutating actions against a marketplace's private
//! messaging UI — send a text message, send a message with image
//! attachments, and decline a payment/offer proposal — plus budgeted
//! multi-account conversation fetching. The target application exposes no
//! stable write API for most of this and actively defends against
//! automation, so every action must either demonstrably succeed, be
//! safely presumed successful, or fail with an actionable diagnosis,
//! inside a caller-specified deadline and without ever double-submitting.
//!
//! # How it fits together
//!
//! - [`budget::DeadlineBudget`] apportions the caller's ceiling to every
//!   nested navigation, poll, and retry.
//! - [`error`] classifies raw failures into a closed taxonomy at the
//!   boundary where they are caught.
//! - [`readiness::ConversationReadiness`] drives a
//!   [`session::BrowserSession`] through navigation and layered recovery
//!   until the page exposes the controls an action needs.
//! - [`actions::Messenger`] owns the collaborator seams and exposes the
//!   public operations.
//! - [`confirm::SnapshotConfirmation`] diffs before/after reads from the
//!   [`transport::MessageBox`] to decide what actually happened.
//! - [`pipeline`] fans the fetch path out over many accounts with
//!   bounded concurrency.
//!
//! # Basic usage
//!
//! ```rust,ignore
//! use hawker::prelude::*;
//! use std::sync::Arc;
//!
//! let messenger = Messenger::new(
//!     Configuration::new(),
//!     Arc::new(ReqwestMessageBox),
//!     Arc::new(ChromeSessionFactory::new(&Configuration::new())),
//!     Arc::new(NoConsent),
//! );
//! let snapshot = messenger
//!     .send_conversation_message(&account, Some(&proxy), &target, "hello")
//!     .await?;
//! ```

pub extern crate tokio;
pub extern crate url;
#[macro_use]
extern crate lazy_static;

/// Cooperative cancellation token.
pub mod abort;
/// Action executors and the public [`actions::Messenger`] facade.
pub mod actions;
/// Deadline budget shared by every step of one invocation.
pub mod budget;
/// Configuration structure and the DOM-locator catalog.
pub mod configuration;
/// Before/after snapshot confirmation.
pub mod confirm;
/// Consent-handling seam.
pub mod consent;
/// Conversation read model.
pub mod conversation;
/// Error taxonomy and fault classification.
pub mod error;
/// Optional integrations behind cargo features.
pub mod features;
/// Multi-account fetch pipeline.
pub mod pipeline;
/// Conversation readiness state machine.
pub mod readiness;
/// Browser session seam.
pub mod session;
/// Primary transport: the message-box API.
pub mod transport;
/// Application utils.
pub mod utils;

/// Commonly used types in one import.
pub mod prelude {
    pub use crate::abort::AbortSignal;
    pub use crate::actions::{ConversationTarget, Messenger};
    pub use crate::budget::DeadlineBudget;
    pub use crate::configuration::{Configuration, SelectorCatalog};
    pub use crate::consent::{ConsentHandler, NoConsent};
    pub use crate::conversation::{
        Account, ConversationRef, ConversationSnapshot, ConversationSummary, DeviceProfile,
        MatchCriteria, ProxyScheme, ProxyServer,
    };
    pub use crate::error::{FaultKind, HawkerError, HawkerResult};
    pub use crate::pipeline::FetchOptions;
    pub use crate::session::{BrowserSession, SessionFactory, UiState};
    pub use crate::transport::{MessageBox, MessageBoxClient, ReqwestMessageBox};

    #[cfg(feature = "chrome")]
    pub use crate::features::chrome::ChromeSessionFactory;
}
