pub mod applier;
#[cfg(feature = "browser")]
pub mod browser;
pub mod notify;

pub use applier::HttpApplier;
#[cfg(feature = "browser")]
pub use browser::{BrowserSession, StealthBrowserFactory};
pub use notify::WebhookNotifier;
