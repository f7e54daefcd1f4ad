mod webdriver_session;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use webdriver_session::WebDriverSession;

/// CSS selectors of the CND search form
pub mod selectors {
    pub const SEARCH_FORM: &str = "form#inicio";
    pub const PURPOSE_SELECT: &str = "select[name='finalidade']";
    /// "2" is the real-estate certificate option
    pub const PURPOSE_VALUE: &str = "2";
    pub const INSCRIPTION_INPUT: &str = "input[name='inscricao']";
    pub const SUBMIT_BUTTON: &str = "input[type='submit'][value='Pesquisar']";
}

/// The browser primitives the record pipeline needs.
///
/// One session drives one page; callers never issue commands concurrently.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Waits until `selector` is present, failing after `timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()>;

    async fn select_option(&self, selector: &str, value: &str) -> Result<()>;

    /// Clears the field, then types `text` key by key.
    async fn clear_and_type(&self, selector: &str, text: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    /// Starts recording responses; anything observed before this call is forgotten.
    async fn arm_interception(&self) -> Result<()>;

    /// Response URLs observed since the previous call, oldest first.
    async fn observed_responses(&self) -> Result<Vec<String>>;

    async fn page_source(&self) -> Result<String>;

    async fn close(self) -> Result<()>
    where
        Self: Sized;
}
