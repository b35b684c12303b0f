//! Launching the authorization URL in the user's browser.

/// Opens the authorization URL for the user.
///
/// Failures are reported to the caller, which treats them as non-fatal since the
/// URL can still be opened by hand.
pub trait BrowserLauncher: Send + Sync {
    fn launch(&self, url: &str) -> Result<(), String>;
}

/// Uses the platform's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn launch(&self, url: &str) -> Result<(), String> {
        open::that(url).map_err(|e| e.to_string())
    }
}

/// Does nothing; the user opens the logged URL manually.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualBrowser;

impl BrowserLauncher for ManualBrowser {
    fn launch(&self, _url: &str) -> Result<(), String> {
        Ok(())
    }
}
