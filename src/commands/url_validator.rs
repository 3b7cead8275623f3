//! Decides whether a page can be scanned.

use url::Url;

use crate::browser::BrowserAdapter;

pub const FILE_URL_DOES_NOT_HAVE_ACCESS: &str = "Accessibility Insights needs access to file URLs to scan this page. \
     Enable \"Allow access to file URLs\" on the extension's details page.";

pub const URL_NOT_SCANNABLE: [&str; 2] = [
    "Accessibility Insights can't scan this page.",
    "Go to a web page that starts with http:// or https:// and try again.",
];

/// The generic unscannable notification, one line per sentence.
#[must_use]
pub fn url_not_scannable_message() -> String {
    URL_NOT_SCANNABLE.join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlSupport {
    Supported,
    /// A `file://` page the extension has not been granted access to.
    FileAccessDenied,
    Unsupported,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UrlValidator;

impl UrlValidator {
    #[must_use]
    pub fn is_file_url(raw: &str) -> bool {
        Url::parse(raw).is_ok_and(|url| url.scheme() == "file")
    }

    pub async fn check(&self, raw: &str, browser: &dyn BrowserAdapter) -> UrlSupport {
        let Ok(url) = Url::parse(raw) else {
            return UrlSupport::Unsupported;
        };
        match url.scheme() {
            "http" | "https" => UrlSupport::Supported,
            "file" => {
                if browser.allows_file_scheme_access().await {
                    UrlSupport::Supported
                } else {
                    UrlSupport::FileAccessDenied
                }
            }
            _ => UrlSupport::Unsupported,
        }
    }
}
