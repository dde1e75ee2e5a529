use tracing::debug;
use url::Url;

/// Hosts restricted when no configuration says otherwise
pub fn default_restricted_hosts() -> Vec<String> {
    vec!["youtube.com".to_string(), "youtu.be".to_string()]
}

/// Decides which URLs fall under the daily limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteMatcher {
    hosts: Vec<String>,
}

impl SiteMatcher {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().trim_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// True when the URL's host is a restricted host or one of its subdomains.
    ///
    /// URLs without a scheme are read as https.
    pub fn is_restricted(&self, url: &str) -> bool {
        let url = url.trim();
        let parsed = Url::parse(url).or_else(|_| Url::parse(&format!("https://{}", url)));

        let host = match parsed.as_ref().ok().and_then(|u| u.host_str()) {
            Some(host) => host.trim_end_matches('.').to_ascii_lowercase(),
            None => {
                debug!("No host in {:?}; treating as unrestricted", url);
                return false;
            }
        };

        self.hosts.iter().any(|restricted| {
            host == *restricted
                || host
                    .strip_suffix(restricted.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl Default for SiteMatcher {
    fn default() -> Self {
        Self::new(default_restricted_hosts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_host_and_subdomains() {
        let matcher = SiteMatcher::default();
        assert!(matcher.is_restricted("https://youtube.com/"));
        assert!(matcher.is_restricted("https://www.youtube.com/watch?v=abc"));
        assert!(matcher.is_restricted("https://m.youtube.com/feed"));
        assert!(matcher.is_restricted("https://youtu.be/abc"));
        assert!(matcher.is_restricted("HTTPS://WWW.YOUTUBE.COM/"));
    }

    #[test]
    fn urls_without_scheme_are_accepted() {
        let matcher = SiteMatcher::default();
        assert!(matcher.is_restricted("www.youtube.com/watch?v=abc"));
        assert!(!matcher.is_restricted("example.org"));
    }

    #[test]
    fn lookalike_hosts_are_not_restricted() {
        let matcher = SiteMatcher::default();
        assert!(!matcher.is_restricted("https://notyoutube.com/"));
        assert!(!matcher.is_restricted("https://youtube.com.example.org/"));
        assert!(!matcher.is_restricted("https://example.org/?next=youtube.com"));
    }

    #[test]
    fn unparseable_urls_are_unrestricted() {
        let matcher = SiteMatcher::default();
        assert!(!matcher.is_restricted(""));
        assert!(!matcher.is_restricted("file:///tmp/youtube.com"));
    }

    #[test]
    fn configured_hosts_are_normalized() {
        let matcher = SiteMatcher::new([" Example.COM. ", ""]);
        assert_eq!(matcher.hosts(), ["example.com"]);
        assert!(matcher.is_restricted("https://video.example.com/"));
    }
}
