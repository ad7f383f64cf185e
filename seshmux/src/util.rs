use url::Url;

pub(crate) use seshmux_core::util::ErrorExt;

/// Parses `url` and returns its lowercase host and path when it is an
/// interceptable http(s) URL.
pub(crate) fn http_host_path(url: &Url) -> Option<(String, String)> {
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    Some((host, url.path().to_owned()))
}

/// Whether `url` points at a page the engine tracks: http(s), with a host.
/// Internal surfaces (`about:`, `chrome:`, extension pages, …) are not.
pub(crate) fn is_trackable_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .as_ref()
        .and_then(http_host_path)
        .is_some()
}
