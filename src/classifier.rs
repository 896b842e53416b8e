use url::Url;

/// Path-embedded view-state token Google Maps uses for the satellite layer.
pub const SATELLITE_MARKER: &str = "!3m1!1e3";
pub const MAPS_PATH_MARKER: &str = "/maps/";
const MAPS_DOMAIN: &str = "google.com";

/// Anything shorter cannot carry a host, the maps path and the view state.
pub const MIN_PLAUSIBLE_URL_LEN: usize = 20;

/// Returns true when `url` is a Google Maps page showing the satellite layer.
///
/// Fails closed: unparseable input, foreign hosts, implausibly short URLs and
/// URLs carrying a `NaN` coordinate artifact are all rejected.
pub fn is_satellite_view(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };

    let on_maps_domain = parsed.host_str().map(is_maps_host).unwrap_or(false);
    if !on_maps_domain || !parsed.path().contains(MAPS_PATH_MARKER) {
        return false;
    }

    if !url.contains(SATELLITE_MARKER) {
        return false;
    }

    !looks_malformed(url)
}

pub(crate) fn looks_malformed(url: &str) -> bool {
    url.len() < MIN_PLAUSIBLE_URL_LEN || url.contains("NaN")
}

/// `google.com` or a `google.com.<cc>` country domain, with any subdomains.
fn is_maps_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let host = strip_country_suffix(&host);
    host == MAPS_DOMAIN
        || host
            .strip_suffix(MAPS_DOMAIN)
            .map(|prefix| prefix.ends_with('.'))
            .unwrap_or(false)
}

fn strip_country_suffix(host: &str) -> &str {
    match host.rsplit_once('.') {
        Some((rest, cc))
            if cc.len() == 2
                && cc.bytes().all(|b| b.is_ascii_alphabetic())
                && rest.ends_with(MAPS_DOMAIN) =>
        {
            rest
        }
        _ => host,
    }
}
