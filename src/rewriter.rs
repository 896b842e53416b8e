use url::Url;

use crate::classifier::looks_malformed;
use crate::config::DEFAULT_REGION_CODE;

pub const REGION_PARAM: &str = "gl";

/// Sets `gl=es` on `url`. See [`add_region_param_for`].
pub fn add_region_param(url: &str) -> Option<String> {
    add_region_param_for(url, DEFAULT_REGION_CODE)
}

/// Returns `url` with the region parameter set to `region`, or `None` when
/// nothing should change.
///
/// `None` covers both unusable input and a URL that already carries the
/// target region; callers treat the two the same way. Only the `gl` pair is
/// touched: other pairs keep their order, path and fragment stay as they are.
pub fn add_region_param_for(url: &str, region: &str) -> Option<String> {
    if url.is_empty() || url.contains("NaN") {
        return None;
    }

    let mut parsed = Url::parse(url).ok()?;
    if parsed.host_str().map(str::is_empty).unwrap_or(true) || parsed.path().is_empty() {
        return None;
    }

    let current = parsed
        .query_pairs()
        .find(|(key, _)| key == REGION_PARAM)
        .map(|(_, value)| value.into_owned());
    if current.as_deref() == Some(region) {
        return None;
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut replaced = false;
    for (key, value) in parsed.query_pairs() {
        if key == REGION_PARAM {
            if !replaced {
                pairs.push((key.into_owned(), region.to_string()));
                replaced = true;
            }
            continue;
        }
        pairs.push((key.into_owned(), value.into_owned()));
    }
    if !replaced {
        pairs.push((REGION_PARAM.to_string(), region.to_string()));
    }

    parsed.query_pairs_mut().clear().extend_pairs(pairs);

    let rewritten = String::from(parsed);
    if looks_malformed(&rewritten) {
        return None;
    }
    Some(rewritten)
}

/// True when the query string of `url` already asks for `region`.
pub fn has_region_param(url: &str, region: &str) -> bool {
    Url::parse(url)
        .map(|parsed| {
            parsed
                .query_pairs()
                .find(|(key, _)| key == REGION_PARAM)
                .map(|(_, value)| value == region)
                .unwrap_or(false)
        })
        .unwrap_or(false)
}
