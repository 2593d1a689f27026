//! Output file name inference from response metadata.

use std::borrow::Cow;

use url::Url;

/// Choose a file name for a downloaded body.
///
/// The `filename` parameter of the content-disposition header wins, then the
/// base name of the final (post-redirect) URL. If the chosen name has no
/// extension, the base name of the URL originally requested is used instead:
/// redirect targets are often opaque storage keys while the requested URL
/// still carries the real file name.
pub fn infer_name(
    content_disposition: Option<&str>,
    final_url: &str,
    source_url: &str,
) -> Option<String> {
    let name = content_disposition
        .and_then(disposition_filename)
        .or_else(|| url_base_name(final_url));

    match name {
        Some(name) if extension(&name).len() > 1 => Some(name),
        name => url_base_name(source_url).or(name),
    }
}

/// The `filename` of a content-disposition value, preferring the RFC 5987
/// `filename*` form when it can be decoded.
pub fn disposition_filename(value: &str) -> Option<String> {
    let params = split_params(value);
    let (disposition, params) = params.split_first()?;
    let disposition = disposition.trim();
    if disposition.is_empty() || disposition.contains('=') {
        return None;
    }

    let mut plain = None;
    let mut extended = None;
    for param in params {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let raw = raw.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "filename" => plain = Some(unquote(raw)),
            "filename*" => extended = decode_extended(raw),
            _ => {}
        }
    }

    extended.or(plain).filter(|name| !name.is_empty())
}

/// Last non-empty path segment of `url`, percent-decoded.
pub fn url_base_name(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let base = url.path().trim_end_matches('/').rsplit('/').next()?;
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    urlencoding::decode(base).ok().map(Cow::into_owned)
}

fn extension(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.rfind('.').map_or("", |i| &base[i..])
}

// Splits on `;` outside quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_owned();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

// charset'language'percent-encoded
fn decode_extended(raw: &str) -> Option<String> {
    let mut parts = raw.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;

    if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("us-ascii") {
        return None;
    }
    urlencoding::decode(encoded).ok().map(Cow::into_owned)
}
