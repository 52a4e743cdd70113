//! Pure normalization shared by both extraction strategies: URL
//! absolutization, colour canonicalization and order-preserving dedup.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

// ── Lazy static regexes ──────────────────────────────────────────────────────

static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#).unwrap()
});

static RGB_FN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^rgba?\(([^()]*)\)$").unwrap());

static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^#([0-9a-f]+)$").unwrap());

static COLOR_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)rgba?\([^()]*\)|#[0-9a-f]{3,8}\b").unwrap()
});

// ── Ordered set ──────────────────────────────────────────────────────────────

/// Set union that remembers first-seen order.
#[derive(Debug, Default, Clone)]
pub struct OrderedSet {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl OrderedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the value was already present.
    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.seen.contains(&value) {
            return false;
        }
        self.seen.insert(value.clone());
        self.items.push(value);
        true
    }

    pub fn into_vec(self) -> Vec<String> {
        self.items
    }
}

impl<S: Into<String>> FromIterator<S> for OrderedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = OrderedSet::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

impl<S: Into<String>> Extend<S> for OrderedSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

// ── URLs ─────────────────────────────────────────────────────────────────────

pub fn is_web_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Resolve `raw` against `base`. Anything that does not end up as an
/// http(s) URL (data:, blob:, javascript:, mailto:, unparsable) is dropped.
pub fn absolutize(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let resolved = base.join(raw).ok()?;
    is_web_url(&resolved).then(|| resolved.to_string())
}

/// Every `url(...)` reference inside a CSS fragment, unquoted, in order.
pub fn css_urls(css: &str) -> Vec<String> {
    CSS_URL_RE
        .captures_iter(css)
        .filter_map(|cap| {
            cap.get(1)
                .or_else(|| cap.get(2))
                .or_else(|| cap.get(3))
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

// ── Colours ──────────────────────────────────────────────────────────────────

/// Canonical `#rrggbb` form of an `rgb()`/`rgba()` or hex colour.
///
/// Unparseable values (keywords, other colour functions, malformed
/// channel lists) return `None` and are discarded by every caller.
pub fn canonical_color(raw: &str) -> Option<String> {
    let value = raw.trim();
    if let Some(cap) = RGB_FN_RE.captures(value) {
        let [r, g, b] = parse_rgb_channels(&cap[1])?;
        return Some(format!("#{:02x}{:02x}{:02x}", r, g, b));
    }
    if let Some(cap) = HEX_RE.captures(value) {
        return expand_hex(&cap[1].to_ascii_lowercase());
    }
    None
}

/// Colour tokens embedded in a longer declaration value such as the
/// `background` shorthand, canonicalized and in source order. Text inside
/// `url(...)` is never read as a colour.
pub fn colors_in_value(value: &str) -> Vec<String> {
    if let Some(color) = canonical_color(value) {
        return vec![color];
    }
    let without_urls = CSS_URL_RE.replace_all(value, " ");
    COLOR_TOKEN_RE
        .find_iter(&without_urls)
        .filter_map(|m| canonical_color(m.as_str()))
        .collect()
}

fn parse_rgb_channels(inner: &str) -> Option<[u8; 3]> {
    let inner = inner.trim();
    let channels: Vec<&str> = if inner.contains(',') {
        let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
        if !(3..=4).contains(&parts.len()) {
            return None;
        }
        parts[..3].to_vec()
    } else {
        // Space syntax: "r g b" or "r g b / a".
        let mut halves = inner.splitn(2, '/');
        let parts: Vec<&str> = halves.next()?.split_whitespace().collect();
        if parts.len() != 3 {
            return None;
        }
        if let Some(alpha) = halves.next() {
            if alpha.trim().is_empty() {
                return None;
            }
        }
        parts
    };

    let mut out = [0u8; 3];
    for (slot, token) in out.iter_mut().zip(channels) {
        *slot = parse_channel(token)?;
    }
    Some(out)
}

fn parse_channel(token: &str) -> Option<u8> {
    let (number, scale) = match token.strip_suffix('%') {
        Some(pct) => (pct, 255.0 / 100.0),
        None => (token, 1.0),
    };
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((value * scale).round().clamp(0.0, 255.0) as u8)
}

fn expand_hex(digits: &str) -> Option<String> {
    match digits.len() {
        3 | 4 => {
            let mut out = String::from("#");
            for c in digits.chars().take(3) {
                out.push(c);
                out.push(c);
            }
            Some(out)
        }
        6 | 8 => Some(format!("#{}", &digits[..6])),
        _ => None,
    }
}
