//! URL canonicalization (§4.A, §6).
//!
//! Ported from the source system's `normalize_url`: strips tracking queries
//! per-platform so that distinct share links for the same media collapse to
//! one cache key. Falls back to the trimmed original on any parse failure —
//! a canonicalization miss must never become a hard error.

use url::Url;

use crate::types::Platform;

/// Parse `raw` as a URL, retrying with `https://` prepended if it has no
/// scheme (§4.A: bare hostnames like `instagram.com/p/ABC` must still classify).
fn parse_with_scheme_fallback(raw: &str) -> Result<Url, url::ParseError> {
    Url::parse(raw).or_else(|_| Url::parse(&format!("https://{raw}")))
}

/// Classify a raw URL into a platform by matching its host.
pub fn classify(raw: &str) -> Platform {
    let Ok(url) = parse_with_scheme_fallback(raw) else {
        return Platform::Other;
    };
    let host = url.host_str().unwrap_or("").to_lowercase();

    if host.contains("instagram.com") || host.contains("facebook.com") || host.contains("fb.watch") {
        Platform::Instagram
    } else if host.contains("tiktok.com") {
        Platform::Tiktok
    } else if host.contains("youtube.com") || host.contains("youtu.be") {
        Platform::Youtube
    } else if host.contains("soundcloud.com") {
        Platform::Soundcloud
    } else {
        Platform::Other
    }
}

/// The exact supported host set (§6): anything else is silently skipped in
/// the message path and rejected in the inline path.
pub fn is_supported_host(raw: &str) -> bool {
    let Ok(url) = parse_with_scheme_fallback(raw) else {
        return false;
    };
    let host = url.host_str().unwrap_or("").to_lowercase();
    const SUPPORTED: &[&str] =
        &["instagram.com", "tiktok.com", "vt.tiktok.com", "youtube.com", "youtu.be", "soundcloud.com"];
    SUPPORTED.iter().any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")))
}

/// Canonicalize a URL so that equivalent share links hash to the same cache
/// key. Mirrors `normalize_url` exactly:
///
/// - Instagram/Facebook: keep only the `img_index` query parameter.
/// - TikTok: strip all query parameters.
/// - YouTube/youtu.be: keep only `v` and `t`.
/// - SoundCloud: strip all query parameters.
/// - Trailing slash is trimmed in every case.
/// - Anything unparseable falls back to the trimmed original string.
pub fn canonicalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = parse_with_scheme_fallback(trimmed) else {
        return trim_trailing_slash(trimmed);
    };

    match classify(trimmed) {
        Platform::Instagram => retain_query_keys(&mut url, &["img_index"]),
        Platform::Tiktok => strip_query(&mut url),
        Platform::Youtube => retain_query_keys(&mut url, &["v", "t"]),
        Platform::Soundcloud => strip_query(&mut url),
        Platform::Other => {}
    }

    trim_trailing_slash(url.as_str())
}

fn strip_query(url: &mut Url) {
    url.set_query(None);
}

fn retain_query_keys(url: &mut Url, keep: &[&str]) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| keep.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        drop(pairs);
    }
}

fn trim_trailing_slash(s: &str) -> String {
    if s.ends_with('/') && !s.ends_with("://") {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instagram_keeps_only_img_index() {
        let url = "https://www.instagram.com/p/ABC123/?utm_source=ig&img_index=2";
        assert_eq!(canonicalize(url), "https://www.instagram.com/p/ABC123/?img_index=2");
    }

    #[test]
    fn instagram_without_img_index_strips_all_queries() {
        let url = "https://www.instagram.com/reel/XYZ/?utm_source=ig&igshid=abc";
        assert_eq!(canonicalize(url), "https://www.instagram.com/reel/XYZ");
    }

    #[test]
    fn tiktok_strips_all_queries() {
        let url = "https://www.tiktok.com/@user/video/123?is_from_webapp=1&sender_device=pc";
        assert_eq!(canonicalize(url), "https://www.tiktok.com/@user/video/123");
    }

    #[test]
    fn youtube_keeps_v_and_t() {
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=30&feature=share";
        assert_eq!(canonicalize(url), "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=30");
    }

    #[test]
    fn youtu_be_short_link_keeps_t_only() {
        let url = "https://youtu.be/dQw4w9WgXcQ?t=15&si=abc";
        assert_eq!(canonicalize(url), "https://youtu.be/dQw4w9WgXcQ?t=15");
    }

    #[test]
    fn soundcloud_strips_all_queries() {
        let url = "https://soundcloud.com/artist/track?in=artist/sets/album";
        assert_eq!(canonicalize(url), "https://soundcloud.com/artist/track");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let url = "https://www.tiktok.com/@user/video/123/";
        assert_eq!(canonicalize(url), "https://www.tiktok.com/@user/video/123");
    }

    #[test]
    fn unparseable_input_falls_back_to_trimmed_original() {
        let raw = "  not a url at all  ";
        assert_eq!(canonicalize(raw), "not a url at all");
    }

    #[test]
    fn classify_detects_platforms() {
        assert_eq!(classify("https://www.instagram.com/p/x/"), Platform::Instagram);
        assert_eq!(classify("https://vm.tiktok.com/xyz"), Platform::Tiktok);
        assert_eq!(classify("https://youtu.be/abc"), Platform::Youtube);
        assert_eq!(classify("https://soundcloud.com/a/b"), Platform::Soundcloud);
        assert_eq!(classify("https://example.com"), Platform::Other);
    }

    #[test]
    fn bare_hostname_without_scheme_still_classifies() {
        assert!(is_supported_host("instagram.com/p/ABC123"));
        assert_eq!(classify("tiktok.com/@user/video/123"), Platform::Tiktok);
        assert_eq!(canonicalize("youtube.com/watch?v=dQw4w9WgXcQ&feature=share"), "https://youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn is_supported_host_accepts_only_the_exact_host_set() {
        assert!(is_supported_host("https://www.instagram.com/p/x/"));
        assert!(is_supported_host("https://vt.tiktok.com/xyz"));
        assert!(is_supported_host("https://youtu.be/abc"));
        assert!(!is_supported_host("https://example.com/video"));
        assert!(!is_supported_host("not a url"));
    }
}
