use chrono::Utc;

const BVID_PREFIX: &[u8] = b"BV";
const BVID_BODY_LEN: usize = 10;

/// Extract the first video id (`BV` followed by ten ASCII alphanumerics) from
/// free-form input such as a pasted URL or share text.
pub fn extract_bvid(input: &str) -> Option<&str> {
    let bytes = input.as_bytes();
    let total = BVID_PREFIX.len() + BVID_BODY_LEN;
    if bytes.len() < total {
        return None;
    }
    (0..=bytes.len() - total).find_map(|start| {
        let candidate = &bytes[start..start + total];
        let is_match = candidate.starts_with(BVID_PREFIX)
            && candidate[BVID_PREFIX.len()..]
                .iter()
                .all(u8::is_ascii_alphanumeric);
        // All matched bytes are ASCII so the slice is on char boundaries.
        is_match.then(|| &input[start..start + total])
    })
}

/// Covers come back protocol-relative or over plain http; always use https.
pub fn normalize_cover_url(raw: &str) -> String {
    let url = raw.trim();
    if url.is_empty() {
        return String::new();
    }
    if let Some(rest) = url.strip_prefix("http://") {
        return format!("https://{rest}");
    }
    if url.starts_with("https://") {
        return url.to_string();
    }
    format!("https://{}", url.trim_start_matches("//"))
}

/// Remove `<tag ...>` markup such as the `<em class="keyword">` highlights in
/// search titles.
pub fn strip_html_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('<') {
        match rest[open + 1..].find('>') {
            Some(len) if len > 0 => {
                out.push_str(&rest[..open]);
                rest = &rest[open + 1 + len + 1..];
            }
            _ => {
                out.push_str(&rest[..=open]);
                rest = &rest[open + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// True for `http://` and `https://` URLs.
pub fn is_http_url(url: &str) -> bool {
    let lower = url.trim_start().get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bvid_from_urls_and_text() {
        assert_eq!(
            extract_bvid("https://www.bilibili.com/video/BV1xx411c7mD?p=2"),
            Some("BV1xx411c7mD")
        );
        assert_eq!(extract_bvid("【MV】看这个 BV17x411w7KC 好听"), Some("BV17x411w7KC"));
        assert_eq!(extract_bvid("BV1xx411c7m"), None);
        assert_eq!(extract_bvid("av170001"), None);
        assert_eq!(extract_bvid(""), None);
    }

    #[test]
    fn covers_are_forced_to_https() {
        assert_eq!(normalize_cover_url("//i0.hdslb.com/a.jpg"), "https://i0.hdslb.com/a.jpg");
        assert_eq!(normalize_cover_url("http://i0.hdslb.com/a.jpg"), "https://i0.hdslb.com/a.jpg");
        assert_eq!(normalize_cover_url("https://i0.hdslb.com/a.jpg"), "https://i0.hdslb.com/a.jpg");
        assert_eq!(normalize_cover_url(" "), "");
    }

    #[test]
    fn strips_highlight_markup() {
        assert_eq!(
            strip_html_tags(r#"<em class="keyword">春日影</em> 翻唱"#),
            "春日影 翻唱"
        );
        assert_eq!(strip_html_tags("a < b"), "a < b");
        assert_eq!(strip_html_tags("<>x"), "<>x");
    }

    #[test]
    fn recognises_http_urls() {
        assert!(is_http_url("https://upos.example/a.m4s"));
        assert!(is_http_url("HTTP://a"));
        assert!(!is_http_url("file:///etc/passwd"));
        assert!(!is_http_url("ftp://x"));
    }
}
