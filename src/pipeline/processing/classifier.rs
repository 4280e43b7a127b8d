use super::providers::PROVIDERS;
use crate::types::{MediaCandidate, MediaKind};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

static EMBED_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("meta[content], iframe[src], video[src], source[src], embed[src]")
        .expect("valid selector")
});

static ABSOLUTE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>\\)]+"#).expect("valid regex"));

const MEDIA_META: &[&str] = &[
    "og:video",
    "og:video:url",
    "og:video:secure_url",
    "og:image",
    "og:image:secure_url",
    "twitter:player:stream",
    "twitter:image",
];

/// Classify a single URL. Pure and deterministic.
pub fn classify(raw: &str) -> MediaCandidate {
    let raw = raw.trim();
    let parsed = match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => url,
        _ => return MediaCandidate::new(raw, MediaKind::Unknown),
    };

    PROVIDERS
        .iter()
        .find(|provider| (provider.matches)(&parsed))
        .map(|provider| (provider.extract)(&parsed, raw))
        .unwrap_or_else(|| MediaCandidate::new(raw, MediaKind::PlainText))
}

/// Lower is preferred when several URLs compete inside one fragment.
fn precedence(kind: MediaKind) -> u8 {
    match kind {
        MediaKind::RedditVideoFallback => 0,
        MediaKind::RedditVideoPackaged => 1,
        MediaKind::RedGifs => 2,
        MediaKind::DirectVideo => 3,
        MediaKind::DirectGif | MediaKind::DirectImage => 4,
        MediaKind::PlainText => 5,
        MediaKind::Unknown => 6,
    }
}

/// Every URL mentioned by an HTML fragment, in document order, without repeats.
pub fn fragment_urls(html: &str) -> Vec<String> {
    let document = Html::parse_fragment(html);
    let mut urls: Vec<String> = Vec::new();
    let mut push = |url: String| {
        let url = url.trim().replace("&amp;", "&");
        if !url.is_empty() && !urls.contains(&url) {
            urls.push(url);
        }
    };

    for element in document.select(&EMBED_SELECTOR) {
        let value = element.value();
        if value.name() == "meta" {
            let key = value
                .attr("property")
                .or_else(|| value.attr("name"))
                .unwrap_or_default()
                .to_ascii_lowercase();
            if MEDIA_META.contains(&key.as_str()) {
                if let Some(content) = value.attr("content") {
                    push(content.to_string());
                }
            }
        } else if let Some(src) = value.attr("src") {
            push(src.to_string());
        }
    }

    for found in ABSOLUTE_URL.find_iter(html) {
        push(found.as_str().to_string());
    }
    urls
}

/// Best media candidate in an HTML fragment, by provider precedence then
/// document order.
pub fn classify_fragment(html: &str) -> Option<MediaCandidate> {
    fragment_urls(html)
        .iter()
        .map(|url| classify(url))
        .filter(|candidate| candidate.kind != MediaKind::Unknown)
        .enumerate()
        .min_by_key(|(index, candidate)| (precedence(candidate.kind), *index))
        .map(|(_, candidate)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reddit_video_renditions_share_an_id() {
        let low = classify("https://v.redd.it/abc123/DASH_240.mp4?source=fallback");
        let high = classify("https://v.redd.it/abc123/DASH_720.mp4?source=fallback");
        assert_eq!(low.kind, MediaKind::RedditVideoFallback);
        assert_eq!(low.canonical_id.as_deref(), Some("abc123"));
        assert_eq!(high.canonical_id, low.canonical_id);
        assert_eq!(low.quality_rank, Some(240));
        assert_eq!(high.quality_rank, Some(720));
    }

    #[test]
    fn packaged_media_rank_comes_from_res_token() {
        let c = classify("https://packaged-media.redd.it/xyz789/pb/m2-res_1080p.mp4?m=DASHPlaylist.mpd");
        assert_eq!(c.kind, MediaKind::RedditVideoPackaged);
        assert_eq!(c.canonical_id.as_deref(), Some("xyz789"));
        assert_eq!(c.quality_rank, Some(1080));
    }

    #[test]
    fn redgifs_is_self_contained_without_id() {
        let c = classify("https://www.redgifs.com/watch/happysleepycat");
        assert_eq!(c.kind, MediaKind::RedGifs);
        assert_eq!(c.canonical_id, None);
        let thumbs = classify("https://thumbs44.redgifs.com/HappySleepyCat.mp4");
        assert_eq!(thumbs.kind, MediaKind::RedGifs);
    }

    #[test]
    fn preview_width_is_the_quality() {
        let c = classify("https://preview.redd.it/pic01.jpg?width=1080&crop=smart&auto=webp");
        assert_eq!(c.kind, MediaKind::DirectImage);
        assert_eq!(c.canonical_id.as_deref(), Some("preview:pic01"));
        assert_eq!(c.quality_rank, Some(1080));
        let mp4 = classify("https://preview.redd.it/anim.gif?width=640&format=mp4&s=abc");
        assert_eq!(mp4.kind, MediaKind::DirectVideo);
        let gif = classify("https://preview.redd.it/anim.gif?width=640&s=abc");
        assert_eq!(gif.kind, MediaKind::DirectGif);
        assert_eq!(gif.canonical_id, mp4.canonical_id);
    }

    #[test]
    fn extensions_and_fallbacks() {
        assert_eq!(classify("https://i.imgur.com/abc.gifv").kind, MediaKind::DirectVideo);
        assert_eq!(classify("https://i.redd.it/abc.png").kind, MediaKind::DirectImage);
        assert_eq!(classify("https://i.redd.it/abc.gif").kind, MediaKind::DirectGif);
        assert_eq!(classify("https://example.com/article").kind, MediaKind::PlainText);
        assert_eq!(classify("not a url").kind, MediaKind::Unknown);
        assert_eq!(classify("ftp://example.com/a.mp4").kind, MediaKind::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        let url = "https://v.redd.it/abc123/CMAF_480.mp4";
        assert_eq!(classify(url), classify(url));
    }

    #[test]
    fn fragment_prefers_video_over_image() {
        let html = r#"<meta property="og:image" content="https://i.redd.it/thumb.jpg">
            <iframe src="https://www.redgifs.com/ifr/happysleepycat"></iframe>
            <meta property="og:image" content="https://i.redd.it/thumb.jpg">"#;
        let c = classify_fragment(html).unwrap();
        assert_eq!(c.kind, MediaKind::RedGifs);
        assert_eq!(c.source_url, "https://www.redgifs.com/ifr/happysleepycat");
    }

    #[test]
    fn fragment_urls_are_deduplicated_in_document_order() {
        let html = r#"<video src="https://a.example/x.mp4"></video>
            <script>var u = "https://a.example/x.mp4"; var v = "https://b.example/y.webm?a=1&amp;b=2";</script>"#;
        assert_eq!(
            fragment_urls(html),
            vec![
                "https://a.example/x.mp4".to_string(),
                "https://b.example/y.webm?a=1&b=2".to_string()
            ]
        );
        let c = classify_fragment(html).unwrap();
        assert_eq!(c.source_url, "https://a.example/x.mp4");
    }

    #[test]
    fn empty_fragment_yields_nothing() {
        assert!(classify_fragment("<p>nothing here</p>").is_none());
    }
}
