use std::sync::OnceLock;

use regex::Regex;

use crate::clients::ChapterItem;

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bchapter\b[/-](\d+(?:\.\d+)?)/?(?:[?#].*)?$").unwrap()
    })
}

fn number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").unwrap())
}

/// Canonical chapter number for a discovered item. The URL wins over the
/// item weight, which wins over the title: titles carry noise like
/// "SIDE 1" or "END" that parses into wrong numbers.
pub fn resolve(item: &ChapterItem) -> Option<f64> {
    if let Some(n) = from_url(&item.url) {
        return Some(n);
    }
    if let Some(weight) = item.weight {
        if weight >= 0.0 {
            return Some(weight);
        }
    }
    first_number(&item.title)
}

pub fn from_url(url: &str) -> Option<f64> {
    url_pattern()
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub fn first_number(text: &str) -> Option<f64> {
    number_pattern()
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, url: &str, weight: Option<f64>) -> ChapterItem {
        ChapterItem {
            title: title.to_string(),
            url: url.to_string(),
            date: None,
            weight,
        }
    }

    #[test]
    fn url_beats_noisy_title() {
        let chapter = item(
            "SIDE 1 - The Beginning",
            "https://asura.gg/solo-leveling/chapter-112/",
            None,
        );
        assert_eq!(resolve(&chapter), Some(112.0));
    }

    #[test]
    fn fractional_numbers_survive() {
        assert_eq!(
            from_url("https://asura.gg/x/chapter-36.5"),
            Some(36.5)
        );
        assert_eq!(from_url("https://asura.gg/x/chapter/36.5/"), Some(36.5));
    }

    #[test]
    fn url_match_is_case_insensitive_and_anchored() {
        assert_eq!(from_url("https://a.b/x/Chapter-7"), Some(7.0));
        // "chapter-3" mid-path is not the trailing segment.
        assert_eq!(from_url("https://a.b/chapter-3/extras"), None);
    }

    #[test]
    fn weight_fills_in_when_url_is_opaque() {
        let chapter = item("Oneshot", "https://a.b/read/83172", Some(12.0));
        assert_eq!(resolve(&chapter), Some(12.0));

        let negative = item("Oneshot", "https://a.b/read/83172", Some(-1.0));
        assert_eq!(resolve(&negative), None);
    }

    #[test]
    fn title_is_the_last_resort() {
        let chapter = item("Chapter 45: Revenge", "https://a.b/read/opaque", None);
        assert_eq!(resolve(&chapter), Some(45.0));

        let nothing = item("Prologue", "https://a.b/read/opaque", None);
        assert_eq!(resolve(&nothing), None);
    }
}
