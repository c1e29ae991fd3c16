//! Grapheme-cluster segmentation and n-gram windows.
//!
//! The corpus is built over extended grapheme clusters (UAX #29), so queries
//! must be segmented the same way. Iterating code points instead would
//! silently disagree with the corpus on scripts that use combining marks.

use unicode_segmentation::UnicodeSegmentation;

/// Split a query into its ordered extended grapheme clusters.
pub fn clusters(query: &str) -> Vec<&str> {
    query.graphemes(true).collect()
}

/// Fixed-length n-grams over a cluster sequence, each concatenated back into
/// a string for corpus lookup.
///
/// Yields nothing when fewer than `size` clusters are available. `size` must
/// be nonzero.
pub fn ngrams<'a>(clusters: &'a [&'a str], size: usize) -> impl Iterator<Item = String> + 'a {
    clusters.windows(size).map(|window| window.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_clusters() {
        assert_eq!(clusters("hello"), vec!["h", "e", "l", "l", "o"]);
    }

    #[test]
    fn combining_mark_is_one_cluster() {
        // 'e' + combining acute accent
        let text = "e\u{301}f";
        assert_eq!(clusters(text).len(), 2);
        assert_eq!(clusters(text)[0], "e\u{301}");
    }

    #[test]
    fn zwj_emoji_is_one_cluster() {
        assert_eq!(clusters("\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}").len(), 1);
    }

    #[test]
    fn crlf_is_one_cluster() {
        assert_eq!(clusters("a\r\nb").len(), 3);
    }

    #[test]
    fn empty_query_has_no_clusters() {
        assert!(clusters("").is_empty());
    }

    #[test]
    fn bigram_windows() {
        let c = clusters("hello");
        let grams: Vec<String> = ngrams(&c, 2).collect();
        assert_eq!(grams, vec!["he", "el", "ll", "lo"]);
    }

    #[test]
    fn window_longer_than_input_yields_nothing() {
        let c = clusters("hi");
        assert_eq!(ngrams(&c, 5).count(), 0);
    }

    #[test]
    fn ngrams_respect_cluster_boundaries() {
        // The accented cluster must stay whole inside every window.
        let c = clusters("ae\u{301}b");
        let grams: Vec<String> = ngrams(&c, 2).collect();
        assert_eq!(grams, vec!["ae\u{301}", "e\u{301}b"]);
    }
}
