use once_cell::sync::Lazy;
use regex::Regex;

/// Debug tags and source tags share one shape.
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9-]{1,20}$").unwrap());

const MAX_SOURCE_TAGS: usize = 5;

/// The debugging switches: applied from the configuration at init, or
/// flipped at runtime through the public API.
#[derive(Clone, Debug, Default)]
pub struct DebugOptions {
    /// Print each outgoing envelope before submission.
    pub log_pings: bool,
    /// Value of the `X-Debug-ID` header, when set.
    pub debug_view_tag: Option<String>,
    /// Value of the `X-Source-Tags` header, when set.
    pub source_tags: Option<Vec<String>>,
}

impl DebugOptions {
    /// Sets the debug view tag. A tag violating the tag shape is ignored;
    /// returns whether the tag was accepted.
    pub fn set_debug_view_tag(&mut self, tag: &str) -> bool {
        if !TAG_PATTERN.is_match(tag) {
            log::debug!("Ignoring invalid debug view tag `{tag}`");
            return false;
        }
        self.debug_view_tag = Some(tag.to_string());
        true
    }

    /// Sets the source tags. At most 5 tags, each matching the tag shape;
    /// an invalid set is ignored wholesale. Returns whether the tags were
    /// accepted.
    pub fn set_source_tags(&mut self, tags: Vec<String>) -> bool {
        if tags.is_empty()
            || tags.len() > MAX_SOURCE_TAGS
            || !tags.iter().all(|tag| TAG_PATTERN.is_match(tag))
        {
            log::debug!("Ignoring invalid source tags {tags:?}");
            return false;
        }
        self.source_tags = Some(tags);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_view_tags_are_validated() {
        let mut options = DebugOptions::default();
        assert!(options.set_debug_view_tag("test-tag-01"));
        assert_eq!(Some("test-tag-01".into()), options.debug_view_tag);

        assert!(!options.set_debug_view_tag("spaces are bad"));
        assert!(!options.set_debug_view_tag(""));
        assert!(!options.set_debug_view_tag("this-tag-is-way-too-long-to-pass"));
        // The previous valid tag survives rejected updates.
        assert_eq!(Some("test-tag-01".into()), options.debug_view_tag);
    }

    #[test]
    fn source_tags_are_validated_wholesale() {
        let mut options = DebugOptions::default();
        assert!(options.set_source_tags(vec!["automation".into(), "perf".into()]));
        assert_eq!(2, options.source_tags.as_ref().unwrap().len());

        assert!(!options.set_source_tags(vec![]));
        assert!(!options.set_source_tags(vec!["ok".into(), "not ok".into()]));
        assert!(!options.set_source_tags(vec![
            "one".into(),
            "two".into(),
            "three".into(),
            "four".into(),
            "five".into(),
            "six".into(),
        ]));
        assert_eq!(2, options.source_tags.as_ref().unwrap().len());
    }
}
