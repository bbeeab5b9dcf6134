//! `[key]` interpolation for output paths and data-source aliases.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::paths::{PATH_KEYS, PathInfo, normalize_path};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\w+?)\]").expect("placeholder regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Key(String),
}

/// A path template compiled once at manifest parse time.
#[derive(Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Compile a template, rejecting unknown keys.
    pub fn compile(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut last = 0;

        for captures in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(key)) = (captures.get(0), captures.get(1)) else {
                continue;
            };

            if !PATH_KEYS.contains(&key.as_str()) {
                return Err(format!(
                    "unknown placeholder [{}] (expected one of: {})",
                    key.as_str(),
                    PATH_KEYS.join(", ")
                ));
            }

            if whole.start() > last {
                segments.push(Segment::Literal(source[last..whole.start()].to_string()));
            }
            segments.push(Segment::Key(key.as_str().to_string()));
            last = whole.end();
        }

        if last < source.len() {
            segments.push(Segment::Literal(source[last..].to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Apply the template to classified path metadata.
    pub fn render(&self, info: &PathInfo) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Key(key) => out.push_str(info.get(key).unwrap_or_default()),
            }
        }
        normalize_path(&out)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the template contains no placeholders.
    pub fn is_static(&self) -> bool {
        !self.segments.iter().any(|s| matches!(s, Segment::Key(_)))
    }
}

impl fmt::Debug for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathTemplate").field(&self.source).finish()
    }
}
