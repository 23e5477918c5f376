/// MQTT-style topic patterns
///
/// `+` matches exactly one `/`-delimited segment. A trailing `/#` matches
/// that level and everything below it, including nothing (`a/#` matches `a`).
/// A lone `#` matches every topic. Everything else is literal.

use crate::comms::types::CommsError;
use regex::Regex;

#[derive(Debug, Clone)]
pub struct TopicMatcher {
    pattern: String,
    regex: Regex,
}

impl TopicMatcher {
    pub fn new(pattern: &str) -> Result<Self, CommsError> {
        let source = if pattern == "#" {
            "^.*$".to_string()
        } else {
            let (body, tail) = match pattern.strip_suffix("/#") {
                Some(body) => (body, "(/.*)?"),
                None => (pattern, ""),
            };
            let segments: Vec<String> = body
                .split('/')
                .map(|segment| {
                    if segment == "+" {
                        "[^/]+".to_string()
                    } else {
                        regex::escape(segment)
                    }
                })
                .collect();
            format!("^{}{}$", segments.join("/"), tail)
        };

        let regex = Regex::new(&source).map_err(|source| CommsError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}
