//! Public hostname template, e.g. `{hash}.app.example.org`.

use regex::Regex;

use crate::errors::{ProxyError, Result};

/// A hostname pattern with a `{hash}` placeholder.
#[derive(Clone, Debug)]
pub struct HostTemplate {
    template: String,
    pattern: Regex,
}

impl HostTemplate {
    /// Compile `template`. Every `{name}` placeholder matches one DNS label.
    pub fn new(template: &str) -> Result<Self> {
        let invalid = |detail: &str| ProxyError::Template {
            template: template.to_string(),
            detail: detail.to_string(),
        };
        let mut pattern = String::from("^");
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            pattern.push_str(&regex::escape(&rest[..open]));
            let close = rest[open..].find('}').ok_or_else(|| invalid("unclosed placeholder"))? + open;
            let name = &rest[open + 1..close];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(invalid("bad placeholder name"));
            }
            pattern.push_str(&format!("(?P<{name}>[^.]+)"));
            rest = &rest[close + 1..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let pattern = Regex::new(&pattern).map_err(|e| invalid(&e.to_string()))?;
        if pattern.capture_names().flatten().all(|n| n != "hash") {
            return Err(invalid("missing {hash}"));
        }
        Ok(Self {
            template: template.to_string(),
            pattern,
        })
    }

    /// Hostname for `hash`.
    pub fn render(&self, hash: &str) -> String {
        self.template.replace("{hash}", hash)
    }

    /// The hash embedded in `host`, if `host` matches.
    pub fn extract<'h>(&self, host: &'h str) -> Option<&'h str> {
        self.pattern
            .captures(host)
            .and_then(|c| c.name("hash"))
            .map(|m| m.as_str())
            .filter(|h| !h.is_empty())
    }
}
