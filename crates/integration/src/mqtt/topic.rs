use crate::{IntegrationError, Result};
use common::domain::DevEui;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.?(ApplicationID|DevEUI)\s*\}\}")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// MQTT topic template with `{{ .ApplicationID }}` and `{{ .DevEUI }}` placeholders.
#[derive(Debug, Clone)]
pub struct TopicTemplate {
    template: String,
    capture: Regex,
}

impl TopicTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let remainder = PLACEHOLDER.replace_all(template, "");
        if remainder.contains("{{") || remainder.contains("}}") {
            return Err(IntegrationError::Config(format!(
                "unknown placeholder in topic template '{}'",
                template
            )));
        }
        if template.contains('#') || template.contains('+') {
            return Err(IntegrationError::Config(format!(
                "topic template '{}' must not contain wildcards",
                template
            )));
        }

        let mut pattern = String::from("^");
        let mut last = 0;
        let mut seen_application = false;
        let mut seen_dev_eui = false;
        for captures in PLACEHOLDER.captures_iter(template) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            pattern.push_str(&regex::escape(&template[last..whole.start()]));
            match name.as_str() {
                "ApplicationID" if !seen_application => {
                    seen_application = true;
                    pattern.push_str("(?P<application_id>[0-9]+)");
                }
                "ApplicationID" => pattern.push_str("[0-9]+"),
                _ if !seen_dev_eui => {
                    seen_dev_eui = true;
                    pattern.push_str("(?P<dev_eui>[0-9a-fA-F]{16})");
                }
                _ => pattern.push_str("[0-9a-fA-F]{16}"),
            }
            last = whole.end();
        }
        pattern.push_str(&regex::escape(&template[last..]));
        pattern.push('$');

        let capture = Regex::new(&pattern).map_err(|e| IntegrationError::Config(e.to_string()))?;
        Ok(Self {
            template: template.to_string(),
            capture,
        })
    }

    /// Parses a template used for subscribing. Both placeholders must each fill a whole level.
    pub fn parse_subscription(template: &str) -> Result<Self> {
        let parsed = Self::parse(template)?;
        let names = ["application_id", "dev_eui"];
        if names
            .iter()
            .any(|name| !parsed.capture.capture_names().flatten().any(|n| n == *name))
        {
            return Err(IntegrationError::Config(format!(
                "topic template '{}' must contain ApplicationID and DevEUI",
                template
            )));
        }
        let subscription = parsed.subscription();
        if subscription
            .split('/')
            .any(|level| level.contains('+') && level != "+")
        {
            return Err(IntegrationError::Config(format!(
                "placeholders in topic template '{}' must span a whole topic level",
                template
            )));
        }
        Ok(parsed)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn render(&self, application_id: i64, dev_eui: &DevEui) -> String {
        PLACEHOLDER
            .replace_all(&self.template, |captures: &Captures| match &captures[1] {
                "ApplicationID" => application_id.to_string(),
                _ => dev_eui.to_string(),
            })
            .into_owned()
    }

    /// The template with every placeholder replaced by the single-level wildcard.
    pub fn subscription(&self) -> String {
        PLACEHOLDER.replace_all(&self.template, "+").into_owned()
    }

    /// Extracts the application id and DevEUI from a topic matching this template.
    pub fn capture(&self, topic: &str) -> Option<(i64, DevEui)> {
        let captures = self.capture.captures(topic)?;
        let application_id = captures.name("application_id")?.as_str().parse().ok()?;
        let dev_eui = captures.name("dev_eui")?.as_str().parse().ok()?;
        Some((application_id, dev_eui))
    }
}
