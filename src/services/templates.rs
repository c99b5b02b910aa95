//! `{{ var }}` placeholder rendering and email template checks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::Settings;
use crate::domain::accounts::full_name;

pub type Context = BTreeMap<String, String>;

/// Variables an email template may reference.
pub const KNOWN_VARIABLES: [&str; 11] = [
    "user_name",
    "user_email",
    "project_title",
    "admin_name",
    "site_name",
    "site_url",
    "current_date",
    "current_time",
    "reason",
    "resolution",
    "complaint_id",
];

/// A `{{ name }}` occurrence: byte range in the source and the trimmed name.
struct Placeholder<'a> {
    start: usize,
    end: usize,
    name: &'a str,
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn placeholders(source: &str) -> Vec<Placeholder<'_>> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(open) = source[cursor..].find("{{") {
        let start = cursor + open;
        let Some(close) = source[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        let name = source[start + 2..end - 2].trim();
        if is_identifier(name) {
            found.push(Placeholder { start, end, name });
            cursor = end;
        } else {
            cursor = start + 2;
        }
    }
    found
}

/// Substitutes known placeholders; unknown ones are left as written.
pub fn render(source: &str, context: &Context) -> String {
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for p in placeholders(source) {
        if let Some(value) = context.get(p.name) {
            out.push_str(&source[last..p.start]);
            out.push_str(value);
            last = p.end;
        }
    }
    out.push_str(&source[last..]);
    out
}

/// Distinct placeholder names in order of first appearance.
pub fn variables(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for p in placeholders(source) {
        if !names.iter().any(|n| n == p.name) {
            names.push(p.name.to_string());
        }
    }
    names
}

/// Name and email of someone a template is rendered for
#[derive(Debug, Clone, Copy)]
pub struct Person<'a> {
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
}

impl Person<'_> {
    fn display_name(&self) -> String {
        let name = full_name(self.first_name, self.last_name);
        if name.is_empty() {
            self.email.to_string()
        } else {
            name
        }
    }
}

pub fn default_context(
    settings: &Settings,
    now: DateTime<Utc>,
    user: Option<Person<'_>>,
    admin: Option<Person<'_>>,
) -> Context {
    let mut context = Context::new();
    context.insert("site_name".into(), settings.site_name.clone());
    context.insert("site_url".into(), settings.site_url.clone());
    context.insert("current_date".into(), now.format("%d.%m.%Y").to_string());
    context.insert("current_time".into(), now.format("%H:%M").to_string());

    if let Some(user) = user {
        context.insert("user_name".into(), user.display_name());
        context.insert("user_email".into(), user.email.to_string());
        context.insert("user_first_name".into(), user.first_name.to_string());
        context.insert("user_last_name".into(), user.last_name.to_string());
    }

    if let Some(admin) = admin {
        context.insert("admin_name".into(), admin.display_name());
        context.insert("admin_email".into(), admin.email.to_string());
    }

    context
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TemplateValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub variables_found: Vec<String>,
}

pub fn validate_email_template(html: &str) -> TemplateValidation {
    let lower = html.to_lowercase();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !lower.trim_start().starts_with("<!doctype") {
        warnings.push("Add a DOCTYPE for better client compatibility".to_string());
    }
    if !lower.contains("<title") {
        warnings.push("Add a <title> tag".to_string());
    }
    if !lower.contains("<table") {
        warnings.push("Table-based layout renders more reliably in email clients".to_string());
    }
    if lower.contains("<style") || lower.contains("rel=\"stylesheet\"") {
        warnings.push("Prefer inline styles over <style> blocks and stylesheets".to_string());
    }

    let variables_found = variables(html);
    let unknown: Vec<&str> = variables_found
        .iter()
        .map(String::as_str)
        .filter(|v| !KNOWN_VARIABLES.contains(v))
        .collect();
    if !unknown.is_empty() {
        errors.push(format!("Unknown variables: {}", unknown.join(", ")));
    }

    TemplateValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
        variables_found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx(pairs: &[(&str, &str)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_both_placeholder_spacings() {
        let context = ctx(&[("user_name", "Ana"), ("site_name", "HandshakeMe")]);
        assert_eq!(
            render("Hi {{user_name}}, welcome to {{ site_name }}!", &context),
            "Hi Ana, welcome to HandshakeMe!"
        );
    }

    #[test]
    fn unknown_placeholders_stay_intact() {
        let context = ctx(&[("user_name", "Ana")]);
        assert_eq!(
            render("{{ user_name }} / {{missing}} / {{ not valid }} / {{", &context),
            "Ana / {{missing}} / {{ not valid }} / {{"
        );
    }

    #[test]
    fn default_context_fields() {
        let settings = crate::config::tests::test_settings();
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 0).unwrap();
        let user = Person {
            first_name: "",
            last_name: "",
            email: "u@example.com",
        };
        let admin = Person {
            first_name: "Sam",
            last_name: "Lee",
            email: "sam@example.com",
        };
        let context = default_context(&settings, now, Some(user), Some(admin));
        assert_eq!(context["current_date"], "05.03.2024");
        assert_eq!(context["current_time"], "14:07");
        assert_eq!(context["user_name"], "u@example.com");
        assert_eq!(context["admin_name"], "Sam Lee");
        assert_eq!(context["site_name"], "HandshakeMe");
    }

    #[test]
    fn validation_flags_unknown_variables_as_errors() {
        let result = validate_email_template("<p>{{user_name}} {{ coupon_code }}</p>");
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["Unknown variables: coupon_code".to_string()]);
        assert_eq!(result.variables_found, vec!["user_name", "coupon_code"]);
        assert_eq!(result.warnings.len(), 3);
    }

    #[test]
    fn well_formed_template_has_no_findings() {
        let html = "<!DOCTYPE html><html><head><title>Hi</title></head>\
                    <body><table><tr><td style=\"color:red\">{{ site_name }}</td></tr></table></body></html>";
        let result = validate_email_template(html);
        assert!(result.valid);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn style_blocks_warn() {
        let html = "<!DOCTYPE html><title>x</title><style>p{}</style><table></table>";
        let result = validate_email_template(html);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }
}
