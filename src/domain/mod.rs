//! Domain types and DTOs
//!
//! Entities, request/response shapes, validation rules and the small pieces
//! of pure business logic (state transitions, rating maths, scoring) that
//! the route handlers lean on.

/// Display and FromStr for snake_case serde enums stored as TEXT columns.
macro_rules! string_enum {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    let s = serde_json::to_string(self).unwrap_or_default();
                    write!(f, "{}", s.trim_matches('"'))
                }
            }

            impl std::str::FromStr for $ty {
                type Err = String;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    serde_json::from_value(serde_json::Value::String(s.to_string()))
                        .map_err(|_| format!("Unknown {}: {}", stringify!($ty), s))
                }
            }
        )+
    };
}

/// `numerator / denominator × 100`, 0 when the denominator is 0.
pub fn percentage(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Escapes LIKE wildcards and the backslash escape character so user text
/// matches literally.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Substring pattern for `ILIKE`.
pub fn contains_pattern(text: &str) -> String {
    format!("%{}%", escape_like(text))
}

pub mod accounts;
pub mod admin;
pub mod advertisements;
pub mod chat;
pub mod contractors;
pub mod moderation;
pub mod notifications;
pub mod projects;
pub mod reviews;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_guards_zero_denominator() {
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(round2(33.33333), 33.33);
    }

    #[test]
    fn like_wildcards_match_literally() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(contains_pattern("plumb"), "%plumb%");
        assert_eq!(contains_pattern("%"), "%\\%%");
    }
}
