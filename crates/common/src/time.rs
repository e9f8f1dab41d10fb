use chrono::{DateTime, Utc};

// HTTP dates are RFC 1123 ("Sun, 06 Nov 1994 08:49:37 GMT"), which RFC 2822 parsing accepts
pub fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}
