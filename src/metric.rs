//! Output metric produced by decompiling a store response

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub measurement: String,
    /// Ordered as the grouping tags were configured
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, f64)>,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp,
        }
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }

    /// Render as an InfluxDB line protocol record (nanosecond precision)
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            let value = escape(value, &[',', '=', ' ']);
            // Empty tag values are not representable
            if value.is_empty() {
                continue;
            }
            line.push(',');
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&value);
        }

        line.push(' ');
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), value))
            .collect();
        line.push_str(&fields.join(","));

        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_millis() * 1_000_000);
        line.push(' ');
        line.push_str(&nanos.to_string());
        line
    }
}

/// Escape line protocol special characters
///
/// Line breaks would end the record, so they become (escaped) spaces. Other
/// control characters are dropped.
fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let c = match c {
            '\n' | '\r' => ' ',
            c if c.is_control() => continue,
            c => c,
        };
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_line_protocol_escaping() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut metric = Metric::new("cpu usage", ts);
        metric.tags.push(("host name".to_string(), "a,b".to_string()));
        metric.tags.push(("empty".to_string(), String::new()));
        metric.fields.push(("user".to_string(), 10.5));
        metric.fields.push(("idle".to_string(), 3.0));

        assert_eq!(
            metric.to_line_protocol(),
            "cpu\\ usage,host\\ name=a\\,b user=10.5,idle=3 1700000000000000000"
        );
    }

    #[test]
    fn test_line_breaks_do_not_split_record() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut metric = Metric::new("logs\r\n", ts);
        metric.tags.push(("path".to_string(), "/a\nb\u{0}".to_string()));
        metric.fields.push(("hits".to_string(), 2.0));

        let line = metric.to_line_protocol();
        assert!(!line.contains('\n'));
        assert!(!line.contains('\r'));
        assert_eq!(line, "logs\\ \\ ,path=/a\\ b hits=2 1700000000000000000");
    }

    #[test]
    fn test_lookup_helpers() {
        let mut metric = Metric::new("m", Utc::now());
        metric.tags.push(("host".to_string(), "a".to_string()));
        metric.fields.push(("cpu".to_string(), 1.0));

        assert_eq!(metric.tag("host"), Some("a"));
        assert_eq!(metric.tag("service"), None);
        assert_eq!(metric.field("cpu"), Some(1.0));
        assert_eq!(metric.field("mem"), None);
    }
}
