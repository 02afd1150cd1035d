use serde::{Deserialize, Serialize};

pub const UNKNOWN_COUNT_DISPLAY: &str = "--";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerCount {
    pub value: u64,
    pub display: String,
}

/// The three count fields the ranking API may carry, in order of trust.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountFields<'a> {
    pub precise: Option<&'a str>,
    pub display_value: Option<String>,
    pub primary: Option<&'a str>,
}

impl CountFields<'_> {
    pub fn resolve(&self) -> ViewerCount {
        parse_viewer_count(&self.pick())
    }

    fn pick(&self) -> String {
        if let Some(precise) = self.precise {
            let trimmed = precise.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        if let Some(display) = &self.display_value {
            let trimmed = display.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        self.primary.unwrap_or("0").to_string()
    }
}

/// A `+` suffix marks a floor estimate ("400+"); the floor is reported as the count.
pub fn parse_viewer_count(raw: &str) -> ViewerCount {
    let cleaned = if raw.contains('+') {
        raw.replace('+', "")
    } else {
        raw.to_string()
    };
    match cleaned.trim().parse::<u64>() {
        Ok(value) => ViewerCount {
            value,
            display: value.to_string(),
        },
        Err(_) => ViewerCount {
            value: 0,
            display: UNKNOWN_COUNT_DISPLAY.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plus_suffix_resolves_to_floor() {
        let count = parse_viewer_count("400+");
        assert_eq!(count.value, 400);
        assert_eq!(count.display, "400");
    }

    #[test]
    fn plain_and_padded_numbers_parse() {
        assert_eq!(parse_viewer_count("1234").value, 1234);
        assert_eq!(parse_viewer_count(" 56 ").value, 56);
    }

    #[test]
    fn unparseable_counts_fall_back_to_placeholder() {
        for raw in ["1.2万", "", "abc", "-3"] {
            let count = parse_viewer_count(raw);
            assert_eq!(count.value, 0, "{raw}");
            assert_eq!(count.display, UNKNOWN_COUNT_DISPLAY, "{raw}");
        }
    }

    #[test]
    fn precise_field_wins_when_present() {
        let fields = CountFields {
            precise: Some(" 812 "),
            display_value: Some("700".to_string()),
            primary: Some("500+"),
        };
        assert_eq!(fields.resolve().value, 812);
    }

    #[test]
    fn blank_precise_falls_through_to_display_value() {
        let fields = CountFields {
            precise: Some("   "),
            display_value: Some("700".to_string()),
            primary: Some("500+"),
        };
        assert_eq!(fields.resolve().value, 700);
    }

    #[test]
    fn blank_display_value_falls_through_to_primary() {
        let fields = CountFields {
            precise: None,
            display_value: Some(String::new()),
            primary: Some("500"),
        };
        let count = fields.resolve();
        assert_eq!(count.value, 500);
        assert_eq!(count.display, "500");
    }

    #[test]
    fn primary_field_is_last_resort() {
        let fields = CountFields {
            precise: None,
            display_value: None,
            primary: Some("500+"),
        };
        assert_eq!(fields.resolve().value, 500);
        assert_eq!(CountFields::default().resolve().value, 0);
        assert_eq!(CountFields::default().resolve().display, "0");
    }
}
