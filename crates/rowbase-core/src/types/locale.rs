//! Display locale.

/// A BCP 47 language tag used only to pick number and date conventions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    tag: String,
}

impl Default for Locale {
    fn default() -> Self {
        Self::new("en-US")
    }
}

impl Locale {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn language(&self) -> &str {
        self.tag.split(['-', '_']).next().unwrap_or("en")
    }

    pub fn decimal_separator(&self) -> char {
        match self.language() {
            "de" | "es" | "fr" | "it" | "pt" | "nl" | "tr" | "ru" | "pl" => ',',
            _ => '.',
        }
    }

    /// strftime pattern for a calendar date.
    pub fn date_pattern(&self) -> &'static str {
        if self.tag.eq_ignore_ascii_case("en-US") {
            "%m/%d/%Y"
        } else if matches!(self.language(), "en" | "es" | "fr" | "it" | "pt" | "nl") {
            "%d/%m/%Y"
        } else if self.language() == "de" {
            "%d.%m.%Y"
        } else {
            "%Y-%m-%d"
        }
    }

    pub fn format_number(&self, value: f64, decimals: Option<u8>) -> String {
        let plain = match decimals {
            Some(d) => format!("{:.*}", usize::from(d), value),
            None => super::value::format_plain_number(value),
        };
        match self.decimal_separator() {
            '.' => plain,
            sep => plain.replace('.', &sep.to_string()),
        }
    }
}
