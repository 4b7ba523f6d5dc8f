use unicode_segmentation::UnicodeSegmentation;

const MAX_CHAR_LENGHT: usize = 120;
const FORBIDDEN_CHARS: [char; 2] = ['<', '>'];

/// The field a quote belongs to, e.g. "science" or "philosophy".
#[derive(Debug, serde::Serialize)]
pub struct QuoteArea(String);

impl QuoteArea {
    pub fn parse(area: String) -> Result<QuoteArea, String> {
        let area = area.trim().to_string();
        let is_empty = area.is_empty();
        let is_too_long = area.graphemes(true).count() > MAX_CHAR_LENGHT;
        let contains_forbidden_chars = area.chars().any(|char| FORBIDDEN_CHARS.contains(&char));

        if is_empty || is_too_long || contains_forbidden_chars {
            return Err(format!("{} is not a valid quote area", area));
        }

        Ok(Self(area))
    }
}

impl AsRef<str> for QuoteArea {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::QuoteArea;
    use claim::{assert_err, assert_ok};

    #[test]
    fn test_area_empty_is_invalid() {
        assert_err!(QuoteArea::parse(String::from("   ")));
    }

    #[test]
    fn test_area_valid() {
        assert_ok!(QuoteArea::parse(String::from("philosophy")));
    }
}
