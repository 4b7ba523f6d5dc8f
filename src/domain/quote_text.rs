use unicode_segmentation::UnicodeSegmentation;

const MAX_CHAR_LENGHT: usize = 1000;
const FORBIDDEN_CHARS: [char; 2] = ['<', '>'];

#[derive(Debug, serde::Serialize)]
pub struct QuoteText(String);

impl QuoteText {
    pub fn parse(text: String) -> Result<QuoteText, String> {
        let text = text.trim().to_string();
        let is_empty = text.is_empty();
        let is_too_long = text.graphemes(true).count() > MAX_CHAR_LENGHT;
        let contains_forbidden_chars = text.chars().any(|char| FORBIDDEN_CHARS.contains(&char));

        if is_empty || is_too_long || contains_forbidden_chars {
            return Err(format!("{} is not a valid quote text", text));
        }

        Ok(Self(text))
    }
}

impl AsRef<str> for QuoteText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
