use unicode_segmentation::UnicodeSegmentation;

const MAX_CHAR_LENGHT: usize = 120;
const FORBIDDEN_CHARS: [char; 2] = ['<', '>'];

#[derive(Debug, serde::Serialize)]
pub struct QuoteAuthor(String);

impl QuoteAuthor {
    pub fn parse(author: String) -> Result<QuoteAuthor, String> {
        let author = author.trim().to_string();
        let is_empty = author.is_empty();
        let is_too_long = author.graphemes(true).count() > MAX_CHAR_LENGHT;
        let contains_forbidden_chars = author.chars().any(|char| FORBIDDEN_CHARS.contains(&char));

        if is_empty || is_too_long || contains_forbidden_chars {
            return Err(format!("{} is not a valid quote author", author));
        }

        Ok(Self(author))
    }
}

impl AsRef<str> for QuoteAuthor {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
