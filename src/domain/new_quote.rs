use actix_web::web;
use serde::Deserialize;

use crate::domain::quote_area::QuoteArea;
use crate::domain::quote_author::QuoteAuthor;
use crate::domain::quote_text::QuoteText;

pub struct NewQuote {
    pub text: QuoteText,
    pub author: QuoteAuthor,
    pub area: QuoteArea,
}

#[derive(Deserialize)]
pub struct NewQuoteBody {
    pub text: String,
    pub author: String,
    pub area: String,
}

impl TryFrom<web::Json<NewQuoteBody>> for NewQuote {
    type Error = String;

    fn try_from(body: web::Json<NewQuoteBody>) -> Result<Self, Self::Error> {
        let text = QuoteText::parse(body.text.clone())?;
        let author = QuoteAuthor::parse(body.author.clone())?;
        let area = QuoteArea::parse(body.area.clone())?;

        Ok(NewQuote { text, author, area })
    }
}
