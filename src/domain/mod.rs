pub mod new_quote;
pub mod new_subscriber;
pub mod quote;
pub mod quote_area;
pub mod quote_author;
pub mod quote_text;
pub mod subscriber;
pub mod subscriber_email;
