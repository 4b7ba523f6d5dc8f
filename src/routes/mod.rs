mod digests;
mod health_check;
mod quotes;
mod signup;
mod submit;
mod unsubscribe;

pub use digests::handle_trigger_digest;
pub use health_check::health_check;
pub use quotes::handle_random_quote;
pub use signup::handle_signup;
pub use submit::handle_submit_quote;
pub use unsubscribe::handle_unsubscribe;
