pub mod directive;
pub mod scanner;
pub mod token;

pub use directive::Directive;
pub use scanner::{tokenize, Scanner};
pub use token::{Token, TokenKind};
