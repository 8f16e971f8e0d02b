#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: &'static str },

    #[error("Unexpected {found:?} at byte {position}, expected {expected}")]
    UnexpectedChar {
        found: char,
        position: usize,
        expected: &'static str,
    },

    #[error("Invalid branch length {text:?} at byte {position}")]
    InvalidLength { text: String, position: usize },

    #[error("Malformed annotation {text:?} at byte {position}")]
    InvalidAnnotation { text: String, position: usize },

    #[error("Bracket opened at byte {position} is never closed")]
    UnclosedBracket { position: usize },

    #[error("Quoted label opened at byte {position} is never closed")]
    UnclosedQuote { position: usize },

    #[error("Unexpected input after ';' at byte {position}")]
    TrailingInput { position: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
