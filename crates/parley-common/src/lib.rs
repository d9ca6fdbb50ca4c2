pub mod error;
pub mod turn;

pub use error::{Error, Result};
pub use turn::{
    ContentPart, IMAGE_PLACEHOLDER, ImageUrl, Turn, TurnContent, TurnRole, decode_history,
    encode_history,
};
