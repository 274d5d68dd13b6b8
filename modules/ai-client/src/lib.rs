pub mod error;
pub mod openai;
pub mod schema;
pub mod traits;
pub mod util;

pub use error::AiError;
pub use openai::OpenAi;
pub use schema::response_schema;
pub use traits::{ChatCompletion, ChatModel, Message, MessageRole};
pub use util::extract_fenced_json;
