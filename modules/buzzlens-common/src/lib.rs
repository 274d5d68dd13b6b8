pub mod config;
pub mod error;
pub mod questions;
pub mod taxonomy;
pub mod types;

pub use config::Config;
pub use error::BuzzError;
pub use questions::QuestionSet;
pub use taxonomy::{Taxonomy, TaxonomyEntry};
pub use types::*;
