pub mod documents;
pub mod text;
