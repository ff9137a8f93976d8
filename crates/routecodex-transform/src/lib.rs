pub mod count_tokens;
pub mod generate_content;
pub mod get_model;
pub mod list_models;
pub mod middleware;
pub mod stream2nostream;
pub mod switch;
