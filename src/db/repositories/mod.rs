pub mod article_repository;
pub mod tag_repository;

pub use article_repository::*;
pub use tag_repository::*;
