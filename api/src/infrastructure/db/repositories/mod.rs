pub mod access_repository_sqlx;
pub mod author_repository_sqlx;
pub mod document_repository_sqlx;
pub mod timeline_repository_sqlx;
pub mod user_repository_sqlx;
