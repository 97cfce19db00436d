pub mod article;
pub mod category;
pub mod comment;
pub mod media;
pub mod message;
pub mod moment;
pub mod project;
pub mod tag;
pub mod user;
