pub mod articles;
pub mod auth;
pub mod categories;
pub mod comments;
pub mod media;
pub mod messages;
pub mod moments;
pub mod projects;
pub mod tags;
