pub mod extract;
pub mod response;

pub use extract::{Json, Query};
pub use response::{page_params, ApiResponse, Page};
