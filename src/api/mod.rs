//! Shared response envelopes and pagination for list endpoints.

pub mod pagination;
pub mod response;

pub use pagination::{Paginated, PaginationParams};
pub use response::{Created, DataResponse, MessageResponse, NoContent};
