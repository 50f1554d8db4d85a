pub mod inbound;
pub mod response;

pub use inbound::{apply_inbound, InboundError};
pub use response::write_response;
