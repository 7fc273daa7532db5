// Adapters to the outside world: the HTTP authority service and table files

pub mod authority_http;
pub mod delimited;

pub use authority_http::HttpAuthorityService;
pub use delimited::{read_table, write_table, TableFormat};
