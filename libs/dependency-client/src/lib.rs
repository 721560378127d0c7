mod http;
mod memory;
mod resolver;

pub use http::{DEFAULT_TIMEOUT, HttpDependencyClient};
pub use memory::MemoryDependencyClient;
pub use resolver::DataFormatClient;
