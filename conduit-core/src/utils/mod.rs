pub mod logging;
pub mod ndjson;
pub mod path;
