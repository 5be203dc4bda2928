pub mod handlers;
pub mod params;
pub mod server;

pub use handlers::{ApiError, AppState};
pub use params::{parse_range, parse_time, ParamError, RangeQuery};
pub use server::{build_router, run_server, ServerConfig};
