pub mod datapoint;
pub mod path;
pub mod value;

pub use datapoint::Datapoint;
pub use path::{PathError, StreamPath};
pub use value::{DataType, Value};
