pub mod access;
pub mod identity;
pub mod operator;

pub use access::{AccessDescriptor, Action, Grant};
pub use identity::{Identity, Role, UserRegistry};
pub use operator::{AuthOperator, DatabaseOperator, Operator, OperatorError};
