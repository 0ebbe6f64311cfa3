pub mod guards;

pub use guards::{issue_token, verify_token, AuthedUser, Claims};
