mod authorize;

pub use authorize::{register_routes, AuthorizePayload};
