mod authorization;

pub use authorization::{
    ApproveAll, AuthorizationOutcome, AuthorizationPolicy, AuthorizationService,
};
