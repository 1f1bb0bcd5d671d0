pub mod identity_service;
pub mod identity_service_impl;

pub use identity_service::{
    ExpiredValidationOutcome, ForgotPasswordOutcome, IdentityError, IdentityService, LoginOutcome,
    RedeemValidationOutcome, RegisterOutcome, ResetPasswordOutcome, ResetTokenCheck,
    SendValidationOutcome,
};
pub use identity_service_impl::SeaOrmIdentityService;
