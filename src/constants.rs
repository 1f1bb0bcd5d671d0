pub const HOME_ROUTE: &str = "/home";

pub const SPLASH_ROUTE: &str = "/";

pub const CONFIRM_EMAIL_ROUTE: &str = "/confirm-email";

pub mod roles {

    pub const USER: &str = "user";

    pub const MODERATOR: &str = "moderator";

    pub const ADMIN: &str = "admin";
}

/// JSON `error_code` values. Flat space shared by the identity routes.
pub mod error_codes {

    /// Account exists but its email has not been validated yet.
    pub const ACCOUNT_EMAIL_NOT_VALIDATED: i32 = 1;

    /// Primary failure code for a route's main error response.
    pub const ROUTE_ERROR: i32 = 1;

    /// Field-level validation failed; see the `errors` map.
    pub const FORM_VALIDATION: i32 = 2;

    /// Inter-send gap not elapsed (one minute between validation emails).
    pub const MAX_TIME_EMAIL_VALIDATION_ATTEMPTS: i32 = 3;

    /// Hourly cap on validation emails reached.
    pub const MAX_TOTAL_EMAIL_VALIDATION_ATTEMPTS: i32 = 4;

    /// Mailjet rejected the send (4xx).
    pub const EMAIL_SEND_FAILURE: i32 = 5;

    /// Mailjet itself failed (5xx).
    pub const MAILJET_SERVER_FAILURE: i32 = 6;
}

pub mod messages {

    pub const ACCOUNT_EMAIL_NOT_VALIDATED: &str =
        "An account already exists with that information but the email has not been validated.";

    pub const UNABLE_TO_REGISTER: &str = "Unable to register with that information.";

    pub const UNABLE_TO_LOGIN: &str = "Unable to login with that information.";

    pub const VALIDATE_YOUR_EMAIL: &str = "Validate Your Email!";

    pub const EMAIL_SENT: &str = "Email sent!";

    pub const TOO_MANY_ATTEMPTS: &str = "Too many attempts, please wait 1 hour.";

    pub const EMAIL_SEND_FAILURE: &str = "Email could not be sent.";

    pub const MAILJET_FAILURE: &str = "Error with Mailjet service.";

    pub const RESET_EMAIL_NEUTRAL: &str =
        "If you entered a valid email, you should receive a reset password link soon.";

    pub const EMAIL_NOT_VALID: &str = "Email is not valid.";

    pub const PASSWORD_RESET: &str = "Password reset.";

    pub const COULD_NOT_RESET_PASSWORD: &str = "Could not reset the password.";

    pub const VALIDATION_EXPIRED: &str =
        "That validation link has expired. A new one has been issued, try again.";

    pub const MISSING_CSRF: &str = "Missing or invalid CSRF token.";

    pub const USERNAME_TAKEN: &str = "That username is already taken.";

    pub const EMAIL_TAKEN: &str = "That email address is already in use.";

    pub const USER_NOT_EXIST: &str = "That user does not exist.";

    pub const INVALID_PASSWORD: &str = "Invalid password.";
}
