pub use super::email_validations::Entity as EmailValidations;
pub use super::forgot_passwords::Entity as ForgotPasswords;
pub use super::users::Entity as Users;
pub use super::utub_members::Entity as UtubMembers;
pub use super::utubs::Entity as Utubs;
