pub mod mailjet;

pub use mailjet::{LogMailer, MailResult, Mailer, MailjetClient};
