/// Background services: notification dispatch, liveness probing, email delivery
pub mod dispatcher;
pub mod email;
pub mod prober;

pub use dispatcher::{DispatchReport, Dispatcher, NotificationQueue};
pub use email::{DisabledEmailSender, EmailError, EmailSender, SmtpEmailSender};
pub use prober::{LivenessProber, SweepReport};
