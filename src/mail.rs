//! Credential mail: sends each family their students' account details
//! over SMTP.

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, SmtpConfig};
use crate::db::{Database, DatabaseError, Parent, Student};

const SUBJECT: &str = "Canvas Student Accounts";
const SEND_DELAY: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Message build error: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Mail configuration error: {0}")]
    Config(String),
}

pub type MailResult<T> = Result<T, MailError>;

/// Which parents to mail. `resume_from` skips parents up to and including
/// the given CRM id, for picking up after an interrupted run.
#[derive(Debug, Default, Clone)]
pub struct SendFilter {
    pub resume_from: Option<String>,
    pub surname: Option<String>,
}

pub struct Mailer {
    db: Arc<Database>,
    config: Arc<Config>,
    smtp: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl Mailer {
    pub fn new(db: Arc<Database>, config: Arc<Config>) -> MailResult<Self> {
        let smtp = config
            .smtp
            .clone()
            .ok_or_else(|| MailError::Config("smtp settings are not configured".to_string()))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?
            .port(smtp.port)
            .credentials(Credentials::new(
                smtp.username.clone(),
                smtp.password.clone(),
            ))
            .authentication(vec![Mechanism::Plain, Mechanism::Login])
            .build();
        Ok(Self {
            db,
            config,
            smtp,
            transport,
        })
    }

    /// Students old enough for their own account. Primary students share
    /// their parents' access instead.
    fn eligible(&self, student: &Student) -> bool {
        student.active
            && student
                .grade_level(self.config.grad_year())
                .map(|g| g > 2)
                .unwrap_or(false)
    }

    async fn credential_message(&self, parent: &Parent) -> MailResult<Option<Message>> {
        let students: Vec<Student> = self
            .db
            .parent_students(&parent.crm_id)
            .await?
            .into_iter()
            .filter(|s| self.eligible(s))
            .collect();
        if students.is_empty() {
            return Ok(None);
        }
        let Some(to_email) = parent.email.clone() else {
            warn!("Parent {} has no email address", parent.crm_id);
            return Ok(None);
        };

        let mut text = String::from(
            "Dear Parents,\n\
             Student Canvas accounts are now ready. Students can log in with \
             the school account credentials below.\n\
             If any of the account recovery contact info given below is \
             incorrect, please respond to this email with the correction.\n",
        );
        let mut html = String::from(
            "<div>Dear Parents,\
             <div>Student Canvas accounts are now ready. Students can log in \
             with the school account credentials below.</div>\
             <div>If any of the account recovery contact info given below is \
             incorrect, please respond to this email with the correction.</div>\
             <div><br></div>",
        );

        for student in &students {
            let email = student.email.clone().unwrap_or_default();
            let recovery = self
                .db
                .student_parents(&student.sis_id)
                .await?
                .into_iter()
                .next();
            let recovery_phone = recovery
                .as_ref()
                .and_then(|p| p.phone.clone())
                .unwrap_or_default();
            let recovery_email = recovery
                .as_ref()
                .and_then(|p| p.email.clone())
                .unwrap_or_default();

            text.push_str(&format!(
                "\n{} {}\n{email}\n",
                student.common_name, student.last_name
            ));
            html.push_str(&format!(
                "<div>{} {}</div><div><a href=\"mailto:{email}\">{email}</a></div>",
                student.common_name, student.last_name
            ));

            match &student.password {
                Some(password) => {
                    text.push_str(&format!(
                        "The temporary password for this account is {password}\n\
                         Please log in at https://accounts.google.com and set a \
                         password before logging into Canvas. The recovery phone \
                         number and email for this account are "
                    ));
                    html.push_str(&format!(
                        "<div>The temporary password for this account is \
                         <font face=\"monospace\">{password}</font><br>\
                         Please log in at <a href=\"https://accounts.google.com\">\
                         https://accounts.google.com</a> and set a password before \
                         logging into Canvas. The recovery phone number and email \
                         for this account are "
                    ));
                }
                None => {
                    text.push_str(
                        "The password for this account has already been set. To \
                         reset it, go to https://accounts.google.com and follow \
                         the \"Forgot Password\" prompts. The recovery phone \
                         number and email for this account are ",
                    );
                    html.push_str(
                        "<div>The password for this account has already been set. \
                         To reset it, go to <a href=\"https://accounts.google.com\">\
                         https://accounts.google.com</a> and follow the \
                         &quot;Forgot Password&quot; prompts. The recovery phone \
                         number and email for this account are ",
                    );
                }
            }
            text.push_str(&format!("{recovery_phone} and {recovery_email}, respectively.\n"));
            html.push_str(&format!(
                "{recovery_phone} and <a href=\"mailto:{recovery_email}\">\
                 {recovery_email}</a>, respectively.</div><br>"
            ));
        }
        html.push_str("</div>");

        let to = Mailbox::new(
            Some(format!("{} {}", parent.first_name, parent.last_name)),
            to_email.parse()?,
        );
        let message = Message::builder()
            .from(self.smtp.from_address.parse()?)
            .to(to)
            .subject(SUBJECT)
            .multipart(MultiPart::alternative_plain_html(text, html))?;
        Ok(Some(message))
    }

    /// Send credential mail to every active parent with eligible students.
    /// Returns the number of messages sent.
    pub async fn send_credentials(&self, filter: &SendFilter) -> MailResult<usize> {
        let mut parents = self.db.active_parents().await?;
        parents.sort_by(|a, b| a.crm_id.cmp(&b.crm_id));

        let mut skipping = filter.resume_from.is_some();
        let mut sent = 0;
        for parent in &parents {
            if skipping {
                if Some(&parent.crm_id) == filter.resume_from.as_ref() {
                    skipping = false;
                }
                continue;
            }
            if let Some(surname) = &filter.surname {
                if !parent.last_name.eq_ignore_ascii_case(surname) {
                    continue;
                }
            }
            let Some(message) = self.credential_message(parent).await? else {
                continue;
            };
            match self.transport.send(message).await {
                Ok(_) => {
                    sent += 1;
                    info!("Sent credentials to parent {}", parent.crm_id);
                }
                Err(e) => warn!("Failed to send to parent {}: {e}", parent.crm_id),
            }
            tokio::time::sleep(SEND_DELAY).await;
        }
        info!("{sent} credential emails sent");
        Ok(sent)
    }
}
