use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{BackendError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: String,
    pub content_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

/// Outbound mail
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Check the transport is usable before a send
    async fn verify(&self) -> Result<()>;

    /// Deliver a message and return its Message-ID
    async fn send(&self, message: &MailMessage) -> Result<String>;
}

/// Pipes messages to a local `sendmail -t -i`
pub struct SendmailTransport {
    program: PathBuf,
}

impl SendmailTransport {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl MailTransport for SendmailTransport {
    async fn verify(&self) -> Result<()> {
        let meta = tokio::fs::metadata(&self.program).await.map_err(|e| {
            BackendError::Mail(format!("{} unavailable: {}", self.program.display(), e))
        })?;
        if !meta.is_file() {
            return Err(BackendError::Mail(format!(
                "{} is not a file",
                self.program.display()
            )));
        }
        Ok(())
    }

    async fn send(&self, message: &MailMessage) -> Result<String> {
        let message_id = new_message_id(&message.from);
        let mime = render_mime(message, &message_id);

        let mut child = Command::new(&self.program)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(mime.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(BackendError::Mail(format!(
                "sendmail exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!(to = %message.to, %message_id, "mail handed to sendmail");
        Ok(message_id)
    }
}

/// Writes each message as an `.eml` file into a directory
pub struct SpoolTransport {
    dir: PathBuf,
}

impl SpoolTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MailTransport for SpoolTransport {
    async fn verify(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let meta = tokio::fs::metadata(&self.dir).await?;
        if meta.permissions().readonly() {
            return Err(BackendError::Mail(format!(
                "spool directory {} is read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }

    async fn send(&self, message: &MailMessage) -> Result<String> {
        let message_id = new_message_id(&message.from);
        let name = format!(
            "{}_{}.eml",
            Utc::now().format("%Y%m%dT%H%M%S"),
            uuid::Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);
        tokio::fs::write(&path, render_mime(message, &message_id)).await?;
        debug!(path = %path.display(), %message_id, "mail spooled");
        Ok(message_id)
    }
}

fn new_message_id(from: &str) -> String {
    let domain = from
        .rsplit_once('@')
        .map(|(_, d)| d.trim_end_matches('>'))
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    format!("<{}@{}>", uuid::Uuid::new_v4(), domain)
}

/// Render a `multipart/mixed` message: the HTML body followed by each
/// attachment, base64-encoded
pub fn render_mime(message: &MailMessage, message_id: &str) -> String {
    let boundary = format!("=_logwarden_{}", uuid::Uuid::new_v4().simple());
    let mut out = String::new();

    out.push_str(&format!("From: {}\r\n", header_value(&message.from)));
    out.push_str(&format!("To: {}\r\n", header_value(&message.to)));
    out.push_str(&format!("Subject: {}\r\n", header_value(&message.subject)));
    out.push_str(&format!("Date: {}\r\n", Utc::now().to_rfc2822()));
    out.push_str(&format!("Message-ID: {}\r\n", message_id));
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
        boundary
    ));

    out.push_str(&format!("--{}\r\n", boundary));
    out.push_str("Content-Type: text/html; charset=utf-8\r\n");
    out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
    push_base64(&mut out, message.html.as_bytes());

    for attachment in &message.attachments {
        out.push_str(&format!("--{}\r\n", boundary));
        out.push_str(&format!(
            "Content-Type: {}; name=\"{}\"\r\n",
            attachment.content_type, attachment.filename
        ));
        out.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n",
            attachment.filename
        ));
        out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        push_base64(&mut out, attachment.content.as_bytes());
    }

    out.push_str(&format!("--{}--\r\n", boundary));
    out
}

/// Control characters would end the header early
fn header_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Base64 wrapped at 76 columns
fn push_base64(out: &mut String, bytes: &[u8]) {
    let encoded = STANDARD.encode(bytes);
    for chunk in encoded.as_bytes().chunks(76) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> MailMessage {
        MailMessage {
            from: "logwarden@example.com".to_string(),
            to: "ops@example.com".to_string(),
            subject: "Scheduled Error Report (daily)".to_string(),
            html: "<h1>Report</h1>".to_string(),
            attachments: vec![Attachment {
                filename: "report_daily.html".to_string(),
                content: "<h1>Report</h1>".to_string(),
                content_type: "text/html".to_string(),
            }],
        }
    }

    #[test]
    fn test_render_mime_headers_and_parts() {
        let mime = render_mime(&message(), "<id@example.com>");
        assert!(mime.contains("To: ops@example.com\r\n"));
        assert!(mime.contains("Message-ID: <id@example.com>\r\n"));
        assert!(mime.contains("filename=\"report_daily.html\""));
        assert!(mime.contains(&STANDARD.encode("<h1>Report</h1>")));
        assert!(mime.trim_end().ends_with("--"));
    }

    #[test]
    fn test_header_values_cannot_add_headers() {
        let mut msg = message();
        msg.to = "ops@example.com\r\nBcc: attacker@example.net".to_string();
        let mime = render_mime(&msg, "<id@example.com>");
        assert!(mime.contains("To: ops@example.com  Bcc: attacker@example.net\r\n"));
        assert!(!mime.contains("\r\nBcc:"));
    }

    #[test]
    fn test_message_id_uses_sender_domain() {
        assert!(new_message_id("a@example.org").ends_with("@example.org>"));
        assert!(new_message_id("nobody").ends_with("@localhost>"));
    }

    #[tokio::test]
    async fn test_spool_writes_eml() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SpoolTransport::new(dir.path().join("outbox"));
        spool.verify().await.unwrap();

        let id = spool.send(&message()).await.unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("outbox"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
        let body = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(body.contains(&id));
    }

    #[tokio::test]
    async fn test_sendmail_verify_missing_binary() {
        let transport = SendmailTransport::new("/nonexistent/sendmail");
        assert!(matches!(transport.verify().await, Err(BackendError::Mail(_))));
    }
}
