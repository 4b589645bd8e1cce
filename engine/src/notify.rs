//! Run report delivery.
//!
//! The notifier renders a `RunReport` as one HTML document and hands it to a
//! `Mailer`. Nothing is sent for a run that processed no files. `GraphMailer`
//! delivers through Microsoft Graph using the client-credentials flow.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MailConfig;
use crate::error::NotifyError;
use crate::model::TransferStatus;
use crate::report::RunReport;

/// A rendered report email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Outbound mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError>;
}

/// What the notifier did with a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Sent { recipient: String },
    /// No files were processed anywhere
    SkippedEmpty,
    /// Mail settings are absent
    SkippedUnconfigured,
}

/// Renders and sends run reports to a fixed sender/recipient pair.
pub struct Notifier<'a> {
    mailer: &'a dyn Mailer,
    from: String,
    to: String,
    subject_template: String,
}

impl<'a> Notifier<'a> {
    pub fn new(mailer: &'a dyn Mailer, config: &MailConfig) -> Self {
        Notifier {
            mailer,
            from: config.from.clone(),
            to: config.to.clone(),
            subject_template: config.subject_template.clone(),
        }
    }

    /// Build the message for `report` without sending it.
    pub fn compose(&self, report: &RunReport) -> MailMessage {
        MailMessage {
            from: self.from.clone(),
            to: self.to.clone(),
            subject: render_subject(&self.subject_template, report),
            html_body: render_html(report),
        }
    }

    /// Send the report, unless it is empty.
    pub async fn notify(&self, report: &RunReport) -> Result<NotificationOutcome, NotifyError> {
        if report.total_processed() == 0 {
            info!("no files were processed; skipping report email");
            return Ok(NotificationOutcome::SkippedEmpty);
        }

        let message = self.compose(report);
        self.mailer.send(&message).await?;
        info!(recipient = %self.to, processed = report.total_processed(), "report email sent");
        Ok(NotificationOutcome::Sent {
            recipient: self.to.clone(),
        })
    }
}

/// Fill `{processed}`, `{succeeded}`, `{failed}` and `{date}` in a subject template.
pub fn render_subject(template: &str, report: &RunReport) -> String {
    template
        .replace("{processed}", &report.total_processed().to_string())
        .replace("{succeeded}", &report.total_succeeded().to_string())
        .replace("{failed}", &report.total_failed().to_string())
        .replace("{date}", &report.started_at.format("%Y-%m-%d").to_string())
}

/// Render the report body.
pub fn render_html(report: &RunReport) -> String {
    let mut html = String::new();
    html.push_str("<h3>Azure to GCS File Transfer Report</h3>\n");
    html.push_str(&format!(
        "<p>Run {} started {}.</p>\n",
        report.run_id,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    for group in report.groups() {
        html.push_str(&format!("<h4>{}</h4>\n", escape(&group.prefix)));

        if let Some(error) = &group.listing_error {
            html.push_str(&format!(
                "<p class=\"listing-failed\" style=\"color:#b00020\">Listing failed: {}</p>\n",
                escape(error)
            ));
            continue;
        }
        if group.records.is_empty() {
            html.push_str("<p>No files found.</p>\n");
            continue;
        }

        html.push_str("<table border=\"1\" cellpadding=\"4\" cellspacing=\"0\">\n");
        html.push_str("<tr><th>File</th><th>Status</th><th>Detail</th></tr>\n");
        for record in &group.records {
            let (class, style) = match record.status {
                TransferStatus::Success => ("success", ""),
                TransferStatus::Failed => ("failed", " style=\"background:#fde7e9;color:#b00020\""),
            };
            let detail = match (&record.error_detail, &record.checksum) {
                (Some(error), _) => escape(error),
                (None, Some(checksum)) => escape(&checksum.to_string_with_algo()),
                (None, None) => String::new(),
            };
            html.push_str(&format!(
                "<tr class=\"record {}\"{}><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                class,
                style,
                escape(&record.file_name),
                record.status,
                detail
            ));
        }
        html.push_str("</table>\n");
    }

    html.push_str(&format!(
        "<p><strong>Total processed: {}, succeeded: {}, failed: {}</strong></p>\n",
        report.total_processed(),
        report.total_succeeded(),
        report.total_failed()
    ));
    html
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

const AUTHORITY: &str = "https://login.microsoftonline.com";
const GRAPH: &str = "https://graph.microsoft.com/v1.0";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Microsoft Graph `sendMail` transport.
pub struct GraphMailer {
    client: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority: String,
    graph: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest<'a> {
    message: GraphMessage<'a>,
    save_to_sent_items: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage<'a> {
    subject: &'a str,
    body: ItemBody<'a>,
    to_recipients: Vec<Recipient<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody<'a> {
    content_type: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient<'a> {
    email_address: EmailAddress<'a>,
}

#[derive(Serialize)]
struct EmailAddress<'a> {
    address: &'a str,
}

impl<'a> SendMailRequest<'a> {
    fn from_message(message: &'a MailMessage) -> Self {
        SendMailRequest {
            message: GraphMessage {
                subject: &message.subject,
                body: ItemBody {
                    content_type: "HTML",
                    content: &message.html_body,
                },
                to_recipients: vec![Recipient {
                    email_address: EmailAddress {
                        address: &message.to,
                    },
                }],
            },
            save_to_sent_items: true,
        }
    }
}

impl GraphMailer {
    pub fn new(config: &MailConfig) -> Self {
        GraphMailer {
            client: reqwest::Client::new(),
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authority: AUTHORITY.to_string(),
            graph: GRAPH.to_string(),
        }
    }

    /// Override the login and Graph base URLs (national clouds, proxies).
    pub fn with_endpoints(mut self, authority: impl Into<String>, graph: impl Into<String>) -> Self {
        self.authority = authority.into();
        self.graph = graph.into();
        self
    }

    async fn acquire_token(&self) -> Result<String, NotifyError> {
        let url = endpoint(&self.authority, &[self.tenant_id.as_str(), "oauth2", "v2.0", "token"])?;
        let response: TokenResponse = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .map_err(NotifyError::Token)?
            .json()
            .await
            .map_err(NotifyError::Token)?;

        match response.access_token {
            Some(token) => Ok(token),
            None => Err(NotifyError::TokenMissing(
                response
                    .error_description
                    .unwrap_or_else(|| "no error description".to_string()),
            )),
        }
    }
}

/// `base` with each of `segments` appended as one percent-encoded path segment.
fn endpoint(base: &str, segments: &[&str]) -> Result<reqwest::Url, NotifyError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| NotifyError::Endpoint(format!("{}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| NotifyError::Endpoint(format!("{} cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl Mailer for GraphMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError> {
        let token = self.acquire_token().await?;
        debug!("acquired Graph access token");

        let url = endpoint(&self.graph, &["users", message.from.as_str(), "sendMail"])?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&SendMailRequest::from_message(message))
            .send()
            .await
            .map_err(NotifyError::Send)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!("{}: {}", status, body)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{ChecksumAlgorithm, ChecksumValue};
    use crate::model::{TransferRecord, TransferStep};
    use crate::testing::RecordingMailer;
    use httpmock::prelude::*;
    use serde_json::json;

    fn mail_config() -> MailConfig {
        MailConfig {
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            from: "relay@example.com".into(),
            to: "ops@example.com".into(),
            subject_template: "Relay {date}: {processed} files, {failed} failed".into(),
        }
    }

    fn record(prefix: &str, name: &str, ok: bool) -> TransferRecord {
        TransferRecord {
            source_prefix: prefix.into(),
            file_name: name.into(),
            source_path: format!("{}{}", prefix, name),
            destination_path: format!("upload/{}{}", prefix, name),
            archive_path: format!("{}{}", prefix, name),
            status: if ok { TransferStatus::Success } else { TransferStatus::Failed },
            failed_step: if ok { None } else { Some(TransferStep::ArchiveCopy) },
            error_detail: if ok { None } else { Some(format!("archive copy to {}{} failed: <timeout>", prefix, name)) },
            bytes_transferred: 1,
            checksum: None,
        }
    }

    fn mixed_report(successes: usize, failures: usize) -> RunReport {
        let mut report = RunReport::new();
        report.begin_prefix("marketing/");
        report.begin_prefix("finance/");
        for i in 0..successes {
            let prefix = if i % 2 == 0 { "marketing/" } else { "finance/" };
            report.record(record(prefix, &format!("ok-{}.csv", i), true));
        }
        for i in 0..failures {
            let prefix = if i % 2 == 0 { "finance/" } else { "marketing/" };
            report.record(record(prefix, &format!("bad-{}.csv", i), false));
        }
        report
    }

    fn section<'h>(html: &'h str, prefix: &str) -> &'h str {
        let start = html.find(&format!("<h4>{}</h4>", prefix)).expect("section present");
        let rest = &html[start + 4..];
        let end = rest.find("<h4>").or_else(|| rest.find("<p><strong>")).unwrap_or(rest.len());
        &rest[..end]
    }

    #[test]
    fn test_report_lists_every_record_grouped_by_prefix() {
        let (n, m) = (5, 3);
        let report = mixed_report(n, m);
        let html = render_html(&report);

        assert_eq!(html.matches("<tr class=\"record").count(), n + m);
        assert_eq!(html.matches("<tr class=\"record failed\"").count(), m);

        let marketing = section(&html, "marketing/");
        let finance = section(&html, "finance/");
        for r in report.groups()[0].records.iter() {
            assert!(marketing.contains(&r.file_name));
        }
        for r in report.groups()[1].records.iter() {
            assert!(finance.contains(&r.file_name));
        }
        assert!(!marketing.contains("ok-1.csv"), "finance files stay in the finance section");

        assert_eq!(report.total_processed(), n + m);
        assert_eq!(report.total_failed(), m);
        assert!(html.contains("Total processed: 8, succeeded: 5, failed: 3"));
    }

    #[test]
    fn test_failures_carry_escaped_detail() {
        let report = mixed_report(0, 1);
        let html = render_html(&report);
        assert!(html.contains("failed: &lt;timeout&gt;"));
        assert!(!html.contains("<timeout>"));
    }

    #[test]
    fn test_listing_failure_and_empty_prefix_sections() {
        let mut report = RunReport::new();
        report.begin_prefix("shipping/");
        report.record_listing_failure("engineering/", "403 <denied>");
        let html = render_html(&report);
        assert!(html.contains("<h4>shipping/</h4>\n<p>No files found.</p>"));
        assert!(html.contains("Listing failed: 403 &lt;denied&gt;"));
    }

    #[test]
    fn test_checksum_shown_for_verified_success() {
        let mut report = RunReport::new();
        let mut verified = record("finance/", "v.csv", true);
        verified.checksum = Some(ChecksumValue::new(ChecksumAlgorithm::Md5, "abc123".into()));
        report.record(verified);
        assert!(render_html(&report).contains("<td>md5:abc123</td>"));
    }

    #[test]
    fn test_subject_template() {
        let report = mixed_report(2, 1);
        let subject = render_subject(&mail_config().subject_template, &report);
        let date = report.started_at.format("%Y-%m-%d").to_string();
        assert_eq!(subject, format!("Relay {}: 3 files, 1 failed", date));
    }

    #[tokio::test]
    async fn test_empty_report_sends_nothing() {
        let mailer = RecordingMailer::new();
        let notifier = Notifier::new(&mailer, &mail_config());
        let mut report = RunReport::new();
        report.begin_prefix("marketing/");
        report.record_listing_failure("finance/", "denied");

        let outcome = notifier.notify(&report).await.expect("notify");
        assert_eq!(outcome, NotificationOutcome::SkippedEmpty);
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_report_sent_to_fixed_pair() {
        let mailer = RecordingMailer::new();
        let notifier = Notifier::new(&mailer, &mail_config());
        let report = mixed_report(1, 0);

        let outcome = notifier.notify(&report).await.expect("notify");
        assert_eq!(
            outcome,
            NotificationOutcome::Sent {
                recipient: "ops@example.com".into()
            }
        );
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "relay@example.com");
        assert_eq!(sent[0].to, "ops@example.com");
        assert!(sent[0].html_body.contains("ok-0.csv"));
    }

    #[tokio::test]
    async fn test_send_failure_propagates() {
        let mailer = RecordingMailer::rejecting();
        let notifier = Notifier::new(&mailer, &mail_config());
        let result = notifier.notify(&mixed_report(1, 0)).await;
        assert!(matches!(result, Err(NotifyError::Rejected(_))));
    }

    #[test]
    fn test_graph_payload_shape() {
        let message = MailMessage {
            from: "relay@example.com".into(),
            to: "ops@example.com".into(),
            subject: "Report".into(),
            html_body: "<p>hi</p>".into(),
        };
        let payload = serde_json::to_value(SendMailRequest::from_message(&message)).expect("serialize");
        assert_eq!(payload["message"]["subject"], "Report");
        assert_eq!(payload["message"]["body"]["contentType"], "HTML");
        assert_eq!(payload["message"]["body"]["content"], "<p>hi</p>");
        assert_eq!(
            payload["message"]["toRecipients"][0]["emailAddress"]["address"],
            "ops@example.com"
        );
        assert_eq!(payload["saveToSentItems"], true);
    }

    #[test]
    fn test_token_error_response_parses() {
        let parsed: TokenResponse = serde_json::from_str(
            r#"{"error":"invalid_client","error_description":"AADSTS7000215: bad secret"}"#,
        )
        .expect("parse");
        assert!(parsed.access_token.is_none());
        assert_eq!(parsed.error_description.as_deref(), Some("AADSTS7000215: bad secret"));
    }

    #[test]
    fn test_endpoint_encodes_each_segment() {
        let url = endpoint(
            "https://graph.microsoft.com/v1.0",
            &["users", "ops team/x?y@example.com", "sendMail"],
        )
        .expect("url");
        assert_eq!(
            url.as_str(),
            "https://graph.microsoft.com/v1.0/users/ops%20team%2Fx%3Fy@example.com/sendMail"
        );

        let trailing = endpoint("https://login.example.com/", &["tenant", "token"]).expect("url");
        assert_eq!(trailing.as_str(), "https://login.example.com/tenant/token");

        assert!(matches!(
            endpoint("not a url", &["users"]),
            Err(NotifyError::Endpoint(_))
        ));
    }

    fn graph_mailer(server: &MockServer) -> GraphMailer {
        GraphMailer::new(&mail_config()).with_endpoints(server.base_url(), server.url("/v1.0"))
    }

    fn sample_message() -> MailMessage {
        MailMessage {
            from: "relay@example.com".into(),
            to: "ops@example.com".into(),
            subject: "Report".into(),
            html_body: "<p>hi</p>".into(),
        }
    }

    #[tokio::test]
    async fn test_graph_mailer_sends_with_bearer_token() {
        let server = MockServer::start_async().await;
        let token = server
            .mock_async(|when, then| {
                when.method(POST).path("/tenant/oauth2/v2.0/token");
                then.status(200)
                    .json_body(json!({"access_token": "tok-123", "token_type": "Bearer"}));
            })
            .await;
        let send = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1.0/users/relay@example.com/sendMail")
                    .header("authorization", "Bearer tok-123")
                    .json_body(json!({
                        "message": {
                            "subject": "Report",
                            "body": {"contentType": "HTML", "content": "<p>hi</p>"},
                            "toRecipients": [{"emailAddress": {"address": "ops@example.com"}}]
                        },
                        "saveToSentItems": true
                    }));
                then.status(202);
            })
            .await;

        graph_mailer(&server)
            .send(&sample_message())
            .await
            .expect("send should succeed");

        token.assert_async().await;
        send.assert_async().await;
    }

    #[tokio::test]
    async fn test_graph_mailer_token_without_access_token() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/tenant/oauth2/v2.0/token");
                then.status(401).json_body(json!({
                    "error": "invalid_client",
                    "error_description": "AADSTS7000215: bad secret"
                }));
            })
            .await;

        let result = graph_mailer(&server).send(&sample_message()).await;
        match result {
            Err(NotifyError::TokenMissing(detail)) => assert!(detail.contains("bad secret")),
            other => panic!("expected missing token, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_graph_mailer_rejected_send() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/tenant/oauth2/v2.0/token");
                then.status(200).json_body(json!({"access_token": "tok-123"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1.0/users/relay@example.com/sendMail");
                then.status(403).body("ErrorAccessDenied");
            })
            .await;

        let result = graph_mailer(&server).send(&sample_message()).await;
        match result {
            Err(NotifyError::Rejected(detail)) => {
                assert!(detail.contains("403"));
                assert!(detail.contains("ErrorAccessDenied"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
