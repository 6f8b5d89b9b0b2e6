//! PowerScribe 360 RAS client.
//!
//! Epistemic foundation:
//! - K_i: RAS exposes Session, Explorer and Report services over SOAP 1.2
//! - K_i: SignIn returns an AccountSession header that authorizes later calls
//! - B_i: RAS will respond within timeout (might fail)
//! - B_i: Response will be a well-formed envelope (might fail)
//! - I^B: Network availability unknowable → retry with backoff

use crate::client::soap::{self, Envelope, field, node};
use crate::client::xml::{XmlDocument, XmlElement};
use crate::models::{
    Config, Credentials, OrderSummary, Ps360Error, ReportEvent, Result, SignInResult, SoapError,
    format_xs_datetime, parse_xs_datetime,
};
use chrono::{DateTime, FixedOffset};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, info, warn};

/// RAS service endpoints used by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Session,
    Explorer,
    Report,
}

impl Service {
    fn path(&self) -> &'static str {
        match self {
            Self::Session => "Session.svc",
            Self::Explorer => "Explorer.svc",
            Self::Report => "Report.svc",
        }
    }

    fn contract(&self) -> &'static str {
        match self {
            Self::Session => "ISession",
            Self::Explorer => "IExplorer",
            Self::Report => "IReport",
        }
    }
}

/// The AccountSession header captured at sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSession {
    /// Session identifier (header text)
    pub id: String,
    /// Header element exactly as RAS sent it; replayed on every call
    pub raw: String,
}

/// Values reported to RAS at sign-in.
#[derive(Debug, Clone)]
struct SignInSettings {
    version: String,
    locale: String,
    time_zone_id: String,
    workstation: String,
}

/// PowerScribe 360 RAS client.
///
/// Holds at most one AccountSession at a time.
pub struct PowerscribeClient {
    http: reqwest::Client,
    base_url: String,
    namespace: String,
    addressing: bool,
    timeout: Duration,
    max_retries: u32,
    site_id: i64,
    settings: SignInSettings,
    session: Option<AccountSession>,
}

impl PowerscribeClient {
    /// Create a client from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let ps = &config.powerscribe;
        let host = config.resolve_host()?;
        let timeout = Duration::from_secs(ps.timeout_secs);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Ps360Error::Network)?;

        Ok(Self {
            http,
            base_url: format!("{}://{}/RAS", ps.scheme, host.trim_end_matches('/')),
            namespace: ps.namespace.clone(),
            addressing: ps.addressing,
            timeout,
            max_retries: ps.max_retries.max(1),
            site_id: ps.site_id,
            settings: SignInSettings {
                version: ps.version.clone(),
                locale: ps.locale.clone(),
                time_zone_id: ps.time_zone_id.clone(),
                workstation: ps.workstation.clone(),
            },
            session: None,
        })
    }

    /// Current session, if signed in.
    pub fn session(&self) -> Option<&AccountSession> {
        self.session.as_ref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }

    fn url(&self, service: Service) -> String {
        format!("{}/{}", self.base_url, service.path())
    }

    fn action(&self, service: Service, operation: &str) -> String {
        format!("{}{}/{}", self.namespace, service.contract(), operation)
    }

    /// Send one operation and return the parsed response envelope.
    ///
    /// B_i(RAS available) → Result
    /// I^B(transient failure) → exponential backoff
    async fn call(
        &self,
        service: Service,
        operation: &str,
        params: &[String],
        authenticated: bool,
    ) -> Result<XmlDocument> {
        let mut headers = Vec::new();
        if authenticated {
            let session = self.session.as_ref().ok_or(Ps360Error::NotSignedIn)?;
            headers.push(session.raw.clone());
        }

        let envelope = Envelope {
            action: self.action(service, operation),
            to: self.url(service),
            headers,
            body: format!(
                r#"<{operation} xmlns="{}">{}</{operation}>"#,
                self.namespace,
                params.concat()
            ),
        };
        let content_type = envelope.content_type();
        let url = envelope.to.clone();

        let mut last_error: Option<Ps360Error> = None;

        for attempt in 0..self.max_retries {
            // A fresh MessageID per attempt
            let payload = envelope.to_xml(self.addressing);

            match self.send(&url, &content_type, payload).await {
                Ok(doc) => return Ok(doc),
                Err(e) if e.is_retryable() => {
                    if attempt < self.max_retries - 1 {
                        let backoff = Duration::from_secs(2u64.pow(attempt));
                        debug!(
                            operation = operation,
                            attempt = attempt,
                            backoff_secs = backoff.as_secs(),
                            error = %e,
                            "Retrying SOAP call"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Ps360Error::Soap(SoapError::MaxRetriesExceeded {
            attempts: self.max_retries,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
        }))
    }

    async fn send(&self, url: &str, content_type: &str, payload: String) -> Result<XmlDocument> {
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Ps360Error::Timeout(self.timeout)
                } else {
                    Ps360Error::Network(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(Ps360Error::Network)?;

        // Faults arrive with 500; surface them as faults, not HTTP errors
        match XmlDocument::parse(body.clone()) {
            Ok(doc) => {
                if let Some(fault) = soap::fault(&doc.root) {
                    return Err(fault.into());
                }
                if !status.is_success() {
                    return Err(SoapError::HttpStatus {
                        status: status.as_u16(),
                        body: truncate(&body, 500),
                    }
                    .into());
                }
                Ok(doc)
            }
            Err(_) if !status.is_success() => Err(SoapError::HttpStatus {
                status: status.as_u16(),
                body: truncate(&body, 500),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Sign in and capture the AccountSession header.
    pub async fn sign_in(&mut self, credentials: &Credentials) -> Result<SignInResult> {
        let params = [
            field("loginName", &credentials.username),
            field("password", &credentials.password),
            field("adminMode", false),
            field("version", &self.settings.version),
            field("workstation", &self.settings.workstation),
            field("locale", &self.settings.locale),
            field("timeZoneId", &self.settings.time_zone_id),
        ];
        let doc = self.call(Service::Session, "SignIn", &params, false).await?;

        let header = doc
            .root
            .find(&["Header", "AccountSession"])
            .ok_or(SoapError::MissingSessionHeader)?;
        let session = AccountSession {
            id: header.text_content(),
            raw: header.raw(&doc.source).to_string(),
        };

        let result = operation_result(&doc.root, "SignIn")?;
        let sign_in = SignInResult {
            account_id: parse_i64(result, "AccountID")?,
            first_name: result
                .find(&["Person", "FirstName"])
                .map(|e| e.text.trim().to_string())
                .unwrap_or_default(),
            last_name: result
                .find(&["Person", "LastName"])
                .map(|e| e.text.trim().to_string())
                .unwrap_or_default(),
        };

        info!(
            first_name = %sign_in.first_name,
            last_name = %sign_in.last_name,
            account_id = sign_in.account_id,
            session_id = %session.id,
            "New Powerscribe session"
        );
        self.session = Some(session);
        Ok(sign_in)
    }

    /// Sign out if a session is held.
    ///
    /// The session is only forgotten when RAS confirms the sign-out.
    pub async fn sign_out(&mut self) -> Result<bool> {
        let Some(session_id) = self.session.as_ref().map(|s| s.id.clone()) else {
            return Ok(false);
        };

        let doc = self.call(Service::Session, "SignOut", &[], true).await?;
        let confirmed = operation_result(&doc.root, "SignOut")
            .map(|r| r.text.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if confirmed {
            self.session = None;
            info!(session_id = %session_id, "Signed out");
        } else {
            warn!(session_id = %session_id, "Sign-out was not confirmed");
        }
        Ok(confirmed)
    }

    /// Drop the local session without contacting RAS.
    pub fn forget_session(&mut self) {
        self.session = None;
    }

    /// Completed, reported orders modified within `[from, to]`.
    pub async fn browse_orders(
        &self,
        from: &DateTime<FixedOffset>,
        to: &DateTime<FixedOffset>,
        page_size: u32,
        page_number: u32,
    ) -> Result<Vec<OrderSummary>> {
        let params = [
            field("siteID", self.site_id),
            node(
                "time",
                &[
                    field("Period", "Custom"),
                    field("From", format_xs_datetime(from)),
                    field("To", format_xs_datetime(to)),
                ],
            ),
            field("orderStatus", "Completed"),
            field("transferStatus", "All"),
            field("reportStatus", "Reported"),
            field("sort", "LastModifiedDate DESC"),
            field("pageSize", page_size),
            field("pageNumber", page_number),
        ];
        let doc = self.call(Service::Explorer, "BrowseOrders", &params, true).await?;

        let Some(result) = optional_result(&doc.root, "BrowseOrders")? else {
            return Ok(Vec::new());
        };
        result.children.iter().map(parse_order).collect()
    }

    /// Workflow events of one report, excluding views.
    pub async fn get_report_events(&self, report_id: i64) -> Result<Vec<ReportEvent>> {
        let params = [
            field("reportID", report_id),
            field("eventsWithContent", true),
            field("excludeViewEvents", true),
            field("fetchBlob", false),
        ];
        let doc = self.call(Service::Report, "GetReportEvents", &params, true).await?;

        let Some(result) = optional_result(&doc.root, "GetReportEvents")? else {
            return Ok(Vec::new());
        };

        let mut events = Vec::with_capacity(result.children.len());
        for el in &result.children {
            match parse_event(el) {
                Some(event) => events.push(event),
                None => warn!(report_id = report_id, "Skipping unreadable report event"),
            }
        }
        Ok(events)
    }
}

/// `<Body><{op}Response><{op}Result>`
fn operation_result<'a>(root: &'a XmlElement, operation: &str) -> Result<&'a XmlElement> {
    optional_result(root, operation)?.ok_or_else(|| {
        SoapError::InvalidResponse(format!("{operation}Result missing")).into()
    })
}

/// Like `operation_result`, but a missing or nil result means "nothing".
fn optional_result<'a>(root: &'a XmlElement, operation: &str) -> Result<Option<&'a XmlElement>> {
    let response_name = format!("{operation}Response");
    let response = root
        .find(&["Body", response_name.as_str()])
        .ok_or_else(|| SoapError::InvalidResponse(format!("{response_name} missing")))?;
    Ok(response.present_child(&format!("{operation}Result")))
}

fn parse_i64(el: &XmlElement, name: &str) -> Result<i64> {
    let text = el
        .child_text(name)
        .ok_or_else(|| SoapError::InvalidResponse(format!("{name} missing in {}", el.name)))?;
    text.parse()
        .map_err(|_| SoapError::InvalidResponse(format!("{name} is not an integer: {text}")).into())
}

fn parse_order(el: &XmlElement) -> Result<OrderSummary> {
    Ok(OrderSummary {
        report_id: parse_i64(el, "ReportID")?,
        accession: el
            .child_text("AccessionNumber")
            .or_else(|| el.child_text("Accession"))
            .map(str::to_string),
        signer: el.present_child("Signer").map(XmlElement::text_content),
        last_modified: el.child_text("LastModifiedDate").map(str::to_string),
    })
}

fn parse_event(el: &XmlElement) -> Option<ReportEvent> {
    let account = el.present_child("Account")?;
    Some(ReportEvent {
        event_type: el.child_text("Type")?.to_string(),
        event_time: parse_xs_datetime(el.child_text("EventTime")?)?,
        workstation: el.child_text("Workstation").unwrap_or_default().to_string(),
        additional_info: el.child_text("AdditionalInfo").unwrap_or_default().to_string(),
        account_id: account.child_text("ID")?.parse().ok()?,
        account_name: account.child_text("Name").unwrap_or_default().to_string(),
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
