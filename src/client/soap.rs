//! SOAP 1.2 envelope construction and fault handling.

use crate::client::xml::XmlElement;
use crate::models::SoapError;
use quick_xml::escape::escape;
use std::fmt::Display;

pub const SOAP_ENV_12: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WS_ADDRESSING: &str = "http://www.w3.org/2005/08/addressing";

/// `<name>value</name>` with the value escaped.
pub fn field(name: &str, value: impl Display) -> String {
    format!("<{name}>{}</{name}>", escape(value.to_string().as_str()))
}

/// `<name>children...</name>`
pub fn node(name: &str, children: &[String]) -> String {
    format!("<{name}>{}</{name}>", children.concat())
}

/// A request ready to be serialized.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// SOAP action URI
    pub action: String,
    /// Endpoint URL (used for WS-Addressing `To`)
    pub to: String,
    /// Extra header blocks, already serialized
    pub headers: Vec<String>,
    /// Body payload, already serialized
    pub body: String,
}

impl Envelope {
    pub fn to_xml(&self, addressing: bool) -> String {
        let mut header = String::new();
        if addressing {
            header.push_str(&format!(
                r#"<a:Action s:mustUnderstand="1">{}</a:Action><a:MessageID>urn:uuid:{}</a:MessageID><a:To s:mustUnderstand="1">{}</a:To>"#,
                escape(self.action.as_str()),
                uuid::Uuid::new_v4(),
                escape(self.to.as_str()),
            ));
        }
        for block in &self.headers {
            header.push_str(block);
        }

        format!(
            r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{SOAP_ENV_12}" xmlns:a="{WS_ADDRESSING}"><s:Header>{header}</s:Header><s:Body>{}</s:Body></s:Envelope>"#,
            self.body
        )
    }

    /// Content-Type for SOAP 1.2 carries the action.
    pub fn content_type(&self) -> String {
        format!(
            r#"application/soap+xml; charset=utf-8; action="{}""#,
            self.action
        )
    }
}

/// Extract a SOAP fault from a parsed envelope, if the body carries one.
pub fn fault(envelope: &XmlElement) -> Option<SoapError> {
    let fault = envelope.find(&["Body", "Fault"])?;

    // SOAP 1.2: Code/Value + Reason/Text; SOAP 1.1: faultcode + faultstring
    let code = fault
        .find(&["Code", "Value"])
        .map(|v| v.text.trim().to_string())
        .or_else(|| fault.child_text("faultcode").map(str::to_string))
        .unwrap_or_else(|| "Unknown".to_string());
    let subcode = fault
        .find(&["Code", "Subcode", "Value"])
        .map(|v| v.text.trim().to_string());
    let reason = fault
        .find(&["Reason", "Text"])
        .map(|v| v.text.trim().to_string())
        .or_else(|| fault.child_text("faultstring").map(str::to_string))
        .unwrap_or_default();

    let code = match subcode {
        Some(sub) if !sub.is_empty() => format!("{code}/{sub}"),
        _ => code,
    };
    Some(SoapError::Fault { code, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::xml;

    #[test]
    fn test_field_escapes_values() {
        assert_eq!(field("password", "a<b&c"), "<password>a&lt;b&amp;c</password>");
        assert_eq!(field("pageSize", 500), "<pageSize>500</pageSize>");
    }

    #[test]
    fn test_envelope_round_trips_through_parser() {
        let envelope = Envelope {
            action: "http://tempuri.org/ISession/SignIn".into(),
            to: "http://ras/RAS/Session.svc".into(),
            headers: vec!["<AccountSession>s1</AccountSession>".into()],
            body: node("SignIn", &[field("loginName", "me")]),
        };
        let parsed = xml::parse(&envelope.to_xml(true)).unwrap();
        let header = parsed.child("Header").unwrap();
        assert_eq!(header.child_text("Action"), Some("http://tempuri.org/ISession/SignIn"));
        assert_eq!(header.child_text("AccountSession"), Some("s1"));
        assert!(header.child_text("MessageID").unwrap().starts_with("urn:uuid:"));
        assert_eq!(
            parsed.find(&["Body", "SignIn", "loginName"]).unwrap().text,
            "me"
        );

        let bare = xml::parse(&envelope.to_xml(false)).unwrap();
        assert!(bare.find(&["Header", "Action"]).is_none());
        assert!(envelope.content_type().contains(r#"action="http://tempuri.org/ISession/SignIn""#));
    }

    #[test]
    fn test_soap12_fault() {
        let body = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><s:Fault>
            <s:Code><s:Value>s:Sender</s:Value><s:Subcode><s:Value>a:InvalidSession</s:Value></s:Subcode></s:Code>
            <s:Reason><s:Text xml:lang="en-US">Session expired</s:Text></s:Reason>
        </s:Fault></s:Body></s:Envelope>"#;
        let root = xml::parse(body).unwrap();
        match fault(&root) {
            Some(SoapError::Fault { code, reason }) => {
                assert_eq!(code, "s:Sender/a:InvalidSession");
                assert_eq!(reason, "Session expired");
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn test_no_fault_in_normal_body() {
        let root = xml::parse("<Envelope><Body><X/></Body></Envelope>").unwrap();
        assert!(fault(&root).is_none());
    }
}
