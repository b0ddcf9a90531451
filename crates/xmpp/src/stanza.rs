use std::str::FromStr;

use xmpp_parsers::{iq::Iq, message::Message, minidom::Element, presence::Presence};

use crate::error::PipelineError;

const STANZAS_NS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

#[derive(Debug, Clone, PartialEq)]
pub enum Stanza {
    Message(Box<Message>),
    Presence(Box<Presence>),
    Iq(Box<Iq>),
}

/// An `<error/>` child found inside an inbound stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub error_type: Option<String>,
    pub condition: String,
    pub text: Option<String>,
}

impl Stanza {
    pub fn parse(raw: &[u8]) -> Result<Self, PipelineError> {
        parse_stanza(raw)
    }

    pub fn to_element(&self) -> Element {
        match self {
            Stanza::Message(message) => (**message).clone().into(),
            Stanza::Presence(presence) => (**presence).clone().into(),
            Stanza::Iq(iq) => (**iq).clone().into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) => "iq",
        }
    }

    /// Every `<error/>` element carried directly under the stanza root.
    pub fn error_reports(&self) -> Vec<ErrorReport> {
        self.to_element()
            .children()
            .filter(|child| child.name() == "error")
            .map(decode_error_element)
            .collect()
    }
}

impl TryFrom<Element> for Stanza {
    type Error = PipelineError;

    fn try_from(element: Element) -> Result<Self, Self::Error> {
        parse_stanza_element(element)
    }
}

impl From<Stanza> for Element {
    fn from(value: Stanza) -> Self {
        match value {
            Stanza::Message(message) => (*message).into(),
            Stanza::Presence(presence) => (*presence).into(),
            Stanza::Iq(iq) => (*iq).into(),
        }
    }
}

impl From<&Stanza> for Element {
    fn from(value: &Stanza) -> Self {
        value.to_element()
    }
}

pub fn parse_stanza(raw: &[u8]) -> Result<Stanza, PipelineError> {
    let xml = std::str::from_utf8(raw).map_err(|error| {
        PipelineError::ParseFailed(format!("invalid UTF-8 stanza bytes: {error}"))
    })?;
    let trimmed = xml.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::ParseFailed(
            "stanza payload is empty".to_string(),
        ));
    }

    let element = Element::from_str(trimmed).map_err(|error| {
        PipelineError::ParseFailed(format!("failed to parse stanza XML: {error}"))
    })?;
    parse_stanza_element(element)
}

fn parse_stanza_element(element: Element) -> Result<Stanza, PipelineError> {
    match element.name() {
        "message" => Message::try_from(element)
            .map(|message| Stanza::Message(Box::new(message)))
            .map_err(|error| {
                PipelineError::ParseFailed(format!("failed to parse <message/> stanza: {error}"))
            }),
        "presence" => Presence::try_from(element)
            .map(|presence| Stanza::Presence(Box::new(presence)))
            .map_err(|error| {
                PipelineError::ParseFailed(format!("failed to parse <presence/> stanza: {error}"))
            }),
        "iq" => Iq::try_from(element)
            .map(|iq| Stanza::Iq(Box::new(iq)))
            .map_err(|error| {
                PipelineError::ParseFailed(format!("failed to parse <iq/> stanza: {error}"))
            }),
        other => Err(PipelineError::ParseFailed(format!(
            "unsupported stanza element <{other}/>"
        ))),
    }
}

fn decode_error_element(error: &Element) -> ErrorReport {
    let condition = error
        .children()
        .find(|child| child.ns() == STANZAS_NS && child.name() != "text")
        .map(|child| child.name().to_string())
        .unwrap_or_else(|| "undefined-condition".to_string());
    let text = error
        .children()
        .find(|child| child.ns() == STANZAS_NS && child.name() == "text")
        .map(|child| child.text())
        .filter(|text| !text.is_empty());

    ErrorReport {
        error_type: error.attr("type").map(str::to_string),
        condition,
        text,
    }
}

#[cfg(test)]
mod tests {
    use xmpp_parsers::message::MessageType;

    use super::*;

    const MESSAGE_XML: &str = "<message xmlns='jabber:client' type='groupchat' from='test1@muc.localhost/alice' to='bob@localhost'><body>hello</body></message>";
    const PRESENCE_XML: &str =
        "<presence xmlns='jabber:client' from='test1@muc.localhost/alice'/>";
    const IQ_XML: &str =
        "<iq xmlns='jabber:client' type='get' id='ping-1'><ping xmlns='urn:xmpp:ping'/></iq>";
    const ERROR_PRESENCE_XML: &str = "<presence xmlns='jabber:client' type='error' from='test1@muc.localhost/bob'>\
        <error type='auth'><not-authorized xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
        <text xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'>password required</text></error>\
        </presence>";

    #[test]
    fn parses_groupchat_message() {
        let stanza = parse_stanza(MESSAGE_XML.as_bytes()).expect("message stanza should parse");
        let Stanza::Message(message) = &stanza else {
            panic!("expected message stanza");
        };

        assert_eq!(message.type_, MessageType::Groupchat);
        assert_eq!(message.bodies.get("").map(String::as_str), Some("hello"));
        assert_eq!(
            message.from.as_ref().map(|j| j.to_string()),
            Some("test1@muc.localhost/alice".to_string())
        );
    }

    #[test]
    fn parses_presence_and_iq() {
        let presence = parse_stanza(PRESENCE_XML.as_bytes()).expect("presence should parse");
        assert_eq!(presence.name(), "presence");

        let Stanza::Iq(iq) = parse_stanza(IQ_XML.as_bytes()).expect("iq should parse") else {
            panic!("expected iq stanza");
        };
        assert_eq!(iq.id(), "ping-1");
    }

    #[test]
    fn parse_rejects_unknown_root_element() {
        let error = parse_stanza(b"<foo xmlns='jabber:client'/>").expect_err("must fail");
        assert!(matches!(error, PipelineError::ParseFailed(_)));
        assert!(
            error
                .to_string()
                .contains("unsupported stanza element <foo/>")
        );
    }

    #[test]
    fn parse_rejects_empty_payload() {
        let error = parse_stanza(b"   ").expect_err("must fail");
        assert!(error.to_string().contains("stanza payload is empty"));
    }

    #[test]
    fn decodes_embedded_error_condition_and_text() {
        let stanza = parse_stanza(ERROR_PRESENCE_XML.as_bytes()).expect("presence should parse");
        let reports = stanza.error_reports();

        assert_eq!(
            reports,
            vec![ErrorReport {
                error_type: Some("auth".to_string()),
                condition: "not-authorized".to_string(),
                text: Some("password required".to_string()),
            }]
        );
    }

    #[test]
    fn plain_stanza_has_no_error_reports() {
        let stanza = parse_stanza(MESSAGE_XML.as_bytes()).unwrap();
        assert!(stanza.error_reports().is_empty());
    }
}
