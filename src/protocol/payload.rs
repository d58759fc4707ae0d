//! Request and response payloads

use crate::error::{Error, Result};
use crate::model::{Attachment, AttachmentContent, ContentPart, ContentType, Message};
use crate::protocol::packet::{Packet, PacketType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes carried by `ERROR_RESPONSE` and delivery failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthFailed,
    UnknownType,
    InvalidPayload,
    InvalidContentType,
    ServiceError,
    InvalidMode,
    DeliveryFailed,
    InvalidDomain,
    DuplicateMessage,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthFailed => "AUTH_FAILED",
            Self::UnknownType => "UNKNOWN_TYPE",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::InvalidContentType => "INVALID_CONTENT_TYPE",
            Self::ServiceError => "SERVICE_ERROR",
            Self::InvalidMode => "INVALID_MODE",
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::InvalidDomain => "INVALID_DOMAIN",
            Self::DuplicateMessage => "DUPLICATE_MESSAGE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Error,
}

// -- requests --

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPayload {
    /// Required on federated deliveries, optional from local clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Defaults to the authenticated account's address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: BodyPayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default)]
    pub options: SendOptionsPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPayload {
    #[serde(default)]
    pub content: Vec<ContentPartPayload>,
}

/// A body part as sent by clients. The type stays a string here so an
/// unsupported type is reported as `INVALID_CONTENT_TYPE` rather than as
/// an unparseable payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPartPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub filename: String,
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptionsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub one_time: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPayload {
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

/// A decoded client request: the payload interpreted according to the
/// packet's type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Send(SendPayload),
    Fetch(FetchPayload),
    Ping,
}

impl Request {
    /// Interpret a packet as a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownType`] for tags that are not requests and
    /// [`Error::InvalidPayload`] when the payload does not fit the tag.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        match &packet.kind {
            PacketType::Send => Ok(Self::Send(packet.payload_as()?)),
            PacketType::Fetch => Ok(Self::Fetch(packet.payload_as()?)),
            PacketType::Ping => Ok(Self::Ping),
            other => Err(Error::UnknownType(format!(
                "the packet type {:?} is not supported",
                other.as_str()
            ))),
        }
    }
}

// -- responses --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponsePayload {
    pub status: Status,
    pub message_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub delivered_to: Vec<String>,
    #[serde(default)]
    pub queued_for: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<DeliveryFailure>,
}

/// A queued recipient whose peer server could not take the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub recipient: String,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponsePayload {
    pub status: Status,
    pub mode: String,
    #[serde(default)]
    pub messages: Vec<MessageView>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// A message as returned to one particular reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub message_id: String,
    pub thread_id: String,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: BodyPayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentPayload>,
    pub sent_at: DateTime<Utc>,
    pub read: bool,
}

impl MessageView {
    /// Render `message` for `reader`. Blind copies are only listed for
    /// the message's own sender.
    #[must_use]
    pub fn for_reader(message: &Message, read: bool, reader: &str) -> Self {
        let bcc = if message.from == reader {
            message.bcc.clone()
        } else {
            Vec::new()
        };

        Self {
            message_id: message.message_id.clone(),
            thread_id: message.thread_id.clone(),
            from: message.from.clone(),
            to: message.to.clone(),
            cc: message.cc.clone(),
            bcc,
            subject: message.subject.clone(),
            body: BodyPayload::from(message.body.as_slice()),
            attachments: message.attachments.iter().map(AttachmentPayload::from).collect(),
            sent_at: message.sent_at,
            read,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponsePayload {
    pub status: Status,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponsePayload {
    pub status: Status,
    pub code: ErrorCode,
    pub message: String,
}

// -- conversions between wire and stored shapes --

impl TryFrom<&ContentPartPayload> for ContentPart {
    type Error = Error;

    fn try_from(part: &ContentPartPayload) -> Result<Self> {
        Ok(Self {
            kind: ContentType::parse(&part.kind)?,
            value: part.value.clone(),
        })
    }
}

impl From<&ContentPart> for ContentPartPayload {
    fn from(part: &ContentPart) -> Self {
        Self {
            kind: part.kind.as_str().to_string(),
            value: part.value.clone(),
        }
    }
}

impl From<&[ContentPart]> for BodyPayload {
    fn from(parts: &[ContentPart]) -> Self {
        Self {
            content: parts.iter().map(ContentPartPayload::from).collect(),
        }
    }
}

impl TryFrom<&AttachmentPayload> for Attachment {
    type Error = Error;

    fn try_from(att: &AttachmentPayload) -> Result<Self> {
        if att.filename.trim().is_empty() {
            return Err(Error::InvalidPayload(
                "attachment is missing a filename".into(),
            ));
        }

        let content = match (&att.content_base64, &att.url) {
            (Some(inline), None) => AttachmentContent::Inline(inline.clone()),
            (None, Some(url)) => AttachmentContent::Url(url.clone()),
            _ => {
                return Err(Error::InvalidPayload(format!(
                    "attachment {:?} needs exactly one of content_base64 or url",
                    att.filename
                )));
            }
        };

        Ok(Self {
            filename: att.filename.clone(),
            mimetype: att.mimetype.clone(),
            content,
        })
    }
}

impl From<&Attachment> for AttachmentPayload {
    fn from(att: &Attachment) -> Self {
        let (content_base64, url) = match &att.content {
            AttachmentContent::Inline(data) => (Some(data.clone()), None),
            AttachmentContent::Url(url) => (None, Some(url.clone())),
        };
        Self {
            filename: att.filename.clone(),
            mimetype: att.mimetype.clone(),
            content_base64,
            url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageOptions;

    fn message_with_bcc() -> Message {
        Message {
            message_id: "m1".into(),
            thread_id: "t1".into(),
            from: "alice~local.domain".into(),
            to: vec!["bob~local.domain".into()],
            cc: vec![],
            bcc: vec!["eve~local.domain".into()],
            subject: "hi".into(),
            body: vec![ContentPart {
                kind: ContentType::PlainText,
                value: "hello".into(),
            }],
            attachments: vec![Attachment {
                filename: "a.txt".into(),
                mimetype: "text/plain".into(),
                content: AttachmentContent::Url("https://files.example/a.txt".into()),
            }],
            sent_at: Utc::now(),
            options: MessageOptions::default(),
        }
    }

    #[test]
    fn error_codes_use_wire_names() {
        let json = serde_json::to_string(&ErrorCode::InvalidContentType).unwrap();
        assert_eq!(json, "\"INVALID_CONTENT_TYPE\"");
        assert_eq!(ErrorCode::AuthFailed.to_string(), "AUTH_FAILED");
    }

    #[test]
    fn status_uses_upper_case() {
        assert_eq!(serde_json::to_string(&Status::Ok).unwrap(), "\"OK\"");
        assert_eq!(serde_json::to_string(&Status::Error).unwrap(), "\"ERROR\"");
    }

    #[test]
    fn bcc_only_visible_to_sender() {
        let message = message_with_bcc();

        let for_bob = MessageView::for_reader(&message, false, "bob~local.domain");
        assert!(for_bob.bcc.is_empty());

        let for_alice = MessageView::for_reader(&message, true, "alice~local.domain");
        assert_eq!(for_alice.bcc, vec!["eve~local.domain".to_string()]);
    }

    #[test]
    fn view_keeps_body_and_attachment_metadata() {
        let message = message_with_bcc();
        let view = MessageView::for_reader(&message, false, "bob~local.domain");
        assert_eq!(view.body.content[0].kind, "text/plain");
        assert_eq!(view.body.content[0].value, "hello");
        assert_eq!(view.attachments[0].filename, "a.txt");
        assert_eq!(
            view.attachments[0].url.as_deref(),
            Some("https://files.example/a.txt")
        );
        assert!(view.attachments[0].content_base64.is_none());
    }

    #[test]
    fn attachment_needs_one_content_reference() {
        let both = AttachmentPayload {
            filename: "x".into(),
            mimetype: "text/plain".into(),
            content_base64: Some("eA==".into()),
            url: Some("https://x".into()),
        };
        assert!(Attachment::try_from(&both).is_err());

        let neither = AttachmentPayload {
            filename: "x".into(),
            mimetype: "text/plain".into(),
            ..AttachmentPayload::default()
        };
        assert!(Attachment::try_from(&neither).is_err());

        let inline = AttachmentPayload {
            filename: "x".into(),
            mimetype: "text/plain".into(),
            content_base64: Some("eA==".into()),
            url: None,
        };
        let att = Attachment::try_from(&inline).unwrap();
        assert_eq!(att.content, AttachmentContent::Inline("eA==".into()));
    }

    #[test]
    fn response_types_are_not_requests() {
        let packet = Packet::new(PacketType::SendResponse, &());
        let err = Request::from_packet(&packet).unwrap_err();
        assert!(matches!(err, Error::UnknownType(_)));
    }

    #[test]
    fn ping_ignores_payload() {
        let packet = Packet::new(PacketType::Ping, &serde_json::json!({"anything": 1}));
        assert_eq!(Request::from_packet(&packet).unwrap(), Request::Ping);
    }
}
