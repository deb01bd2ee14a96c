use amiquip::{AmqpProperties, AmqpValue, FieldTable};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Header carrying a message's subject.
pub const SUBJECT_HEADER: &str = "subject";

/// The MIME type of a message body, with an optional content encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    name: Cow<'static, str>,
    encoding: Option<Cow<'static, str>>,
}

impl ContentType {
    pub const APPLICATION_XML: ContentType = ContentType::fixed("application/xml");
    pub const APPLICATION_JSON: ContentType = ContentType::fixed("application/json");
    pub const APPLICATION_SOAP_XML: ContentType = ContentType::fixed("application/soap+xml");
    pub const TEXT_PLAIN: ContentType = ContentType::fixed("text/plain");

    const fn fixed(name: &'static str) -> ContentType {
        ContentType {
            name: Cow::Borrowed(name),
            encoding: None,
        }
    }

    pub fn new<S: Into<String>>(name: S) -> ContentType {
        ContentType {
            name: Cow::Owned(name.into()),
            encoding: None,
        }
    }

    pub fn with_encoding<S: Into<String>>(self, encoding: S) -> ContentType {
        ContentType {
            encoding: Some(Cow::Owned(encoding.into())),
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.encoding {
            Some(encoding) => write!(f, "{} ({})", self.name, encoding),
            None => f.write_str(&self.name),
        }
    }
}

/// A message to send, or one that was received.
///
/// Subjects and annotations travel as string headers; the subject uses the
/// [`SUBJECT_HEADER`](constant.SUBJECT_HEADER.html) key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    address: Option<String>,
    body: Vec<u8>,
    content_type: Option<ContentType>,
    subject: Option<String>,
    annotations: BTreeMap<String, String>,
    id: Option<String>,
}

impl Message {
    pub fn new<B: Into<Vec<u8>>>(body: B) -> Message {
        Message {
            body: body.into(),
            ..Message::default()
        }
    }

    pub fn with_address<S: Into<String>>(self, address: S) -> Message {
        Message {
            address: Some(address.into()),
            ..self
        }
    }

    pub fn with_content_type(self, content_type: ContentType) -> Message {
        Message {
            content_type: Some(content_type),
            ..self
        }
    }

    pub fn with_subject<S: Into<String>>(self, subject: S) -> Message {
        Message {
            subject: Some(subject.into()),
            ..self
        }
    }

    pub fn with_annotation<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Message {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn body_text(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn content_type(&self) -> Option<&ContentType> {
        self.content_type.as_ref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    /// The message id; set by the publisher when sent, or by the sender when received.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn to_properties(&self, message_id: &str, timestamp: u64) -> AmqpProperties {
        let mut properties = AmqpProperties::default()
            .with_message_id(message_id.to_string())
            .with_timestamp(timestamp);
        if let Some(content_type) = &self.content_type {
            properties = properties.with_content_type(content_type.name().to_string());
            if let Some(encoding) = content_type.encoding() {
                properties = properties.with_content_encoding(encoding.to_string());
            }
        }

        let mut headers = FieldTable::new();
        for (key, value) in &self.annotations {
            headers.insert(key.clone(), AmqpValue::LongString(value.clone()));
        }
        if let Some(subject) = &self.subject {
            headers.insert(
                SUBJECT_HEADER.to_string(),
                AmqpValue::LongString(subject.clone()),
            );
        }
        if !headers.is_empty() {
            properties = properties.with_headers(headers);
        }
        properties
    }

    pub(crate) fn from_parts(address: String, body: Vec<u8>, properties: &AmqpProperties) -> Message {
        let content_type = properties.content_type().as_ref().map(|name| {
            let content_type = ContentType::new(name.to_string());
            match properties.content_encoding() {
                Some(encoding) => content_type.with_encoding(encoding.to_string()),
                None => content_type,
            }
        });

        let mut subject = None;
        let mut annotations = BTreeMap::new();
        if let Some(headers) = properties.headers() {
            for (key, value) in headers.iter() {
                let value = match value {
                    AmqpValue::LongString(s) => s.to_string(),
                    other => format!("{:?}", other),
                };
                if key.as_str() == SUBJECT_HEADER {
                    subject = Some(value);
                } else {
                    annotations.insert(key.to_string(), value);
                }
            }
        }

        Message {
            address: Some(address),
            body,
            content_type,
            subject,
            annotations,
            id: properties.message_id().as_ref().map(|id| id.to_string()),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Message{{{}", self.body_text())?;
        if let Some(content_type) = &self.content_type {
            write!(f, ", {}", content_type)?;
        }
        if let Some(subject) = &self.subject {
            write!(f, ", subject={}", subject)?;
        }
        f.write_str("}")
    }
}
