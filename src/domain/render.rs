//! Request, artifact and response types flowing through the render pipeline.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::error::DomainError;

pub const PNG_CONTENT_TYPE: &str = "image/png";
pub const PNG_EXTENSION: &str = "png";
pub const URL_DESCRIPTION: &str = "This is a public URL to the generated UML diagram.";

/// A validated render request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub diagram: String,
    pub deliver_inline: bool,
}

impl RenderRequest {
    /// Parse a raw JSON request body of the shape `{ "diagram": string, "download": bool? }`.
    pub fn from_json_slice(body: &[u8]) -> Result<Self, DomainError> {
        let value: Value = serde_json::from_slice(body).map_err(|err| {
            DomainError::validation(format!("request body is not valid JSON: {err}"))
        })?;
        Self::from_value(&value)
    }

    /// Only a JSON `true` for `download` selects inline delivery; strings and numbers do not.
    pub fn from_value(value: &Value) -> Result<Self, DomainError> {
        let object = value
            .as_object()
            .ok_or_else(|| DomainError::validation("request body must be a JSON object"))?;

        let diagram = match object.get("diagram") {
            Some(Value::String(diagram)) => diagram,
            Some(Value::Null) | None => {
                return Err(DomainError::validation("`diagram` is missing"));
            }
            Some(_) => return Err(DomainError::validation("`diagram` must be a string")),
        };
        if diagram.trim().is_empty() {
            return Err(DomainError::validation("`diagram` must not be empty"));
        }

        let deliver_inline = matches!(object.get("download"), Some(Value::Bool(true)));

        Ok(Self {
            diagram: diagram.clone(),
            deliver_inline,
        })
    }
}

/// PNG bytes produced by one successful render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    bytes: Bytes,
}

impl RenderedArtifact {
    pub fn png(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn content_type(&self) -> &'static str {
        PNG_CONTENT_TYPE
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Inline,
    Url,
}

impl DeliveryMode {
    pub fn select(deliver_inline: bool) -> Self {
        if deliver_inline {
            DeliveryMode::Inline
        } else {
            DeliveryMode::Url
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMode::Inline => "inline",
            DeliveryMode::Url => "url",
        }
    }
}

/// JSON record returned when the artifact was uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlEnvelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub source: &'static str,
    pub url: String,
    pub description: &'static str,
}

impl UrlEnvelope {
    pub fn image(url: String) -> Self {
        Self {
            kind: "image",
            source: "url",
            url,
            description: URL_DESCRIPTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEnvelope {
    Inline(RenderedArtifact),
    Url(UrlEnvelope),
}

impl ResponseEnvelope {
    pub fn delivery_mode(&self) -> DeliveryMode {
        match self {
            ResponseEnvelope::Inline(_) => DeliveryMode::Inline,
            ResponseEnvelope::Url(_) => DeliveryMode::Url,
        }
    }
}
