/// Data models for the notification relay
use std::fmt;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Verified identity of a caller or push connection owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject identifier (the recipient's net id)
    pub subject: String,
    /// Scope/area identifier issued alongside the subject
    pub area: String,
}

impl Identity {
    pub fn new(subject: impl Into<String>, area: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            area: area.into(),
        }
    }
}

/// How a recipient wants to be notified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMethod {
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "onsite")]
    Push,
    #[serde(rename = "all")]
    Both,
}

impl DeliveryMethod {
    pub fn wants_email(self) -> bool {
        matches!(self, DeliveryMethod::Email | DeliveryMethod::Both)
    }

    pub fn wants_push(self) -> bool {
        matches!(self, DeliveryMethod::Push | DeliveryMethod::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMethod::Email => "email",
            DeliveryMethod::Push => "onsite",
            DeliveryMethod::Both => "all",
        }
    }
}

/// One entry of the recipients list, as submitted on the wire
///
/// Field names are matched without regard to ASCII case (`NetId`, `netid` and
/// `NETID` are the same field), unknown fields are ignored and a repeated field
/// keeps its last value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientSpec {
    #[serde(rename = "NetId")]
    pub subject: String,
    #[serde(rename = "Method")]
    pub method: DeliveryMethod,
    #[serde(rename = "Email", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

enum RecipientField {
    NetId,
    Method,
    Email,
    Other,
}

impl<'de> Deserialize<'de> for RecipientField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldVisitor;

        impl<'de> Visitor<'de> for FieldVisitor {
            type Value = RecipientField;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a recipient field name")
            }

            fn visit_str<E: de::Error>(self, name: &str) -> Result<Self::Value, E> {
                let field = match name.to_ascii_lowercase().as_str() {
                    "netid" | "net_id" => RecipientField::NetId,
                    "method" => RecipientField::Method,
                    "email" => RecipientField::Email,
                    _ => RecipientField::Other,
                };
                Ok(field)
            }
        }

        deserializer.deserialize_identifier(FieldVisitor)
    }
}

impl<'de> Deserialize<'de> for RecipientSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecipientVisitor;

        impl<'de> Visitor<'de> for RecipientVisitor {
            type Value = RecipientSpec;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a recipient object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut subject = None;
                let mut method = None;
                let mut email = None;

                while let Some(field) = map.next_key::<RecipientField>()? {
                    match field {
                        RecipientField::NetId => subject = Some(map.next_value::<String>()?),
                        RecipientField::Method => {
                            method = Some(map.next_value::<DeliveryMethod>()?)
                        }
                        RecipientField::Email => email = map.next_value::<Option<String>>()?,
                        RecipientField::Other => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }

                Ok(RecipientSpec {
                    subject: subject.ok_or_else(|| de::Error::missing_field("NetId"))?,
                    method: method.ok_or_else(|| de::Error::missing_field("Method"))?,
                    email,
                })
            }
        }

        deserializer.deserialize_map(RecipientVisitor)
    }
}

impl RecipientSpec {
    /// Email address to use, ignoring blank values
    pub fn email_address(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
    }
}

/// A validated notification waiting for the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub recipients: Vec<RecipientSpec>,
    pub message: String,
}

impl NotificationRequest {
    pub fn new(recipients: Vec<RecipientSpec>, message: impl Into<String>) -> Self {
        Self {
            recipients,
            message: message.into(),
        }
    }

    /// Decode the JSON text of a recipients field
    pub fn parse_recipients(raw: &str) -> Result<Vec<RecipientSpec>, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Status envelope returned by every HTTP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: "OK".to_string(),
            data,
        }
    }
}

impl ApiResponse<String> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "ERROR".to_string(),
            data: message.into(),
        }
    }
}
