//! Rich message payloads sent into channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod colors {
    pub const RED: u32 = 0xED4245;
    pub const GREEN: u32 = 0x57F287;
    pub const BLURPLE: u32 = 0x5865F2;
    pub const GREY: u32 = 0x99AAB5;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

impl Embed {
    pub fn field(&self, name: &str) -> Option<&EmbedField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// JSON form as it appears in channel history.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub struct EmbedBuilder {
    embed: Embed,
}

impl EmbedBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self { embed: Embed { title: Some(title.into()), ..Embed::default() } }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.embed.description = Some(description.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.embed.color = Some(color);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.embed.timestamp = Some(timestamp);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.embed.fields.push(EmbedField { name: name.into(), value: value.into(), inline: false });
        self
    }

    pub fn inline_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.embed.fields.push(EmbedField { name: name.into(), value: value.into(), inline: true });
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.embed.footer = Some(footer.into());
        self
    }

    pub fn build(self) -> Embed {
        self.embed
    }
}

/// Text and/or embeds sent into a channel in one platform request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), embeds: Vec::new() }
    }

    pub fn embed(embed: Embed) -> Self {
        Self { content: None, embeds: vec![embed] }
    }

    pub fn with_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_deref().map_or(true, str::is_empty) && self.embeds.is_empty()
    }
}
