//! Rich chat message announcing that a stream went live.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::StreamSnapshot;

pub const EMBED_COLOR: u32 = 6_570_404;
pub const FOOTER_TEXT: &str = "Made by Wissididom";
pub const WATCH_BUTTON_LABEL: &str = "Watch Stream";
pub const THUMBNAIL_WIDTH: u32 = 400;
pub const THUMBNAIL_HEIGHT: u32 = 225;

const PLACEHOLDER: &str = "N/A";

const COMPONENT_ACTION_ROW: u8 = 1;
const COMPONENT_BUTTON: u8 = 2;
const BUTTON_STYLE_LINK: u8 = 5;

/// Webhook execute payload: content, embeds, and interactive components.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub content: String,
    pub embeds: Vec<Embed>,
    pub components: Vec<ActionRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub url: String,
    pub title: String,
    pub color: u32,
    pub timestamp: DateTime<Utc>,
    pub fields: Vec<EmbedField>,
    pub author: EmbedAuthor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    pub footer: EmbedFooter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedAuthor {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRow {
    #[serde(rename = "type")]
    pub kind: u8,
    pub id: u32,
    pub components: Vec<Button>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Button {
    #[serde(rename = "type")]
    pub kind: u8,
    pub id: u32,
    pub style: u8,
    pub label: String,
    pub url: String,
}

/// Builds the "now live" message for one webhook target.
///
/// `content` is the target's prefix text; `now` becomes the embed timestamp.
pub fn live_message(snapshot: &StreamSnapshot, content: &str, now: DateTime<Utc>) -> ChatMessage {
    let channel_url = snapshot.channel_url();

    let embed = Embed {
        url: channel_url.clone(),
        title: or_placeholder(snapshot.title.as_deref()),
        color: EMBED_COLOR,
        timestamp: now,
        fields: vec![
            EmbedField {
                name: "Game".to_string(),
                value: or_placeholder(snapshot.game_name.as_deref()),
                inline: true,
            },
            EmbedField {
                name: "Viewers".to_string(),
                value: snapshot.viewer_count.unwrap_or(0).to_string(),
                inline: true,
            },
        ],
        author: EmbedAuthor {
            name: format!("{} is now live on Twitch!", snapshot.display_name),
            url: channel_url.clone(),
            icon_url: snapshot.profile_image_url.clone(),
        },
        image: snapshot.thumbnail_url.as_deref().map(|template| EmbedImage {
            url: sized_thumbnail(template),
            width: THUMBNAIL_WIDTH,
            height: THUMBNAIL_HEIGHT,
        }),
        footer: EmbedFooter {
            text: FOOTER_TEXT.to_string(),
        },
    };

    let row = ActionRow {
        kind: COMPONENT_ACTION_ROW,
        id: 1,
        components: vec![Button {
            kind: COMPONENT_BUTTON,
            id: 2,
            style: BUTTON_STYLE_LINK,
            label: WATCH_BUTTON_LABEL.to_string(),
            url: channel_url,
        }],
    };

    ChatMessage {
        content: content.to_string(),
        embeds: vec![embed],
        components: vec![row],
    }
}

/// Substitutes the `{width}`/`{height}` placeholders of a Helix thumbnail template.
pub fn sized_thumbnail(template: &str) -> String {
    template
        .replace("{width}", &THUMBNAIL_WIDTH.to_string())
        .replace("{height}", &THUMBNAIL_HEIGHT.to_string())
}

// Discord rejects empty embed titles and field values.
fn or_placeholder(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => PLACEHOLDER.to_string(),
    }
}
