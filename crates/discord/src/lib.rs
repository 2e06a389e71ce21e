pub mod webhook;

pub use webhook::{message_url, DiscordError, DiscordWebhookClient, ReplyBody, WebhookReply};
