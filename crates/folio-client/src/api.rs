//! Conversation CRUD collaborator API
//!
//! A plain request/response client used to fill the cache: fetching a
//! conversation returns the record plus its committed messages. This is
//! deliberately not part of the streaming protocol.

use serde::{Deserialize, Serialize};

use folio_wire::{Conversation, Message};

use crate::error::{Error, Result};

/// A conversation together with its committed message history.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationWithMessages {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

#[derive(Serialize)]
struct CreateConversationRequest<'a> {
    title: &'a str,
    source_ids: &'a [String],
}

#[derive(Serialize)]
struct RenameConversationRequest<'a> {
    title: &'a str,
}

/// HTTP client for the conversation CRUD API.
pub struct ConversationApi {
    client: reqwest::Client,
    base_url: String,
}

impl ConversationApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// List all conversations.
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let url = format!("{}/conversations", self.base_url);
        let response = self.client.get(&url).send().await?;
        Self::parse(response).await
    }

    /// Fetch one conversation with its seed messages.
    pub async fn fetch(&self, conversation_id: &str) -> Result<ConversationWithMessages> {
        let url = format!("{}/conversations/{conversation_id}", self.base_url);
        let response = self.client.get(&url).send().await?;
        Self::parse(response).await
    }

    /// Create a conversation over the given sources.
    pub async fn create(&self, title: &str, source_ids: &[String]) -> Result<Conversation> {
        let url = format!("{}/conversations", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CreateConversationRequest { title, source_ids })
            .send()
            .await?;
        Self::parse(response).await
    }

    /// Rename a conversation.
    pub async fn rename(&self, conversation_id: &str, title: &str) -> Result<Conversation> {
        let url = format!("{}/conversations/{conversation_id}", self.base_url);
        let response = self
            .client
            .put(&url)
            .json(&RenameConversationRequest { title })
            .send()
            .await?;
        Self::parse(response).await
    }

    /// Delete a conversation.
    pub async fn delete(&self, conversation_id: &str) -> Result<()> {
        let url = format!("{}/conversations/{conversation_id}", self.base_url);
        let response = self.client.delete(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let api = ConversationApi::new("http://localhost:8000/");
        assert_eq!(api.base_url, "http://localhost:8000");
    }
}
