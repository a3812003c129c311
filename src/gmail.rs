use crate::error::SourceError;
use crate::models;
use crate::source::MessageSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::Gmail;
use google_gmail1::api::{Label, ModifyMessageRequest};
use google_gmail1::oauth2::authenticator::Authenticator;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const USER: &str = "me";
/// Gmail's page size ceiling for messages.list.
const MAX_PAGE_SIZE: u32 = 500;

#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
    /// Lowercased label name or id -> label.
    labels: Arc<Mutex<HashMap<String, models::Label>>>,
}

impl GmailClient {
    pub fn new(auth: Authenticator<HttpsConnector<HttpConnector>>) -> Result<Self> {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("Failed to load native roots")?
            .https_only()
            .enable_http1()
            .build();
        let hub = Gmail::new(hyper::Client::builder().build(connector), auth);
        Ok(Self {
            hub,
            labels: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn cached_label(&self, label: &str) -> Option<models::Label> {
        self.labels
            .lock()
            .ok()
            .and_then(|cache| cache.get(&label.to_lowercase()).cloned())
    }

    fn cache_label(&self, label: &models::Label) {
        if let Ok(mut cache) = self.labels.lock() {
            cache.insert(label.id.to_lowercase(), label.clone());
            cache.insert(label.name.to_lowercase(), label.clone());
        }
    }

    async fn resolve_label(&self, label: &str, create: bool) -> Result<Option<models::Label>, SourceError> {
        if let Some(found) = self.cached_label(label) {
            return Ok(Some(found));
        }

        // Refreshes the cache as a side effect.
        self.list_labels().await?;
        if let Some(found) = self.cached_label(label) {
            return Ok(Some(found));
        }
        if !create {
            return Ok(None);
        }

        let request = Label {
            name: Some(label.to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            message_list_visibility: Some("show".to_string()),
            ..Default::default()
        };
        let (_, created) = self
            .hub
            .users()
            .labels_create(request, USER)
            .doit()
            .await
            .map_err(|e| SourceError::remote("labels.create", label, e))?;
        let id = created
            .id
            .ok_or_else(|| SourceError::remote("labels.create", label, "response has no label id"))?;
        let created = models::Label {
            id,
            name: created.name.unwrap_or_else(|| label.to_string()),
            label_type: created.type_.unwrap_or_else(|| "user".to_string()),
        };
        info!("Created label '{}' ({})", created.name, created.id);
        self.cache_label(&created);
        Ok(Some(created))
    }

    async fn modify(
        &self,
        operation: &'static str,
        id: &str,
        add: Option<Vec<String>>,
        remove: Option<Vec<String>>,
    ) -> Result<(), SourceError> {
        let req = ModifyMessageRequest {
            add_label_ids: add,
            remove_label_ids: remove,
        };
        self.hub
            .users()
            .messages_modify(req, USER, id)
            .doit()
            .await
            .map_err(|e| SourceError::remote(operation, id, e))?;
        Ok(())
    }
}

#[async_trait]
impl MessageSource for GmailClient {
    async fn list(&self, query: &str, max_results: u32) -> Result<Vec<String>, SourceError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while (ids.len() as u32) < max_results {
            let remaining = max_results - ids.len() as u32;
            let mut req = self
                .hub
                .users()
                .messages_list(USER)
                .max_results(remaining.min(MAX_PAGE_SIZE));
            if !query.is_empty() {
                req = req.q(query);
            }
            if let Some(token) = &page_token {
                req = req.page_token(token);
            }

            let (_, page) = req
                .doit()
                .await
                .map_err(|e| SourceError::remote("messages.list", query, e))?;
            ids.extend(
                page.messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        ids.truncate(max_results as usize);
        debug!("Listed {} message ids", ids.len());
        Ok(ids)
    }

    async fn get(&self, id: &str) -> Result<models::Message, SourceError> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get(USER, id)
            .format("full")
            .doit()
            .await
            .map_err(|e| SourceError::remote("messages.get", id, e))?;

        let mut from = None;
        let mut to = None;
        let mut subject = None;
        let mut date = None;
        if let Some(headers) = msg.payload.as_ref().and_then(|p| p.headers.as_ref()) {
            for header in headers {
                match header.name.as_deref().map(str::to_ascii_lowercase).as_deref() {
                    Some("from") => from = header.value.clone(),
                    Some("to") => to = header.value.clone(),
                    Some("subject") => subject = header.value.clone(),
                    Some("date") => date = header.value.clone(),
                    _ => {}
                }
            }
        }

        // internalDate is when Gmail received the message; the Date header is
        // only a fallback since senders set it.
        let internal_date = msg
            .internal_date
            .or_else(|| {
                date.as_deref()
                    .and_then(|d| chrono::DateTime::parse_from_rfc2822(d).ok())
                    .map(|d| d.timestamp_millis())
            })
            .unwrap_or(0);

        let body_plain = msg
            .payload
            .as_ref()
            .and_then(|p| extract_text_body(p, "text/plain"));
        let labels = msg.label_ids.clone().unwrap_or_default();
        let raw_data = serde_json::to_string(&msg).ok();

        Ok(models::Message {
            id: msg.id.clone().unwrap_or_else(|| id.to_string()),
            thread_id: msg.thread_id.clone().unwrap_or_default(),
            snippet: msg.snippet.clone(),
            from_address: from,
            to_address: to,
            subject,
            internal_date,
            body_plain,
            is_read: !labels.iter().any(|l| l == "UNREAD"),
            labels,
            raw_data,
            created_at: None,
            updated_at: None,
        })
    }

    async fn list_labels(&self) -> Result<Vec<models::Label>, SourceError> {
        let (_, label_list) = self
            .hub
            .users()
            .labels_list(USER)
            .doit()
            .await
            .map_err(|e| SourceError::remote("labels.list", USER, e))?;

        let labels: Vec<models::Label> = label_list
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| models::Label {
                id: l.id.unwrap_or_default(),
                name: l.name.unwrap_or_default(),
                label_type: l.type_.unwrap_or_default(),
            })
            .filter(|l| !l.id.is_empty())
            .collect();

        for label in &labels {
            self.cache_label(label);
        }
        Ok(labels)
    }

    async fn set_read_state(&self, id: &str, read: bool) -> Result<(), SourceError> {
        let unread = vec!["UNREAD".to_string()];
        if read {
            self.modify("mark read", id, None, Some(unread)).await
        } else {
            self.modify("mark unread", id, Some(unread), None).await
        }
    }

    async fn add_label(&self, id: &str, label: &str) -> Result<models::Label, SourceError> {
        let resolved = self
            .resolve_label(label, true)
            .await?
            .ok_or_else(|| SourceError::remote("labels.create", label, "label unavailable"))?;
        self.modify("add label", id, Some(vec![resolved.id.clone()]), None)
            .await?;
        Ok(resolved)
    }

    async fn remove_label(&self, id: &str, label: &str) -> Result<(), SourceError> {
        match self.resolve_label(label, false).await? {
            Some(resolved) => {
                self.modify("remove label", id, None, Some(vec![resolved.id]))
                    .await
            }
            None => {
                debug!("Label '{}' does not exist, nothing to remove from {}", label, id);
                Ok(())
            }
        }
    }
}

fn decode_body(data: &[u8]) -> Option<String> {
    use base64::{Engine as _, engine::general_purpose};

    // The API client usually hands over decoded bytes, but some responses
    // still carry base64url text.
    let text = String::from_utf8_lossy(data);
    let trimmed = text.trim();
    general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed.trim_end_matches('='))
        .or_else(|_| general_purpose::STANDARD.decode(trimmed))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .or_else(|| String::from_utf8(data.to_vec()).ok())
}

fn extract_text_body(part: &google_gmail1::api::MessagePart, mime_type: &str) -> Option<String> {
    if part.mime_type.as_deref() == Some(mime_type) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            return decode_body(data);
        }
    }

    let body: String = part
        .parts
        .iter()
        .flatten()
        .filter_map(|p| extract_text_body(p, mime_type))
        .collect();
    if body.is_empty() { None } else { Some(body) }
}
