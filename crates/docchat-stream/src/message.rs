//! Consumer-side reassembly of streamed answers into chat messages.
//!
//! The client relays events and keeps no message history. UI code owns a
//! [`Conversation`] and folds every event into it with [`Conversation::apply`].

use chrono::{DateTime, Utc};

use crate::event::{ClientEvent, Completion, ErrorEvent, SourceRef, StreamChunk};
use crate::model::{RequestId, SessionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Ai,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Content is still being appended.
    Streaming,
    /// Completed; no further mutation.
    Final,
    /// The request failed or was abandoned before completing.
    Failed,
}

/// One entry of the conversation as shown to the user.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: uuid::Uuid,
    pub request_id: Option<RequestId>,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sources: Vec<SourceRef>,
    pub status: MessageStatus,
    pub error: Option<String>,
}

impl Message {
    fn new(role: Role, content: String, request_id: Option<RequestId>, status: MessageStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            request_id,
            role,
            content,
            created_at: Utc::now(),
            sources: Vec::new(),
            status,
            error: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }
}

/// Ordered message list plus the session id the server last asserted.
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    session_id: Option<SessionId>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// `true` while an AI answer is still streaming.
    pub fn is_awaiting_reply(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.role == Role::Ai && m.is_streaming())
    }

    /// Records a message typed by the user. Pass the id returned by
    /// `send_message` so replies can be matched to it.
    pub fn push_user(&mut self, text: impl Into<String>, request_id: Option<RequestId>) -> &Message {
        self.messages.push(Message::new(
            Role::User,
            text.into(),
            request_id,
            MessageStatus::Final,
        ));
        &self.messages[self.messages.len() - 1]
    }

    /// Drops all messages and the session id.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.session_id = None;
    }

    /// Folds one client event into the conversation. Returns whether anything
    /// visible changed.
    pub fn apply(&mut self, event: &ClientEvent) -> bool {
        match event {
            ClientEvent::Stream(chunk) => self.apply_chunk(chunk),
            ClientEvent::Complete(completion) => self.apply_completion(completion),
            ClientEvent::Error(error) => self.apply_error(error),
            ClientEvent::Open | ClientEvent::Close { .. } => false,
        }
    }

    fn apply_chunk(&mut self, chunk: &StreamChunk) -> bool {
        if chunk.is_complete {
            return false;
        }
        if let Some(message) = self.streaming_reply_mut(chunk.request_id) {
            message.content.push_str(&chunk.content);
            return true;
        }
        self.messages.push(Message::new(
            Role::Ai,
            chunk.content.clone(),
            chunk.request_id,
            MessageStatus::Streaming,
        ));
        true
    }

    fn apply_completion(&mut self, completion: &Completion) -> bool {
        let mut changed = false;
        if let Some(id) = completion.session_id.as_ref().filter(|id| !id.is_blank())
            && self.session_id.as_ref() != Some(id)
        {
            self.session_id = Some(id.clone());
            changed = true;
        }
        if let Some(message) = self.streaming_reply_mut(completion.request_id) {
            message.sources = completion.sources.clone();
            match &completion.error {
                Some(error) => {
                    message.status = MessageStatus::Failed;
                    message.error = Some(error.clone());
                }
                None => message.status = MessageStatus::Final,
            }
            changed = true;
        }
        changed
    }

    fn apply_error(&mut self, error: &ErrorEvent) -> bool {
        let Some(request_id) = error.request_id else {
            return false;
        };
        if let Some(message) = self.streaming_reply_mut(Some(request_id)) {
            message.status = MessageStatus::Failed;
            message.error = Some(error.message.clone());
            return true;
        }
        let already_answered = self
            .messages
            .iter()
            .any(|m| m.role == Role::Ai && m.request_id == Some(request_id));
        if already_answered {
            return false;
        }
        let mut failed = Message::new(
            Role::Ai,
            String::new(),
            Some(request_id),
            MessageStatus::Failed,
        );
        failed.error = Some(error.message.clone());
        self.messages.push(failed);
        true
    }

    /// Finds the AI message still streaming for `request_id`. Without a
    /// request id only the last message qualifies.
    fn streaming_reply_mut(&mut self, request_id: Option<RequestId>) -> Option<&mut Message> {
        match request_id {
            Some(id) => self
                .messages
                .iter_mut()
                .rev()
                .find(|m| m.role == Role::Ai && m.is_streaming() && m.request_id == Some(id)),
            None => self
                .messages
                .last_mut()
                .filter(|m| m.role == Role::Ai && m.is_streaming()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn chunk(content: &str, request_id: Option<RequestId>) -> ClientEvent {
        ClientEvent::Stream(StreamChunk {
            request_id,
            seq: 0,
            content: content.into(),
            is_complete: false,
        })
    }

    #[test]
    fn fragments_assemble_into_one_final_message() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi", None);
        for event in [
            chunk("Hel", None),
            chunk("lo", None),
            ClientEvent::Stream(StreamChunk::end()),
            ClientEvent::Complete(Completion {
                sources: vec![SourceRef::named("a.pdf")],
                session_id: Some("sess-1".into()),
                ..Completion::default()
            }),
        ] {
            conversation.apply(&event);
        }

        let reply = conversation.last().expect("reply");
        assert_eq!(reply.role, Role::Ai);
        assert_eq!(reply.content, "Hello");
        assert_eq!(reply.sources, vec![SourceRef::named("a.pdf")]);
        assert_eq!(reply.status, MessageStatus::Final);
        assert_eq!(conversation.session_id(), Some(&"sess-1".into()));
        assert_eq!(conversation.messages().len(), 2);
    }

    #[test]
    fn sources_are_not_attached_while_streaming() {
        let mut conversation = Conversation::new();
        conversation.apply(&chunk("partial", None));
        assert!(conversation.is_awaiting_reply());
        assert!(conversation.last().expect("msg").sources.is_empty());
    }

    #[test]
    fn new_answer_after_final_starts_a_new_message() {
        let mut conversation = Conversation::new();
        conversation.apply(&chunk("first", None));
        conversation.apply(&ClientEvent::Complete(Completion::default()));
        conversation.apply(&chunk("second", None));

        let contents: Vec<_> = conversation
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn interleaved_requests_are_routed_by_request_id() {
        let a = RequestId::new();
        let b = RequestId::new();
        let mut conversation = Conversation::new();
        conversation.apply(&chunk("a1", Some(a)));
        conversation.apply(&chunk("b1", Some(b)));
        conversation.apply(&chunk("a2", Some(a)));
        conversation.apply(&ClientEvent::Complete(Completion {
            request_id: Some(a),
            sources: vec![SourceRef::named("a.pdf")],
            ..Completion::default()
        }));
        conversation.apply(&chunk("b2", Some(b)));

        let messages = conversation.messages();
        assert_eq!(messages[0].content, "a1a2");
        assert_eq!(messages[0].status, MessageStatus::Final);
        assert_eq!(messages[1].content, "b1b2");
        assert!(messages[1].is_streaming());
    }

    #[test]
    fn completion_without_reply_only_records_session() {
        let mut conversation = Conversation::new();
        conversation.push_user("q", None);
        assert!(conversation.apply(&ClientEvent::Complete(Completion {
            session_id: Some("s".into()),
            ..Completion::default()
        })));
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.session_id(), Some(&"s".into()));
    }

    #[test]
    fn request_error_fails_the_streaming_reply() {
        let id = RequestId::new();
        let mut conversation = Conversation::new();
        conversation.apply(&chunk("half", Some(id)));
        conversation.apply(&ClientEvent::Error(
            ErrorEvent::new(ErrorKind::CompletionTimeout, "no response").for_request(id),
        ));

        let reply = conversation.last().expect("reply");
        assert_eq!(reply.status, MessageStatus::Failed);
        assert_eq!(reply.error.as_deref(), Some("no response"));
        assert_eq!(reply.content, "half");
    }

    #[test]
    fn request_error_before_any_fragment_adds_failed_reply() {
        let id = RequestId::new();
        let mut conversation = Conversation::new();
        conversation.push_user("q", Some(id));
        assert!(conversation.apply(&ClientEvent::Error(
            ErrorEvent::new(ErrorKind::Server, "Query is required").for_request(id),
        )));
        let reply = conversation.last().expect("reply");
        assert_eq!(reply.role, Role::Ai);
        assert_eq!(reply.status, MessageStatus::Failed);
    }

    #[test]
    fn connection_level_errors_do_not_touch_messages() {
        let mut conversation = Conversation::new();
        conversation.apply(&chunk("x", None));
        assert!(!conversation.apply(&ClientEvent::Error(ErrorEvent::new(
            ErrorKind::Transport,
            "refused"
        ))));
        assert!(conversation.is_awaiting_reply());
    }
}
