use std::collections::HashMap;
use std::io::Write;

use docchat_stream::{ClientEvent, Conversation, RequestId, Role, SourceRef, StreamChunk};

/// Folds client events into a [`Conversation`] and renders the changes as
/// terminal text. Stream fragments are written as they arrive.
#[derive(Default)]
pub struct ConsoleView {
    conversation: Conversation,
    /// Bytes of each message's content already on screen, by message index.
    printed: HashMap<usize, usize>,
    /// Message whose text the open terminal line belongs to.
    line: Option<usize>,
}

impl ConsoleView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn record_user(&mut self, text: &str, request_id: Option<RequestId>) {
        self.conversation.push_user(text, request_id);
    }

    /// Forgets all messages shown so far.
    pub fn clear(&mut self) {
        self.conversation.clear();
        self.printed.clear();
        self.line = None;
    }

    /// Applies `event` and writes whatever became visible to `out`.
    pub fn apply(&mut self, event: &ClientEvent, out: &mut impl Write) -> std::io::Result<()> {
        match event {
            ClientEvent::Open => writeln!(out, "[connected]")?,
            ClientEvent::Close { reason } => {
                self.finish_line(out)?;
                if reason.is_empty() {
                    writeln!(out, "[disconnected]")?;
                } else {
                    writeln!(out, "[disconnected: {reason}]")?;
                }
            }
            ClientEvent::Stream(chunk) => {
                self.conversation.apply(event);
                self.write_stream(chunk, out)?;
            }
            ClientEvent::Complete(completion) => {
                self.conversation.apply(event);
                self.finish_line(out)?;
                for line in format_sources(&completion.sources) {
                    writeln!(out, "{line}")?;
                }
                if let Some(error) = &completion.error {
                    writeln!(out, "[answer failed: {error}]")?;
                }
            }
            ClientEvent::Error(error) => {
                self.conversation.apply(event);
                self.finish_line(out)?;
                writeln!(out, "[{}] {}", error.kind, error.message)?;
            }
        }
        out.flush()
    }

    fn write_stream(&mut self, chunk: &StreamChunk, out: &mut impl Write) -> std::io::Result<()> {
        let messages = self.conversation.messages();
        let index = match chunk.request_id {
            Some(id) => messages
                .iter()
                .rposition(|m| m.role == Role::Ai && m.request_id == Some(id)),
            None => messages
                .len()
                .checked_sub(1)
                .filter(|&last| messages[last].role == Role::Ai && messages[last].is_streaming()),
        };
        let Some(index) = index else {
            return Ok(());
        };
        let message = &messages[index];
        let printed = self.printed.get(&index).copied().unwrap_or(0);

        if self.line != Some(index) {
            if self.line.is_some() {
                writeln!(out)?;
            }
            let at = message.created_at.with_timezone(&chrono::Local).format("%H:%M");
            if printed == 0 {
                write!(out, "assistant ({at})> ")?;
            } else {
                write!(out, "assistant ({at}, continued)> ")?;
            }
        }
        if let Some(fresh) = message.content.get(printed..) {
            write!(out, "{fresh}")?;
        }
        self.printed.insert(index, message.content.len());
        self.line = Some(index);
        Ok(())
    }

    fn finish_line(&mut self, out: &mut impl Write) -> std::io::Result<()> {
        if self.line.take().is_some() {
            writeln!(out)?;
        }
        Ok(())
    }
}

/// One line per citation, numbered from 1.
pub fn format_sources(sources: &[SourceRef]) -> Vec<String> {
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let mut line = format!("  [{}] {}", i + 1, source.document_name);
            if let Some(page) = &source.page {
                line.push_str(&format!(", page {page}"));
            }
            if let Some(section) = source.section.as_deref().filter(|s| !s.is_empty()) {
                line.push_str(&format!(" ({section})"));
            }
            line
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use docchat_stream::{Completion, ErrorEvent, ErrorKind, PageRef};

    use super::*;

    fn render(view: &mut ConsoleView, events: &[ClientEvent]) -> String {
        let mut out = Vec::new();
        for event in events {
            view.apply(event, &mut out).expect("write");
        }
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn fragments_print_incrementally_then_sources() {
        let mut view = ConsoleView::new();
        let text = render(
            &mut view,
            &[
                ClientEvent::Stream(StreamChunk::fragment("Hel")),
                ClientEvent::Stream(StreamChunk::fragment("lo")),
                ClientEvent::Stream(StreamChunk::end()),
                ClientEvent::Complete(Completion {
                    sources: vec![SourceRef::named("a.pdf").with_page(PageRef::Number(3))],
                    ..Completion::default()
                }),
            ],
        );

        assert!(text.starts_with("assistant ("));
        assert!(text.contains("> Hello\n"));
        assert!(text.ends_with("  [1] a.pdf, page 3\n"));
        assert_eq!(view.conversation().last().expect("reply").content, "Hello");
    }

    #[test]
    fn errors_and_closes_end_the_current_line() {
        let mut view = ConsoleView::new();
        let text = render(
            &mut view,
            &[
                ClientEvent::Stream(StreamChunk::fragment("partial")),
                ClientEvent::Error(ErrorEvent::new(ErrorKind::Transport, "reset")),
                ClientEvent::Close {
                    reason: String::new(),
                },
            ],
        );
        assert!(text.ends_with("partial\n[transport] reset\n[disconnected]\n"));
    }

    #[test]
    fn sources_show_optional_page_and_section() {
        let mut with_section = SourceRef::named("b.docx").with_page(PageRef::Label("N/A".into()));
        with_section.section = Some("Intro".into());
        assert_eq!(
            format_sources(&[SourceRef::named("a.pdf"), with_section]),
            vec!["  [1] a.pdf", "  [2] b.docx, page N/A (Intro)"]
        );
    }

    #[test]
    fn interleaved_answers_print_each_fragment_once() {
        let a = RequestId::new();
        let b = RequestId::new();
        let chunk = |content: &str, request_id: RequestId| {
            ClientEvent::Stream(StreamChunk {
                request_id: Some(request_id),
                ..StreamChunk::fragment(content)
            })
        };
        let mut view = ConsoleView::new();
        view.record_user("first?", Some(a));
        view.record_user("second?", Some(b));
        let text = render(
            &mut view,
            &[chunk("a1", a), chunk("b1", b), chunk("a2", a)],
        );

        assert_eq!(text.matches("a1").count(), 1);
        assert_eq!(text.matches("b1").count(), 1);
        assert_eq!(text.matches("assistant (").count(), 3);
        assert!(text.contains("continued)> a2"));
    }
}
