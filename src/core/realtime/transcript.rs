//! Conversation transcript assembled from session events.

use std::fmt;

use serde::Serialize;

use super::events::VoiceChatEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "User"),
            Speaker::Assistant => write!(f, "Assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    /// Assistant entry still receiving deltas
    pub streaming: bool,
}

/// Ordered conversation log.
///
/// The user's transcript usually completes after the assistant has started
/// answering, so a user entry is placed before any in-progress assistant entry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn streaming_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.streaming)
    }

    /// Fold one event into the log. Returns `true` when the log changed.
    pub fn apply(&mut self, event: &VoiceChatEvent) -> bool {
        match event {
            VoiceChatEvent::UserTranscript { transcript } => {
                let text = transcript.trim();
                if text.is_empty() {
                    return false;
                }
                let entry = TranscriptEntry {
                    speaker: Speaker::User,
                    text: text.to_string(),
                    streaming: false,
                };
                match self.streaming_index() {
                    Some(index) => self.entries.insert(index, entry),
                    None => self.entries.push(entry),
                }
                true
            }
            VoiceChatEvent::AiTranscriptDelta { delta } => {
                match self.streaming_index() {
                    Some(index) => self.entries[index].text.push_str(delta),
                    None => self.entries.push(TranscriptEntry {
                        speaker: Speaker::Assistant,
                        text: delta.clone(),
                        streaming: true,
                    }),
                }
                true
            }
            VoiceChatEvent::AiTranscriptDone { transcript } => {
                match self.streaming_index() {
                    Some(index) => {
                        let entry = &mut self.entries[index];
                        entry.text = transcript.clone();
                        entry.streaming = false;
                    }
                    None => self.entries.push(TranscriptEntry {
                        speaker: Speaker::Assistant,
                        text: transcript.clone(),
                        streaming: false,
                    }),
                }
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for TranscriptLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let marker = if entry.streaming { " ..." } else { "" };
            writeln!(f, "{}: {}{}", entry.speaker, entry.text, marker)?;
        }
        Ok(())
    }
}
