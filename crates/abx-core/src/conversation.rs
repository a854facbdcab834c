//! Conversation assembly from streamed events.
//!
//! Incremental `TEXT` and `REASONING` deltas are coalesced into one open
//! item per run; any other event closes the run. The result is the item
//! list a front-end would render, in arrival order.

use serde_json::Value;

use crate::stream::StreamEvent;

/// One rendered item of an assembled conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationItem {
    /// Input submitted by the user.
    User { content: String },
    /// Assistant text, coalesced from consecutive `TEXT` deltas.
    Text { content: String },
    /// Reasoning text, coalesced from consecutive `REASONING` deltas.
    Reasoning { content: String },
    /// A tool invocation. `pending` clears when a result arrives; a call
    /// whose result never arrives stays pending.
    ToolCall {
        tool_name: String,
        tool_call_id: Option<String>,
        tool_args: Option<Value>,
        pending: bool,
    },
    ToolResult {
        tool_call_id: Option<String>,
        content: Option<String>,
    },
    /// Work-phase marker. `active` is display emphasis only; it clears on
    /// `STEP_END` or when a later phase begins.
    StepMarker {
        step_number: Option<u32>,
        active: bool,
    },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenRun {
    None,
    Text,
    Reasoning,
}

/// Assembles one agent turn from a stream of events.
///
/// Events arriving after the turn is finished or canceled are dropped;
/// items accumulated so far are never discarded, so a canceled turn keeps
/// its partial text.
#[derive(Debug)]
pub struct Conversation {
    items: Vec<ConversationItem>,
    open: OpenRun,
    finished: bool,
    canceled: bool,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            open: OpenRun::None,
            finished: false,
            canceled: false,
        }
    }

    /// Records the user input that started this turn.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.open = OpenRun::None;
        self.items.push(ConversationItem::User {
            content: content.into(),
        });
    }

    /// Applies one stream event.
    pub fn apply(&mut self, event: StreamEvent) {
        if self.finished {
            return;
        }

        match event {
            StreamEvent::Text { content } => {
                if self.open == OpenRun::Text {
                    if let Some(ConversationItem::Text { content: open }) = self.items.last_mut() {
                        open.push_str(&content);
                        return;
                    }
                }
                self.items.push(ConversationItem::Text { content });
                self.open = OpenRun::Text;
            }
            StreamEvent::Reasoning { content } => {
                if self.open == OpenRun::Reasoning {
                    if let Some(ConversationItem::Reasoning { content: open }) =
                        self.items.last_mut()
                    {
                        open.push_str(&content);
                        return;
                    }
                }
                self.items.push(ConversationItem::Reasoning { content });
                self.open = OpenRun::Reasoning;
            }
            StreamEvent::ToolCall {
                tool_name,
                tool_call_id,
                tool_args,
            } => {
                self.open = OpenRun::None;
                self.items.push(ConversationItem::ToolCall {
                    tool_name,
                    tool_call_id,
                    tool_args,
                    pending: true,
                });
            }
            StreamEvent::ToolResult {
                tool_call_id,
                content,
            } => {
                self.open = OpenRun::None;
                // Pairing is by adjacency: the most recent pending call is
                // completed, and an orphan result is kept as-is.
                if let Some(ConversationItem::ToolCall { pending, .. }) = self
                    .items
                    .iter_mut()
                    .rev()
                    .find(|item| matches!(item, ConversationItem::ToolCall { pending: true, .. }))
                {
                    *pending = false;
                }
                self.items.push(ConversationItem::ToolResult {
                    tool_call_id,
                    content,
                });
            }
            StreamEvent::StepBegin { step_number } => {
                self.open = OpenRun::None;
                self.deactivate_step();
                self.items.push(ConversationItem::StepMarker {
                    step_number,
                    active: true,
                });
            }
            StreamEvent::StepEnd { .. } => {
                self.open = OpenRun::None;
                self.deactivate_step();
            }
            StreamEvent::Error { message } => {
                self.open = OpenRun::None;
                self.items.push(ConversationItem::Error { message });
                self.finished = true;
            }
            StreamEvent::Done => {
                self.open = OpenRun::None;
                self.finished = true;
            }
        }
    }

    fn deactivate_step(&mut self) {
        if let Some(ConversationItem::StepMarker { active, .. }) = self
            .items
            .iter_mut()
            .rev()
            .find(|item| matches!(item, ConversationItem::StepMarker { active: true, .. }))
        {
            *active = false;
        }
    }

    /// Stops accepting events without marking the turn complete.
    ///
    /// Partial text already accumulated stays in place.
    pub fn cancel(&mut self) {
        self.open = OpenRun::None;
        self.finished = true;
        self.canceled = true;
    }

    /// Whether a terminal event has been applied (or the turn was canceled).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// First error reported on the stream, if any.
    pub fn error(&self) -> Option<&str> {
        self.items.iter().find_map(|item| match item {
            ConversationItem::Error { message } => Some(message.as_str()),
            _ => None,
        })
    }

    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    /// All assistant text, with distinct runs joined by a blank line.
    pub fn final_text(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            if let ConversationItem::Text { content } = item {
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(content);
            }
        }
        out
    }
}
