use std::collections::VecDeque;
use std::time::Duration;

pub const MAX_TOASTS: usize = 4;
pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub kind: ToastKind,
    pub created_ms: i64,
    pub duration: Duration,
}

impl Toast {
    pub fn expires_at(&self) -> i64 {
        self.created_ms + self.duration.as_millis() as i64
    }
}

/// Fire-and-forget notifications; only the newest few are kept.
#[derive(Debug, Clone, Default)]
pub struct ToastQueue {
    items: VecDeque<Toast>,
    next_id: u64,
}

impl ToastQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        kind: ToastKind,
        now_ms: i64,
    ) -> u64 {
        self.push_for(title, description, kind, DEFAULT_TOAST_DURATION, now_ms)
    }

    pub fn push_for(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        kind: ToastKind,
        duration: Duration,
        now_ms: i64,
    ) -> u64 {
        self.next_id += 1;
        self.items.push_back(Toast {
            id: self.next_id,
            title: title.into(),
            description: description.into(),
            kind,
            created_ms: now_ms,
            duration,
        });
        while self.items.len() > MAX_TOASTS {
            self.items.pop_front();
        }
        self.next_id
    }

    pub fn dismiss(&mut self, id: u64) {
        self.items.retain(|t| t.id != id);
    }

    pub fn expire(&mut self, now_ms: i64) {
        self.items.retain(|t| t.expires_at() > now_ms);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Toast> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
