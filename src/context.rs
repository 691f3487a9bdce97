//! Per-call codec context: a label for log messages and an optional progress
//! observer.

/// Receives progress notifications from long running codec operations.
pub trait ProgressWatch: Send + Sync {
    /// A new stage with `total` steps begins.
    fn start(&self, label: &str, stage: &str, total: usize);
    /// `done` of the stage's steps are complete.
    fn update(&self, label: &str, stage: &str, done: usize);
    fn finish(&self, label: &str, stage: &str);
}

#[derive(Default)]
pub struct CodecContext {
    label: String,
    watch: Option<Box<dyn ProgressWatch>>,
}

impl std::fmt::Debug for CodecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecContext")
            .field("label", &self.label)
            .field("watch", &self.watch.is_some())
            .finish()
    }
}

impl CodecContext {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            watch: None,
        }
    }

    pub fn with_watch(mut self, watch: Box<dyn ProgressWatch>) -> Self {
        self.watch = Some(watch);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Prefix for log messages: `"[label] "`, or nothing without a label.
    pub fn prefix(&self) -> String {
        if self.label.is_empty() {
            String::new()
        } else {
            format!("[{}] ", self.label)
        }
    }

    pub fn start(&self, stage: &str, total: usize) {
        if let Some(w) = &self.watch {
            w.start(&self.label, stage, total);
        }
    }

    pub fn update(&self, stage: &str, done: usize) {
        if let Some(w) = &self.watch {
            w.update(&self.label, stage, done);
        }
    }

    pub fn finish(&self, stage: &str) {
        if let Some(w) = &self.watch {
            w.finish(&self.label, stage);
        }
    }
}
