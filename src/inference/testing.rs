use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::Mutex;

use crate::error::{InferenceError, LoadError};

use super::InferenceBackend;

/// In-memory backend that replays canned replies in call order.
pub(crate) struct ScriptedBackend {
    loaded: bool,
    replies: Mutex<VecDeque<Result<String, InferenceError>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    panics: bool,
    echoes: bool,
    exclusive: Option<Mutex<()>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn loaded() -> Self {
        Self {
            loaded: true,
            replies: Mutex::new(VecDeque::new()),
            fallback: None,
            delay: None,
            panics: false,
            echoes: false,
            exclusive: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn unloaded() -> Self {
        Self {
            loaded: false,
            ..Self::loaded()
        }
    }

    pub(crate) fn reply(self, text: &str) -> Self {
        self.replies.lock().push_back(Ok(text.to_string()));
        self
    }

    pub(crate) fn fail(self, err: InferenceError) -> Self {
        self.replies.lock().push_back(Err(err));
        self
    }

    /// Reply used once the scripted queue is exhausted.
    pub(crate) fn always(mut self, text: &str) -> Self {
        self.fallback = Some(text.to_string());
        self
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Answers with the first word of the prompt's last `Input:` line.
    pub(crate) fn echoing(mut self) -> Self {
        self.echoes = true;
        self
    }

    /// One call at a time, like a model behind a single lock.
    pub(crate) fn serialized(mut self) -> Self {
        self.exclusive = Some(Mutex::new(()));
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn load_model(&self) -> Result<(), LoadError> {
        if self.loaded {
            Ok(())
        } else {
            Err(LoadError::Model("scripted load failure".into()))
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn generate(&self, prompt: &str, _max_new_tokens: usize) -> Result<String, InferenceError> {
        let _guard = self.exclusive.as_ref().map(|lock| lock.lock());
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.panics {
            panic!("scripted backend panic");
        }
        if self.echoes {
            return prompt
                .lines()
                .filter_map(|line| line.strip_prefix("Input:"))
                .last()
                .and_then(|input| input.split_whitespace().next())
                .map(str::to_string)
                .ok_or(InferenceError::EmptyOutput);
        }
        if let Some(next) = self.replies.lock().pop_front() {
            return next;
        }
        match &self.fallback {
            Some(text) => Ok(text.clone()),
            None => Err(InferenceError::EmptyOutput),
        }
    }
}
