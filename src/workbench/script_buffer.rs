use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{WorkbenchError, WorkbenchResult};
use crate::utils::lock_or_recover;
use crate::workbench::events::{EventSink, WorkbenchEvent};

/// Where scripts are saved to and loaded from.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Ask for a destination. `Ok(None)` means the user cancelled.
    async fn choose_save_path(&self, suggested: Option<&Path>) -> io::Result<Option<PathBuf>>;
    async fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
    async fn read(&self, path: &Path) -> io::Result<String>;
}

/// Filesystem store. Without a configured save target the chooser returns the
/// suggestion, so an unbound buffer with no suggestion counts as cancelled.
#[derive(Debug, Clone, Default)]
pub struct FileScriptStore {
    save_target: Option<PathBuf>,
}

impl FileScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_target(path: PathBuf) -> Self {
        Self {
            save_target: Some(path),
        }
    }
}

#[async_trait]
impl ScriptStore for FileScriptStore {
    async fn choose_save_path(&self, suggested: Option<&Path>) -> io::Result<Option<PathBuf>> {
        Ok(self
            .save_target
            .clone()
            .or_else(|| suggested.map(Path::to_path_buf)))
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await
    }

    async fn read(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveSettings {
    pub enabled: bool,
    pub delay: Duration,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    Cancelled,
}

#[derive(Debug, Default)]
struct BufferState {
    text: String,
    last_persisted: String,
    path: Option<PathBuf>,
    /// Character offsets, `start <= end`.
    selection: Option<(usize, usize)>,
    cursor: usize,
}

impl BufferState {
    fn is_modified(&self) -> bool {
        self.text != self.last_persisted
    }

    fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    fn non_empty_selection(&self) -> Option<(usize, usize)> {
        self.selection.filter(|(start, end)| start < end)
    }

    fn replace_chars(&mut self, start: usize, end: usize, replacement: &str) {
        let from = byte_offset(&self.text, start);
        let to = byte_offset(&self.text, end);
        self.text.replace_range(from..to, replacement);
    }
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// Script text with modification tracking and debounced autosave.
pub struct ScriptBuffer {
    state: Arc<Mutex<BufferState>>,
    store: Arc<dyn ScriptStore>,
    autosave: AutosaveSettings,
    pending: Mutex<Option<JoinHandle<()>>>,
    events: EventSink,
}

impl ScriptBuffer {
    pub fn new(store: Arc<dyn ScriptStore>, autosave: AutosaveSettings, events: EventSink) -> Self {
        Self {
            state: Arc::new(Mutex::new(BufferState::default())),
            store,
            autosave,
            pending: Mutex::new(None),
            events,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BufferState> {
        lock_or_recover(&self.state, "script buffer")
    }

    pub fn text(&self) -> String {
        self.lock_state().text.clone()
    }

    pub fn is_modified(&self) -> bool {
        self.lock_state().is_modified()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.lock_state().path.clone()
    }

    pub fn selection(&self) -> Option<(usize, usize)> {
        self.lock_state().selection
    }

    pub fn cursor(&self) -> usize {
        self.lock_state().cursor
    }

    /// Selected text when the selection is non-empty, otherwise everything.
    pub fn effective_text(&self) -> String {
        let state = self.lock_state();
        match state.non_empty_selection() {
            Some((start, end)) => state.text.chars().skip(start).take(end - start).collect(),
            None => state.text.clone(),
        }
    }

    pub fn select(&self, start: usize, end: usize) {
        let mut state = self.lock_state();
        let len = state.char_len();
        let (start, end) = (start.min(end).min(len), start.max(end).min(len));
        state.selection = Some((start, end));
        state.cursor = end;
    }

    pub fn set_cursor(&self, position: usize) {
        let mut state = self.lock_state();
        state.cursor = position.min(state.char_len());
        state.selection = None;
    }

    pub fn set_text(&self, text: &str) {
        {
            let mut state = self.lock_state();
            state.text = text.to_string();
            state.selection = None;
            state.cursor = state.cursor.min(state.char_len());
        }
        self.schedule_autosave();
    }

    pub fn clear(&self) {
        {
            let mut state = self.lock_state();
            state.text.clear();
            state.selection = None;
            state.cursor = 0;
        }
        self.schedule_autosave();
    }

    /// Replace the selection with `snippet`, or insert it at the cursor.
    pub fn insert_snippet(&self, snippet: &str) {
        {
            let mut state = self.lock_state();
            let (start, end) = match state.non_empty_selection() {
                Some(range) => range,
                None => {
                    let cursor = state.cursor.min(state.char_len());
                    (cursor, cursor)
                }
            };
            state.replace_chars(start, end, snippet);
            state.selection = None;
            state.cursor = start + snippet.chars().count();
        }
        self.schedule_autosave();
    }

    /// Swap the effective text for `replacement`; a selection is kept around
    /// the new text.
    pub fn replace_effective_text(&self, replacement: &str) {
        {
            let mut state = self.lock_state();
            match state.non_empty_selection() {
                Some((start, end)) => {
                    state.replace_chars(start, end, replacement);
                    let new_end = start + replacement.chars().count();
                    state.selection = Some((start, new_end));
                    state.cursor = new_end;
                }
                None => {
                    state.text = replacement.to_string();
                    state.cursor = state.cursor.min(state.char_len());
                }
            }
        }
        self.schedule_autosave();
    }

    /// Restart the debounce timer. Only bound, modified buffers autosave.
    fn schedule_autosave(&self) {
        let mut pending = lock_or_recover(&self.pending, "autosave task");
        if let Some(task) = pending.take() {
            task.abort();
        }

        if !self.autosave.enabled {
            return;
        }
        {
            let state = self.lock_state();
            if state.path.is_none() || !state.is_modified() {
                return;
            }
        }
        let Ok(handle) = Handle::try_current() else {
            debug!("No async runtime; autosave skipped");
            return;
        };

        let state = Arc::clone(&self.state);
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let delay = self.autosave.delay;
        *pending = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            Self::autosave_now(state, store, events).await;
        }));
    }

    async fn autosave_now(
        state: Arc<Mutex<BufferState>>,
        store: Arc<dyn ScriptStore>,
        events: EventSink,
    ) {
        let (path, contents) = {
            let state = lock_or_recover(&state, "script buffer");
            match &state.path {
                Some(path) if state.is_modified() => (path.clone(), state.text.clone()),
                _ => return,
            }
        };

        match store.write(&path, &contents).await {
            Ok(()) => {
                lock_or_recover(&state, "script buffer").last_persisted = contents;
                debug!("Autosaved {}", path.display());
                events.emit(WorkbenchEvent::ScriptSaved(path));
            }
            Err(err) => {
                warn!("Autosave to {} failed: {err}", path.display());
                events.status(WorkbenchError::PersistenceFailed(err.to_string()).to_string());
            }
        }
    }

    fn cancel_autosave(&self) {
        if let Some(task) = lock_or_recover(&self.pending, "autosave task").take() {
            task.abort();
        }
    }

    /// Write the buffer, asking the store for a path when none is bound.
    pub async fn save(&self) -> WorkbenchResult<SaveOutcome> {
        self.cancel_autosave();

        let path = match self.path() {
            Some(path) => path,
            None => {
                let chosen = self
                    .store
                    .choose_save_path(None)
                    .await
                    .map_err(|err| WorkbenchError::PersistenceFailed(err.to_string()))?;
                match chosen {
                    Some(path) => {
                        self.lock_state().path = Some(path.clone());
                        path
                    }
                    None => return Ok(SaveOutcome::Cancelled),
                }
            }
        };

        let contents = self.text();
        self.store
            .write(&path, &contents)
            .await
            .map_err(|err| WorkbenchError::PersistenceFailed(err.to_string()))?;
        self.lock_state().last_persisted = contents;
        info!("Saved script to {}", path.display());
        Ok(SaveOutcome::Saved(path))
    }

    /// Load `path` into the buffer and bind it; the result is unmodified.
    pub async fn open(&self, path: &Path) -> WorkbenchResult<()> {
        self.cancel_autosave();
        let contents = self
            .store
            .read(path)
            .await
            .map_err(|err| WorkbenchError::PersistenceFailed(err.to_string()))?;
        let mut state = self.lock_state();
        state.text = contents.clone();
        state.last_persisted = contents;
        state.path = Some(path.to_path_buf());
        state.selection = None;
        state.cursor = 0;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_autosave();
    }
}

impl Drop for ScriptBuffer {
    fn drop(&mut self) {
        self.cancel_autosave();
    }
}
