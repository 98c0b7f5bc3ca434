//! Run artifact store.
//!
//! Every run owns a directory under `<data_dir>/runs/<run_id>` holding its
//! inputs, outline, chapters, manuscript, book bible, issue batches, state,
//! control flag, event log, and final report. All JSON artifacts are written
//! atomically: temp file in the same directory, fsync, rename.

use crate::model::{BookBible, ControlState, Issue, LogEvent, Outline, Report, RunInput, RunState};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

const INPUTS_FILE: &str = "inputs.json";
const OUTLINE_FILE: &str = "outline.json";
const OUTLINE_MD_FILE: &str = "outline.md";
const MANUSCRIPT_FILE: &str = "manuscript.md";
const BIBLE_FILE: &str = "book_bible.json";
const STATE_FILE: &str = "state.json";
const CONTROL_FILE: &str = "control.json";
const LOG_FILE: &str = "log.jsonl";
const REPORT_FILE: &str = "report.json";
const CHAPTERS_DIR: &str = "chapters";
const ISSUES_DIR: &str = "issues";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact at {path}: {source}")]
    Malformed {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact already written: {path}")]
    AlreadyWritten { path: Utf8PathBuf },

    #[error("invalid run id: {0:?}")]
    InvalidRunId(String),
}

fn io_err(path: &Utf8Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Run ids become directory names, so the character set is kept tight.
fn validate_run_id(run_id: &str) -> Result<(), StoreError> {
    let well_formed = !run_id.is_empty()
        && run_id != "."
        && run_id != ".."
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if well_formed {
        Ok(())
    } else {
        Err(StoreError::InvalidRunId(run_id.to_string()))
    }
}

/// Handle to one run directory.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: Utf8PathBuf,
}

impl RunStore {
    fn run_root(data_dir: &Utf8Path, run_id: &str) -> Utf8PathBuf {
        data_dir.join("runs").join(run_id)
    }

    /// Create the directory layout for a brand new run.
    pub fn create(data_dir: &Utf8Path, run_id: &str) -> Result<Self, StoreError> {
        validate_run_id(run_id)?;
        let root = Self::run_root(data_dir, run_id);
        if root.exists() {
            return Err(StoreError::AlreadyWritten { path: root });
        }
        for dir in [root.join(CHAPTERS_DIR), root.join(ISSUES_DIR)] {
            std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
        Ok(Self { root })
    }

    /// Handle to an existing run directory. Use [`RunStore::exists`] first if
    /// the caller cares whether the run is actually there.
    pub fn open(data_dir: &Utf8Path, run_id: &str) -> Result<Self, StoreError> {
        validate_run_id(run_id)?;
        Ok(Self {
            root: Self::run_root(data_dir, run_id),
        })
    }

    #[must_use]
    pub fn exists(data_dir: &Utf8Path, run_id: &str) -> bool {
        Self::run_root(data_dir, run_id).is_dir()
    }

    /// Run directory names under `data_dir`, sorted.
    pub fn list_runs(data_dir: &Utf8Path) -> Result<Vec<String>, StoreError> {
        let runs_dir = data_dir.join("runs");
        let entries = match std::fs::read_dir(&runs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&runs_dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&runs_dir, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| io_err(&runs_dir, e))?
                .is_dir();
            if is_dir {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    // Inputs are immutable once recorded.

    pub fn put_inputs(&self, input: &RunInput) -> Result<(), StoreError> {
        let path = self.root.join(INPUTS_FILE);
        if path.exists() {
            return Err(StoreError::AlreadyWritten { path });
        }
        self.write_json(&path, input)
    }

    pub fn read_inputs(&self) -> Result<Option<RunInput>, StoreError> {
        self.read_json(&self.root.join(INPUTS_FILE))
    }

    // Outline, written once when the outline stage completes. The markdown
    // rendering goes first so the JSON artifact marks the stage as done.

    pub fn put_outline(&self, outline: &Outline) -> Result<(), StoreError> {
        self.write_text(&self.root.join(OUTLINE_MD_FILE), &outline.to_markdown())?;
        self.write_json(&self.root.join(OUTLINE_FILE), outline)
    }

    pub fn read_outline(&self) -> Result<Option<Outline>, StoreError> {
        self.read_json(&self.root.join(OUTLINE_FILE))
    }

    #[must_use]
    pub fn outline_exists(&self) -> bool {
        self.root.join(OUTLINE_FILE).exists()
    }

    // Chapters, 1-indexed with zero-padded file names.

    fn chapter_path(&self, number: u32) -> Utf8PathBuf {
        self.root.join(CHAPTERS_DIR).join(format!("{number:02}.md"))
    }

    pub fn put_chapter(&self, number: u32, content: &str) -> Result<(), StoreError> {
        self.write_text(&self.chapter_path(number), content)
    }

    pub fn read_chapter(&self, number: u32) -> Result<Option<String>, StoreError> {
        self.read_text(&self.chapter_path(number))
    }

    pub fn put_manuscript(&self, content: &str) -> Result<(), StoreError> {
        self.write_text(&self.root.join(MANUSCRIPT_FILE), content)
    }

    pub fn read_manuscript(&self) -> Result<Option<String>, StoreError> {
        self.read_text(&self.root.join(MANUSCRIPT_FILE))
    }

    #[must_use]
    pub fn manuscript_exists(&self) -> bool {
        self.root.join(MANUSCRIPT_FILE).exists()
    }

    pub fn put_bible(&self, bible: &BookBible) -> Result<(), StoreError> {
        self.write_json(&self.root.join(BIBLE_FILE), bible)
    }

    pub fn read_bible(&self) -> Result<Option<BookBible>, StoreError> {
        self.read_json(&self.root.join(BIBLE_FILE))
    }

    // Issue batches, one file per manuscript iteration. Re-running an
    // iteration after an interrupted run overwrites with identical content.

    fn issues_path(&self, iteration: u32) -> Utf8PathBuf {
        self.root.join(ISSUES_DIR).join(format!("{iteration:04}.json"))
    }

    pub fn put_issues(&self, iteration: u32, issues: &[Issue]) -> Result<(), StoreError> {
        self.write_json(&self.issues_path(iteration), &issues)
    }

    pub fn read_issues(&self, iteration: u32) -> Result<Option<Vec<Issue>>, StoreError> {
        self.read_json(&self.issues_path(iteration))
    }

    /// Issue counts per iteration, oldest first, dense from iteration 1.
    pub fn issue_history(&self) -> Result<Vec<usize>, StoreError> {
        let dir = self.root.join(ISSUES_DIR);
        let entries = std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;

        let mut counts: Vec<(u32, usize)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Ok(iteration) = stem.parse::<u32>() else {
                continue;
            };
            let issues = self.read_issues(iteration)?.unwrap_or_default();
            counts.push((iteration, issues.len()));
        }
        counts.sort_by_key(|(iteration, _)| *iteration);

        let mut history = Vec::new();
        for (iteration, count) in counts {
            while history.len() + 1 < iteration as usize {
                history.push(0);
            }
            history.push(count);
        }
        Ok(history)
    }

    pub fn put_state(&self, state: &RunState) -> Result<(), StoreError> {
        self.write_json(&self.root.join(STATE_FILE), state)
    }

    pub fn read_state(&self) -> Result<Option<RunState>, StoreError> {
        self.read_json(&self.root.join(STATE_FILE))
    }

    pub fn put_control(&self, control: &ControlState) -> Result<(), StoreError> {
        self.write_json(&self.root.join(CONTROL_FILE), control)
    }

    /// Absent control file means nobody asked for anything. A malformed file
    /// is surfaced so the caller can choose how defensive to be.
    pub fn read_control(&self) -> Result<Option<ControlState>, StoreError> {
        self.read_json(&self.root.join(CONTROL_FILE))
    }

    /// Append one event to the JSON Lines log.
    pub fn append_log(&self, event: &LogEvent) -> Result<(), StoreError> {
        let path = self.root.join(LOG_FILE);
        let mut line = serde_json::to_string(event).map_err(|e| StoreError::Malformed {
            path: path.clone(),
            source: e,
        })?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.write_all(line.as_bytes()).map_err(|e| io_err(&path, e))
    }

    /// All events logged so far. Lines that fail to parse (a torn tail after
    /// a crash) are skipped with a warning.
    pub fn read_log(&self) -> Result<Vec<LogEvent>, StoreError> {
        let path = self.root.join(LOG_FILE);
        let Some(raw) = self.read_text(&path)? else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(%path, error = %e, "skipping unparseable log line"),
            }
        }
        Ok(events)
    }

    pub fn put_report(&self, report: &Report) -> Result<(), StoreError> {
        let path = self.root.join(REPORT_FILE);
        if path.exists() {
            return Err(StoreError::AlreadyWritten { path });
        }
        self.write_json(&path, report)
    }

    pub fn read_report(&self) -> Result<Option<Report>, StoreError> {
        self.read_json(&self.root.join(REPORT_FILE))
    }

    // Shared plumbing.

    fn write_json<T: Serialize>(&self, path: &Utf8Path, value: &T) -> Result<(), StoreError> {
        let mut body = serde_json::to_string_pretty(value).map_err(|e| StoreError::Malformed {
            path: path.to_owned(),
            source: e,
        })?;
        body.push('\n');
        self.write_atomic(path, body.as_bytes())
    }

    fn write_text(&self, path: &Utf8Path, content: &str) -> Result<(), StoreError> {
        self.write_atomic(path, normalize_line_endings(content).as_bytes())
    }

    fn write_atomic(&self, path: &Utf8Path, bytes: &[u8]) -> Result<(), StoreError> {
        let parent = path.parent().unwrap_or(&self.root);
        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| io_err(path, e))?;
        tmp.write_all(bytes).map_err(|e| io_err(path, e))?;
        tmp.as_file().sync_all().map_err(|e| io_err(path, e))?;
        tmp.persist(path.as_std_path())
            .map_err(|e| io_err(path, e.error))?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.read_text(path)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Malformed {
                path: path.to_owned(),
                source: e,
            })
    }

    fn read_text(&self, path: &Utf8Path) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(path, e)),
        }
    }
}

/// Text artifacts are stored with Unix line endings.
fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}
