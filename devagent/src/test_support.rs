//! Test-only helpers: memory item builders, scratch repositories and
//! scripted capabilities.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::memory::{MemoryItem, MemoryKind};
use crate::core::types::{JsonMap, State};
use crate::io::capability::{PlanProposer, ProgramGenerator, RankingOracle};
use crate::io::git::Git;

/// Memory item with empty pointer and dimensions and the given recency.
pub fn memory_item(id: &str, kind: MemoryKind, created_at: f64) -> MemoryItem {
    let mut stats = JsonMap::new();
    stats.insert("created_at".to_string(), json!(created_at));
    MemoryItem {
        id: id.to_string(),
        kind,
        pointer: JsonMap::new(),
        snippet: format!("{id} snippet"),
        dimensions: JsonMap::new(),
        stats,
    }
}

/// A scratch repository at `<tempdir>/repo`, removed on drop.
///
/// The parent directory is free for files that must lie outside the root.
pub struct TestRepo {
    dir: TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let root = dir.path().join("repo");
        fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
        Ok(Self { dir, root })
    }

    /// Like [`TestRepo::new`], with a git repository and one initial commit.
    pub fn with_git() -> Result<Self> {
        let repo = Self::new()?;
        repo.write("README.md", "scratch\n")?;
        let git = Git::new(&repo.root);
        git.init()?;
        git.commit_all("initial")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The temp directory holding the repository.
    pub fn outside(&self) -> &Path {
        self.dir.path()
    }

    pub fn state(&self) -> State {
        State::new(&self.root)
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.root.join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

/// A capability that records every request and always gives the same answer.
///
/// Clones share the request log, so a test can keep one handle while the
/// controller owns another.
#[derive(Debug, Clone)]
pub struct Scripted<Req, Ans> {
    answer: Result<Option<Ans>, String>,
    requests: Rc<RefCell<Vec<Req>>>,
}

pub type ScriptedPlanner = Scripted<Value, Value>;
pub type ScriptedGenerator = Scripted<String, Value>;
pub type ScriptedRanker = Scripted<Vec<Value>, Vec<String>>;

impl<Req: Clone, Ans: Clone> Scripted<Req, Ans> {
    pub fn answering(answer: Result<Option<Ans>>) -> Self {
        Self {
            answer: answer.map_err(|err| format!("{err:#}")),
            requests: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<Req> {
        self.requests.borrow().clone()
    }

    fn respond(&self, request: Req) -> Result<Option<Ans>> {
        self.requests.borrow_mut().push(request);
        self.answer.clone().map_err(|err| anyhow!(err))
    }
}

impl PlanProposer for ScriptedPlanner {
    fn propose(&self, request: &Value) -> Result<Option<Value>> {
        self.respond(request.clone())
    }
}

impl ProgramGenerator for ScriptedGenerator {
    fn generate(&self, prompt: &str) -> Result<Option<Value>> {
        self.respond(prompt.to_string())
    }
}

impl RankingOracle for ScriptedRanker {
    fn rank(&self, items: &[Value]) -> Result<Option<Vec<String>>> {
        self.respond(items.to_vec())
    }
}
