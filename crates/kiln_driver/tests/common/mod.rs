//! Fake stages and a two-module project fixture shared by the driver tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use kiln_cache::ValidityState;
use kiln_common::{ContentHash, FileUrl};
use kiln_diagnostics::CompilerMessage;
use kiln_driver::{
    CompileContext, CompileDriver, CompileNotification, DriverError, DriverOptions, ExitStatus,
    FileProcessingStage, GeneratingStage, GenerationItem, OutputItem, ProcessingItem,
    ProjectScope, SourceDependencies, Stage, StageError, TranslateOutcome, TranslatingStage,
};
use kiln_project::{Module, Project};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Call recording
// ---------------------------------------------------------------------------

/// Batches of file names a fake stage was asked to handle.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<Vec<String>>>>);

impl Calls {
    pub fn record<'a>(&self, files: impl IntoIterator<Item = &'a Path>) {
        let names = files.into_iter().map(file_name).collect();
        self.0.lock().unwrap().push(names);
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.0.lock().unwrap().clone()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

pub fn names<const N: usize>(items: [&str; N]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Fake stages
// ---------------------------------------------------------------------------

/// Copies `*.src` files to `*.out` in the module output root.
///
/// A source containing `ERROR` reports an error message, one containing
/// `FAULT` makes the stage fail, one containing `NOOUT` compiles without
/// writing a file. Lines `uses X` reference symbol `X`; every source defines
/// the symbol named after its file stem.
pub struct FakeTranslator {
    pub calls: Calls,
}

impl TranslatingStage for FakeTranslator {
    fn id(&self) -> &str {
        "copy"
    }

    fn is_compilable_file(&self, path: &Path, _ctx: &CompileContext) -> bool {
        path.extension().is_some_and(|e| e == "src")
    }

    fn compile(&self, ctx: &CompileContext, files: &[PathBuf]) -> Result<TranslateOutcome, StageError> {
        self.calls.record(files.iter().map(PathBuf::as_path));
        let mut outcome = TranslateOutcome::default();
        for file in files {
            let text = fs::read_to_string(file)?;
            if text.contains("FAULT") {
                return Err(format!("cannot translate {}", file.display()).into());
            }
            if text.contains("ERROR") {
                ctx.add_message(
                    CompilerMessage::error("syntax error")
                        .with_file(FileUrl::from_path(file))
                        .at(1, 1),
                );
                continue;
            }
            let symbol = file.file_stem().unwrap().to_string_lossy().into_owned();
            let references = text
                .lines()
                .filter_map(|l| l.strip_prefix("uses "))
                .map(|s| s.trim().to_string())
                .collect();
            if text.contains("NOOUT") {
                outcome.successfully_compiled.push(OutputItem::without_output(file));
            } else {
                let Some(root) = ctx.output_dir_for(file) else {
                    continue;
                };
                let relative = ctx.relative_source_path(file).unwrap();
                let output = root.join(relative).with_extension("out");
                fs::create_dir_all(output.parent().unwrap())?;
                fs::write(&output, &text)?;
                outcome
                    .successfully_compiled
                    .push(OutputItem::new(file, &output, &symbol));
            }
            outcome.dependencies.push(SourceDependencies {
                source: file.clone(),
                defines: vec![symbol],
                references,
            });
        }
        Ok(outcome)
    }
}

/// Generates `G.src` for module `core` from the contents of `input`.
pub struct FakeGenerator {
    pub input: PathBuf,
    pub calls: Calls,
}

impl GeneratingStage for FakeGenerator {
    fn id(&self) -> &str {
        "gen"
    }

    fn generation_items(&self, _ctx: &CompileContext) -> Result<Vec<GenerationItem>, StageError> {
        let Ok(content) = fs::read(&self.input) else {
            return Ok(Vec::new());
        };
        let validity = ValidityState::from_hash(ContentHash::from_bytes(&content));
        Ok(vec![GenerationItem::new("core", "G.src", validity)])
    }

    fn generate(
        &self,
        _ctx: &CompileContext,
        items: &[GenerationItem],
        output_dir: &Path,
    ) -> Result<Vec<GenerationItem>, StageError> {
        self.calls.record(items.iter().map(|i| i.path.as_path()));
        let content = fs::read_to_string(&self.input)?;
        for item in items {
            fs::write(output_dir.join(&item.path), format!("generated from {content}"))?;
        }
        Ok(items.to_vec())
    }
}

/// "Packages" every file under one output root.
pub struct FakePackager {
    pub root: PathBuf,
    pub calls: Calls,
    pub outdated: Calls,
}

impl FileProcessingStage for FakePackager {
    fn id(&self) -> &str {
        "bundle"
    }

    fn processing_items(&self, _ctx: &CompileContext) -> Result<Vec<ProcessingItem>, StageError> {
        Ok(list_files(&self.root).into_iter().map(ProcessingItem::new).collect())
    }

    fn process(
        &self,
        _ctx: &CompileContext,
        items: &[ProcessingItem],
    ) -> Result<Vec<ProcessingItem>, StageError> {
        self.calls.record(items.iter().map(|i| i.file.as_path()));
        Ok(items.to_vec())
    }

    fn process_outdated_item(
        &self,
        _ctx: &CompileContext,
        url: &FileUrl,
        _state: Option<&ValidityState>,
    ) -> Result<(), StageError> {
        self.outdated.record([url.to_path().as_path()]);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// A project with modules `core` and `app` (`app` depends on `core`).
pub struct Fixture {
    pub dir: TempDir,
    pub project: Arc<Project>,
    pub calls: Calls,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let project = Project::new(&root, root.join(".kiln"))
            .with_module(
                Module::new("core")
                    .with_sources(root.join("core/src"))
                    .with_output(root.join("out/core"))
                    .with_toolchain("fake"),
            )
            .unwrap()
            .with_module(
                Module::new("app")
                    .with_sources(root.join("app/src"))
                    .with_output(root.join("out/app"))
                    .with_toolchain("fake")
                    .depends_on("core"),
            )
            .unwrap();
        Self {
            dir,
            project: Arc::new(project),
            calls: Calls::default(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn cache_dir(&self) -> &Path {
        self.project.cache_dir()
    }

    pub fn src(&self, module: &str, name: &str) -> PathBuf {
        self.root().join(module).join("src").join(name)
    }

    pub fn out(&self, module: &str, name: &str) -> PathBuf {
        self.root().join("out").join(module).join(name)
    }

    /// Writes a source with a modification time `secs_ago` seconds in the past.
    pub fn write(&self, path: &Path, content: &str, secs_ago: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        set_mtime(path, secs_ago);
    }

    pub fn translator(&self) -> Stage {
        Stage::Translating(Box::new(FakeTranslator {
            calls: self.calls.clone(),
        }))
    }

    /// A driver with only the fake translator.
    pub fn driver(&self) -> CompileDriver {
        self.driver_with(vec![self.translator()])
    }

    pub fn driver_with(&self, stages: Vec<Stage>) -> CompileDriver {
        CompileDriver::new(Arc::clone(&self.project), stages, DriverOptions::default())
    }
}

pub fn set_mtime(path: &Path, secs_ago: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
        .unwrap();
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

pub type Outcome = (Result<ExitStatus, DriverError>, CompileNotification);

pub fn make(driver: &CompileDriver) -> Outcome {
    let mut notification = None;
    let result = driver.make(Box::new(ProjectScope), |n| notification = Some(n));
    (result, notification.expect("notification delivered"))
}

pub fn rebuild(driver: &CompileDriver) -> Outcome {
    let mut notification = None;
    let result = driver.rebuild(|n| notification = Some(n));
    (result, notification.expect("notification delivered"))
}

pub fn texts(notification: &CompileNotification) -> Vec<String> {
    notification.messages.iter().map(|m| m.text.clone()).collect()
}

// ---------------------------------------------------------------------------
// Filesystem snapshots
// ---------------------------------------------------------------------------

pub fn list_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect(root, &mut files);
    files.sort();
    files
}

fn collect(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(&path, out);
        } else {
            out.push(path);
        }
    }
}

/// Every file under `root` with its bytes.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    list_files(root)
        .into_iter()
        .map(|p| {
            let bytes = fs::read(&p).unwrap();
            (p, bytes)
        })
        .collect()
}
