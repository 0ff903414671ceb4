//! The stage pipeline beyond translation: source generation, packaging,
//! before/after tasks, cancellation and configuration checks.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::{make, names, rebuild, texts, Calls, FakeGenerator, FakePackager, Fixture};
use kiln_driver::{
    CompileContext, CompileDriver, DriverOptions, ExitStatus, ProjectScope, RefreshSink, Stage,
    StageError, TranslateOutcome, TranslatingStage,
};
use kiln_project::{Module, Project};

// ============================================================================
// Source generation
// ============================================================================

struct Generated {
    fx: Fixture,
    input: PathBuf,
    generator_calls: Calls,
}

impl Generated {
    fn new() -> Self {
        let fx = Fixture::new();
        let input = fx.root().join("schema.txt");
        fs::write(&input, "v1").unwrap();
        Self {
            fx,
            input,
            generator_calls: Calls::default(),
        }
    }

    fn driver(&self) -> CompileDriver {
        let generator = FakeGenerator {
            input: self.input.clone(),
            calls: self.generator_calls.clone(),
        };
        self.fx.driver_with(vec![
            Stage::SourceGenerating(Box::new(generator)),
            self.fx.translator(),
        ])
    }
}

#[test]
fn generated_sources_are_translated() {
    let g = Generated::new();

    let (result, _) = make(&g.driver());

    assert_eq!(result.unwrap(), ExitStatus::Success);
    assert_eq!(g.generator_calls.names(), names(["G.src"]));
    let generated = g
        .fx
        .cache_dir()
        .join("generated/gen/core/production/G.src");
    assert_eq!(fs::read_to_string(generated).unwrap(), "generated from v1");
    assert_eq!(
        fs::read_to_string(g.fx.out("core", "G.out")).unwrap(),
        "generated from v1"
    );

    g.generator_calls.clear();
    g.fx.calls.clear();
    let (result, _) = make(&g.driver());
    assert_eq!(result.unwrap(), ExitStatus::UpToDate);
    assert!(g.generator_calls.is_empty());
    assert!(g.fx.calls.is_empty());
}

#[test]
fn changed_generator_input_regenerates_and_recompiles() {
    let g = Generated::new();
    make(&g.driver()).0.unwrap();
    g.generator_calls.clear();
    g.fx.calls.clear();

    fs::write(&g.input, "v2").unwrap();
    let (result, _) = make(&g.driver());

    assert_eq!(result.unwrap(), ExitStatus::Success);
    assert_eq!(g.generator_calls.names(), names(["G.src"]));
    assert_eq!(g.fx.calls.names(), names(["G.src"]));
    assert_eq!(
        fs::read_to_string(g.fx.out("core", "G.out")).unwrap(),
        "generated from v2"
    );
}

#[test]
fn generated_file_no_longer_produced_is_removed_with_its_output() {
    let g = Generated::new();
    make(&g.driver()).0.unwrap();

    fs::remove_file(&g.input).unwrap();
    let (result, _) = make(&g.driver());

    assert_eq!(result.unwrap(), ExitStatus::Success);
    assert!(!g
        .fx
        .cache_dir()
        .join("generated/gen/core/production/G.src")
        .exists());
    assert!(!g.fx.out("core", "G.out").exists());
}

// ============================================================================
// Packaging
// ============================================================================

#[test]
fn packaging_processes_changed_outputs_and_reports_vanished_ones() {
    let fx = Fixture::new();
    fx.write(&fx.src("core", "A.src"), "a\n", 100);
    fx.write(&fx.src("core", "B.src"), "b\n", 100);
    let packaged = Calls::default();
    let outdated = Calls::default();
    let driver = || {
        let packager = FakePackager {
            root: fx.root().join("out/core"),
            calls: packaged.clone(),
            outdated: outdated.clone(),
        };
        fx.driver_with(vec![fx.translator(), Stage::Packaging(Box::new(packager))])
    };

    make(&driver()).0.unwrap();
    assert_eq!(packaged.names(), names(["A.out", "B.out"]));

    packaged.clear();
    let (result, _) = make(&driver());
    assert_eq!(result.unwrap(), ExitStatus::UpToDate);
    assert!(packaged.is_empty());

    fs::remove_file(fx.src("core", "B.src")).unwrap();
    let (result, _) = make(&driver());
    assert_eq!(result.unwrap(), ExitStatus::Success);
    assert_eq!(outdated.names(), names(["B.out"]));
    assert!(!packaged.names().contains("B.out"));
}

// ============================================================================
// Tasks and cancellation
// ============================================================================

#[test]
fn before_task_returning_false_cancels_the_run() {
    let fx = Fixture::new();
    fx.write(&fx.src("core", "A.src"), "a\n", 100);
    make(&fx.driver()).0.unwrap();
    fx.write(&fx.src("core", "A.src"), "a v2\n", 10);
    fx.calls.clear();

    let driver = fx.driver().with_before_task(|_: &CompileContext| false);
    let (result, notification) = make(&driver);

    assert_eq!(result.unwrap(), ExitStatus::Cancelled);
    assert!(notification.aborted);
    assert!(fx.calls.is_empty());

    // The work is still pending for the next run.
    let (result, _) = make(&fx.driver());
    assert_eq!(result.unwrap(), ExitStatus::Success);
    assert_eq!(fx.calls.names(), names(["A.src"]));
}

#[test]
fn cancel_token_stops_the_pipeline_and_is_reset_for_the_next_run() {
    let fx = Fixture::new();
    fx.write(&fx.src("core", "A.src"), "a\n", 100);
    make(&fx.driver()).0.unwrap();
    fx.write(&fx.src("core", "A.src"), "a v2\n", 10);
    fx.calls.clear();

    let cancelled_once = AtomicBool::new(false);
    let driver = fx.driver().with_before_task(move |ctx: &CompileContext| {
        if !cancelled_once.swap(true, Ordering::SeqCst) {
            ctx.progress().token().cancel();
        }
        true
    });
    let (result, notification) = make(&driver);
    assert_eq!(result.unwrap(), ExitStatus::Cancelled);
    assert_eq!(notification.status, Some(ExitStatus::Cancelled));
    assert!(notification.aborted);
    assert!(fx.calls.is_empty());

    let (result, _) = make(&driver);
    assert_eq!(result.unwrap(), ExitStatus::Success);
    assert_eq!(fx.calls.names(), names(["A.src"]));
}

/// Translates like the fake translator, then cancels the run once after
/// compiling a batch containing `trigger`.
struct CancellingTranslator {
    inner: common::FakeTranslator,
    trigger: &'static str,
    fired: AtomicBool,
}

impl TranslatingStage for CancellingTranslator {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn is_compilable_file(&self, path: &Path, ctx: &CompileContext) -> bool {
        self.inner.is_compilable_file(path, ctx)
    }

    fn compile(&self, ctx: &CompileContext, files: &[PathBuf]) -> Result<TranslateOutcome, StageError> {
        let outcome = self.inner.compile(ctx, files)?;
        let hit = files.iter().any(|f| common::file_name(f) == self.trigger);
        if hit && !self.fired.swap(true, Ordering::SeqCst) {
            ctx.progress().token().cancel();
        }
        Ok(outcome)
    }
}

#[test]
fn cancellation_between_chunks_keeps_the_finished_chunk() {
    let fx = Fixture::new();
    fx.write(&fx.src("core", "A.src"), "a\n", 100);
    fx.write(&fx.src("app", "Main.src"), "uses A\n", 100);
    make(&fx.driver()).0.unwrap();
    fx.write(&fx.src("core", "A.src"), "a v2\n", 10);
    fx.write(&fx.src("app", "Main.src"), "uses A\nv2\n", 10);
    fx.calls.clear();

    let translator = CancellingTranslator {
        inner: common::FakeTranslator {
            calls: fx.calls.clone(),
        },
        trigger: "A.src",
        fired: AtomicBool::new(false),
    };
    let driver = fx.driver_with(vec![Stage::Translating(Box::new(translator))]);
    let (result, notification) = make(&driver);

    assert_eq!(result.unwrap(), ExitStatus::Cancelled);
    assert!(notification.aborted);
    assert_eq!(fx.calls.names(), names(["A.src"]));
    assert_eq!(fs::read_to_string(fx.out("core", "A.out")).unwrap(), "a v2\n");
    assert_eq!(fs::read_to_string(fx.out("app", "Main.out")).unwrap(), "uses A\n");

    // The finished chunk was recorded; only the other one is left.
    fx.calls.clear();
    let (result, _) = make(&fx.driver());
    assert_eq!(result.unwrap(), ExitStatus::Success);
    assert_eq!(fx.calls.names(), names(["Main.src"]));
    assert_eq!(fs::read_to_string(fx.out("app", "Main.out")).unwrap(), "uses A\nv2\n");
}

#[test]
fn execute_task_resets_cancellation() {
    let fx = Fixture::new();
    let driver = fx.driver();
    driver.cancel_token().cancel();

    let ran = driver.execute_task(&|ctx: &CompileContext| !ctx.is_cancelled(), Box::new(ProjectScope));

    assert!(ran);
}

#[test]
fn execute_task_waits_for_the_running_compilation() {
    let fx = Fixture::new();
    fx.write(&fx.src("core", "A.src"), "a\n", 100);
    make(&fx.driver()).0.unwrap();

    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let driver = Arc::new(fx.driver().with_before_task(move |_: &CompileContext| {
        entered_tx.lock().unwrap().send(()).unwrap();
        release_rx.lock().unwrap().recv().unwrap();
        true
    }));

    let running = {
        let driver = Arc::clone(&driver);
        thread::spawn(move || make(&driver).0.unwrap())
    };
    entered_rx.recv().unwrap();

    let task_ran = Arc::new(AtomicBool::new(false));
    let waiting = {
        let driver = Arc::clone(&driver);
        let task_ran = Arc::clone(&task_ran);
        thread::spawn(move || {
            driver.execute_task(
                &move |_: &CompileContext| {
                    task_ran.store(true, Ordering::SeqCst);
                    true
                },
                Box::new(ProjectScope),
            )
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!task_ran.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    assert_eq!(running.join().unwrap(), ExitStatus::UpToDate);
    assert!(waiting.join().unwrap());
    assert!(task_ran.load(Ordering::SeqCst));
}

#[test]
fn after_task_sees_the_finished_outputs() {
    let fx = Fixture::new();
    fx.write(&fx.src("core", "A.src"), "a\n", 100);
    let out = fx.out("core", "A.out");
    let seen = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&seen);
    let driver = fx.driver().with_after_task(move |_: &CompileContext| {
        *flag.lock().unwrap() = out.is_file();
        true
    });

    let (result, _) = make(&driver);

    assert_eq!(result.unwrap(), ExitStatus::Success);
    assert!(*seen.lock().unwrap());
}

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<PathBuf>>>);

impl RefreshSink for RecordingSink {
    fn refresh(&self, paths: &[PathBuf]) {
        self.0.lock().unwrap().extend_from_slice(paths);
    }
}

#[test]
fn refresh_sink_hears_about_written_and_deleted_outputs() {
    let fx = Fixture::new();
    fx.write(&fx.src("core", "A.src"), "a\n", 100);
    let sink = RecordingSink::default();
    let driver = fx.driver().with_refresh_sink(sink.clone());

    make(&driver).0.unwrap();
    assert!(sink.0.lock().unwrap().contains(&fx.out("core", "A.out")));

    sink.0.lock().unwrap().clear();
    fs::remove_file(fx.src("core", "A.src")).unwrap();
    make(&driver).0.unwrap();
    assert_eq!(*sink.0.lock().unwrap(), vec![fx.out("core", "A.out")]);
}

// ============================================================================
// Configuration checks
// ============================================================================

#[test]
fn module_without_toolchain_aborts_before_touching_anything() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let project = Project::new(root, root.join(".kiln"))
        .with_module(
            Module::new("bare")
                .with_sources(root.join("bare/src"))
                .with_output(root.join("out/bare")),
        )
        .unwrap();
    fs::create_dir_all(root.join("bare/src")).unwrap();
    fs::write(root.join("bare/src/A.src"), "a").unwrap();
    let calls = Calls::default();
    let translator = common::FakeTranslator {
        calls: calls.clone(),
    };
    let driver = CompileDriver::new(
        Arc::new(project),
        vec![Stage::Translating(Box::new(translator))],
        DriverOptions::default(),
    );

    let (result, notification) = make(&driver);

    assert_eq!(result.unwrap(), ExitStatus::Errors);
    assert!(notification.aborted);
    assert_eq!(notification.errors, 1);
    assert!(texts(&notification)
        .contains(&"Cannot compile module 'bare': no toolchain is configured".to_string()));
    assert!(calls.is_empty());
    assert!(!root.join(".kiln").exists());
    assert!(!root.join("out").exists());
}

#[test]
fn cycle_of_modules_with_different_toolchains_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let project = Project::new(root, root.join(".kiln"))
        .with_module(
            Module::new("left")
                .with_sources(root.join("left/src"))
                .with_output(root.join("out/left"))
                .with_toolchain("fake")
                .depends_on("right"),
        )
        .unwrap()
        .with_module(
            Module::new("right")
                .with_sources(root.join("right/src"))
                .with_output(root.join("out/right"))
                .with_toolchain("other")
                .depends_on("left"),
        )
        .unwrap();
    fs::create_dir_all(root.join("left/src")).unwrap();
    fs::write(root.join("left/src/A.src"), "a").unwrap();
    let calls = Calls::default();
    let translator = common::FakeTranslator {
        calls: calls.clone(),
    };
    let driver = CompileDriver::new(
        Arc::new(project),
        vec![Stage::Translating(Box::new(translator))],
        DriverOptions::default(),
    );

    let (result, notification) = make(&driver);

    assert_eq!(result.unwrap(), ExitStatus::Errors);
    assert!(notification.aborted);
    assert_eq!(notification.errors, 1);
    assert!(texts(&notification).contains(
        &"Modules left, right must use the same toolchain because they form a dependency cycle"
            .to_string()
    ));
    assert!(calls.is_empty());
    assert!(!root.join(".kiln").exists());
}

struct RejectingTranslator;

impl TranslatingStage for RejectingTranslator {
    fn id(&self) -> &str {
        "picky"
    }

    fn is_compilable_file(&self, _path: &Path, _ctx: &CompileContext) -> bool {
        true
    }

    fn compile(&self, _ctx: &CompileContext, _files: &[PathBuf]) -> Result<TranslateOutcome, StageError> {
        Ok(TranslateOutcome::default())
    }

    fn validate_configuration(&self, _ctx: &CompileContext) -> bool {
        false
    }
}

#[test]
fn stage_rejecting_the_configuration_reports_an_error() {
    let fx = Fixture::new();
    fx.write(&fx.src("core", "A.src"), "a\n", 100);
    let driver = fx.driver_with(vec![
        fx.translator(),
        Stage::Translating(Box::new(RejectingTranslator)),
    ]);

    let (result, notification) = make(&driver);

    assert_eq!(result.unwrap(), ExitStatus::Errors);
    assert!(notification.aborted);
    assert_eq!(notification.errors, 1);
    assert!(texts(&notification)
        .contains(&"Stage 'picky' rejected the project configuration".to_string()));
    assert!(fx.calls.is_empty());
    assert!(!fx.cache_dir().exists());
}

fn overlapping_project(root: &std::path::Path) -> Arc<Project> {
    let project = Project::new(root, root.join(".kiln"))
        .with_module(
            Module::new("core")
                .with_sources(root.join("core"))
                .with_output(root.join("core/out"))
                .with_toolchain("fake"),
        )
        .unwrap();
    fs::create_dir_all(root.join("core/out")).unwrap();
    fs::write(root.join("core/A.src"), "a").unwrap();
    fs::write(root.join("core/out/keep.txt"), "mine").unwrap();
    Arc::new(project)
}

fn overlap_driver(project: Arc<Project>, accept: bool) -> CompileDriver {
    let translator = common::FakeTranslator {
        calls: Calls::default(),
    };
    CompileDriver::new(
        project,
        vec![Stage::Translating(Box::new(translator))],
        DriverOptions::default(),
    )
    .with_overlap_confirmation(move |_: &[PathBuf]| accept)
}

#[test]
fn declined_overlap_aborts_the_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let driver = overlap_driver(overlapping_project(root), false);

    let (result, notification) = rebuild(&driver);

    assert_eq!(result.unwrap(), ExitStatus::Errors);
    assert!(notification.aborted);
    assert_eq!(notification.warnings, 1);
    assert!(texts(&notification)[0].contains("intersects with a source root"));
    assert!(root.join("core/out/keep.txt").is_file());
    assert!(!root.join(".kiln").exists());
}

#[test]
fn accepted_overlap_deletes_only_recorded_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let driver = overlap_driver(overlapping_project(root), true);

    let (result, _) = rebuild(&driver);
    assert_eq!(result.unwrap(), ExitStatus::Success);
    assert!(root.join("core/out/A.out").is_file());

    let (result, notification) = rebuild(&driver);
    assert_eq!(result.unwrap(), ExitStatus::Success);
    assert_eq!(notification.warnings, 1);
    assert!(root.join("core/out/keep.txt").is_file());
    assert!(root.join("core/out/A.out").is_file());
}
