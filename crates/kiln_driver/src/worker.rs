//! Runs driver requests on a dedicated worker thread.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::driver::{CompileDriver, CompileNotification};
use crate::error::DriverError;
use crate::scope::CompileScope;
use crate::status::ExitStatus;

/// A unit of work for the background compiler.
#[derive(Debug)]
pub enum CompileRequest {
    /// See [`CompileDriver::rebuild`].
    Rebuild,
    /// See [`CompileDriver::make`].
    Make(Box<dyn CompileScope>),
    /// See [`CompileDriver::compile`].
    Compile {
        /// Files to compile.
        scope: Box<dyn CompileScope>,
        /// Also compile files depending on them.
        track_dependencies: bool,
    },
}

/// Completion of one request.
#[derive(Debug)]
pub struct CompileResult {
    /// What the driver reported to its callback.
    pub notification: CompileNotification,
    /// The driver's return value.
    pub outcome: Result<ExitStatus, DriverError>,
}

struct Job {
    request: CompileRequest,
    reply: Sender<CompileResult>,
}

/// Owns a driver and executes its requests one at a time on a worker thread.
pub struct BackgroundCompiler {
    driver: Arc<CompileDriver>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundCompiler {
    /// Starts the worker thread.
    pub fn start(driver: Arc<CompileDriver>) -> io::Result<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();
        let worker_driver = Arc::clone(&driver);
        let worker = thread::Builder::new()
            .name("kiln-compiler".to_string())
            .spawn(move || work(&worker_driver, queue))?;
        Ok(Self {
            driver,
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    /// Queues a request. The returned receiver yields exactly one result.
    pub fn submit(&self, request: CompileRequest) -> Receiver<CompileResult> {
        let (reply, result) = mpsc::channel();
        let job = Job { request, reply };
        let sent = self.jobs.as_ref().map(|jobs| jobs.send(job));
        if !matches!(sent, Some(Ok(()))) {
            tracing::warn!("compiler worker is gone, request dropped");
        }
        result
    }

    /// Requests cancellation of the running request.
    pub fn cancel(&self) {
        self.driver.cancel_token().cancel();
    }

    /// The driver requests run on.
    pub fn driver(&self) -> &Arc<CompileDriver> {
        &self.driver
    }
}

impl Drop for BackgroundCompiler {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("compiler worker panicked");
            }
        }
    }
}

fn work(driver: &CompileDriver, queue: Receiver<Job>) {
    while let Ok(Job { request, reply }) = queue.recv() {
        let mut notification = None;
        let notify = |n: CompileNotification| notification = Some(n);
        let outcome = match request {
            CompileRequest::Rebuild => driver.rebuild(notify),
            CompileRequest::Make(scope) => driver.make(scope, notify),
            CompileRequest::Compile {
                scope,
                track_dependencies,
            } => driver.compile(scope, notify, track_dependencies),
        };
        let result = CompileResult {
            notification: notification.unwrap_or_default(),
            outcome,
        };
        if reply.send(result).is_err() {
            tracing::debug!("requester stopped waiting for the result");
        }
    }
    tracing::debug!("compiler worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverOptions;
    use crate::scope::ProjectScope;
    use kiln_project::Project;

    #[test]
    fn empty_project_round_trips_through_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new(dir.path(), dir.path().join(".kiln"));
        let driver = Arc::new(CompileDriver::new(Arc::new(project), Vec::new(), DriverOptions::default()));
        let compiler = BackgroundCompiler::start(driver).unwrap();

        let first = compiler.submit(CompileRequest::Make(Box::new(ProjectScope))).recv().unwrap();
        assert!(first.outcome.is_ok());
        assert_eq!(first.notification.status, first.outcome.ok());

        let second = compiler.submit(CompileRequest::Make(Box::new(ProjectScope))).recv().unwrap();
        assert_eq!(second.outcome.unwrap(), ExitStatus::UpToDate);
        assert!(!second.notification.aborted);
    }
}
