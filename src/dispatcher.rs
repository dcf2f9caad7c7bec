use crate::commands::{Command, CommandOutput, CommandRunner};
use crate::errors::ErrorEvent;
use crate::events::OneShotEvent;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

/// Runs commands on the runtime's blocking pool and funnels every failure
/// into the error channel.
#[derive(Clone)]
pub struct Dispatcher {
    runtime: Handle,
    runner: Arc<dyn CommandRunner>,
    errors: Arc<OneShotEvent<ErrorEvent>>,
}

impl Dispatcher {
    pub fn new(
        runtime: Handle,
        runner: Arc<dyn CommandRunner>,
        errors: Arc<OneShotEvent<ErrorEvent>>,
    ) -> Self {
        Self { runtime, runner, errors }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Returns immediately. `on_success` runs on the same worker as the
    /// command and may run follow-up commands through the runner it is given.
    pub fn dispatch<F>(&self, command: Command, on_success: F) -> JoinHandle<()>
    where
        F: FnOnce(CommandOutput, &dyn CommandRunner) -> Result<(), ErrorEvent> + Send + 'static,
    {
        let name = command.name();
        let runner = self.runner.clone();
        self.run_blocking(name, move || {
            let output = runner
                .run(command)
                .map_err(|error| ErrorEvent::command_failed(name, error))?;
            tracing::debug!(command = name, output = output.kind(), "command completed");
            on_success(output, runner.as_ref())
        })
    }

    /// Runs `job` on the blocking pool. Its error, or its panic, ends up on
    /// the error channel and nowhere else.
    pub fn run_blocking<F>(&self, name: &'static str, job: F) -> JoinHandle<()>
    where
        F: FnOnce() -> Result<(), ErrorEvent> + Send + 'static,
    {
        let dispatch_id = Uuid::new_v4();
        let errors = self.errors.clone();
        tracing::debug!(%dispatch_id, command = name, "dispatching");

        let worker = self.runtime.spawn_blocking(move || {
            let span = tracing::debug_span!("dispatch", %dispatch_id, command = name);
            let _entered = span.enter();
            job()
        });

        self.runtime.spawn(async move {
            let failure = match worker.await {
                Ok(Ok(())) => return,
                Ok(Err(failure)) => failure,
                Err(error) => ErrorEvent::command_failed(name, describe_join_error(error)),
            };
            tracing::warn!(%dispatch_id, command = name, error = %failure, "command failed");
            errors.post(failure);
        })
    }

    /// Like [`Dispatcher::dispatch`] for commands whose only result is a
    /// count or unit posted to `results`.
    pub fn dispatch_into<T, F>(
        &self,
        command: Command,
        results: Arc<OneShotEvent<T>>,
        extract: F,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
        F: FnOnce(CommandOutput) -> Option<T> + Send + 'static,
    {
        let name = command.name();
        self.dispatch(command, move |output, _| {
            let kind = output.kind();
            let value = extract(output).ok_or_else(|| ErrorEvent::UnexpectedOutput {
                command: name.to_string(),
                output: kind.to_string(),
            })?;
            results.post(value);
            Ok(())
        })
    }
}

fn describe_join_error(error: JoinError) -> String {
    if !error.is_panic() {
        return format!("worker cancelled: {error}");
    }
    let payload = error.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<unknown panic>".to_string());
    format!("worker panicked: {message}")
}
