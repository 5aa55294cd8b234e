use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::context::ExecutionContext;
use crate::error::PipelineError;

pub const DEFAULT_PRIORITY: i32 = 100;

const FINAL_HANDLER: &str = "final-handler";

/// A named stage in a chain. Lower priority values run first.
///
/// Implementations call `next.run(payload)` to hand a (possibly modified)
/// payload to the rest of the chain. Returning without calling it ends the
/// run early; returning an error halts the run and is reported to the
/// pipeline's error handler.
#[async_trait]
pub trait Middleware<P>: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    async fn process(&self, payload: P, next: Next<'_, P>) -> Result<P, PipelineError>;
}

/// Runs once every middleware has called `next`
#[async_trait]
pub trait FinalHandler<P>: Send + Sync {
    async fn handle(&self, payload: P) -> Result<P, PipelineError>;
}

/// Final handler that hands the payload straight back
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

#[async_trait]
impl<P: Send + 'static> FinalHandler<P> for Passthrough {
    async fn handle(&self, payload: P) -> Result<P, PipelineError> {
        Ok(payload)
    }
}

#[async_trait]
impl<P, F, Fut> FinalHandler<P> for F
where
    P: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<P, PipelineError>> + Send + 'static,
{
    async fn handle(&self, payload: P) -> Result<P, PipelineError> {
        (self)(payload).await
    }
}

pub type ErrorHandler = Arc<dyn Fn(&PipelineError, &ExecutionContext) + Send + Sync>;

/// How a successful run ended
#[derive(Clone, Debug, PartialEq)]
pub enum Delivery<P> {
    /// Every stage continued and the final handler ran
    Completed(P),
    /// A stage returned without calling `next`
    ShortCircuited { middleware: String, payload: P },
}

impl<P> Delivery<P> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Delivery::Completed(_))
    }

    pub fn payload(&self) -> &P {
        match self {
            Delivery::Completed(payload) => payload,
            Delivery::ShortCircuited { payload, .. } => payload,
        }
    }

    pub fn into_payload(self) -> P {
        match self {
            Delivery::Completed(payload) => payload,
            Delivery::ShortCircuited { payload, .. } => payload,
        }
    }
}

/// Outcome of a run together with its execution record
#[derive(Debug)]
pub struct PipelineRun<P> {
    pub result: Result<Delivery<P>, PipelineError>,
    pub context: ExecutionContext,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MiddlewareInfo {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
}

struct Registration<P> {
    name: String,
    priority: i32,
    enabled: bool,
    middleware: Arc<dyn Middleware<P>>,
}

struct Stage<P> {
    name: String,
    middleware: Arc<dyn Middleware<P>>,
}

/// Continuation handed to each middleware
pub struct Next<'a, P> {
    stages: &'a [Stage<P>],
    handler: &'a dyn FinalHandler<P>,
    context: &'a mut ExecutionContext,
}

impl<'a, P: Send + 'static> Next<'a, P> {
    /// Continue the chain with `payload`
    pub async fn run(self, payload: P) -> Result<P, PipelineError> {
        let Next {
            stages,
            handler,
            context,
        } = self;

        match stages.split_first() {
            None => match handler.handle(payload).await {
                Ok(payload) => {
                    context.mark_completed();
                    Ok(payload)
                }
                Err(err) => Err(err.attributed_to(FINAL_HANDLER)),
            },
            Some((stage, rest)) => {
                let index = context.start_stage(&stage.name);
                let next = Next {
                    stages: rest,
                    handler,
                    context: &mut *context,
                };
                let result = stage.middleware.process(payload, next).await;
                match result {
                    Ok(payload) => {
                        context.finish_stage(index, None);
                        context.mark_short_circuit(&stage.name);
                        Ok(payload)
                    }
                    Err(err) => {
                        // only the stage that raised the error records it
                        let raised_here = err.middleware().is_empty();
                        let err = err.attributed_to(&stage.name);
                        context.finish_stage(index, raised_here.then(|| err.to_string()));
                        Err(err)
                    }
                }
            }
        }
    }

    /// Number of stages still ahead of the caller
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

/// Ordered chain of middleware shared by the event bus and the state
/// manager. Each instance owns its own registrations.
pub struct MiddlewareManager<P> {
    label: String,
    registrations: RwLock<Vec<Registration<P>>>,
    error_handler: RwLock<ErrorHandler>,
}

impl<P> std::fmt::Debug for MiddlewareManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareManager")
            .field("label", &self.label)
            .finish()
    }
}

fn log_pipeline_error(err: &PipelineError, context: &ExecutionContext) {
    match err {
        PipelineError::Intercepted { .. } => warn!(
            pipeline = %context.pipeline,
            visited = ?context.visited(),
            "Pipeline run intercepted: {}",
            err
        ),
        PipelineError::Failed { .. } => error!(
            pipeline = %context.pipeline,
            visited = ?context.visited(),
            "Pipeline run failed: {}",
            err
        ),
    }
}

impl<P: Send + 'static> MiddlewareManager<P> {
    pub fn new(label: impl Into<String>) -> Self {
        let error_handler: ErrorHandler = Arc::new(log_pipeline_error);
        Self {
            label: label.into(),
            registrations: RwLock::new(Vec::new()),
            error_handler: RwLock::new(error_handler),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Register a middleware, replacing any existing one with the same name,
    /// then re-sort by priority. Equal priorities keep registration order.
    pub async fn register(&self, middleware: Arc<dyn Middleware<P>>) {
        let registration = Registration {
            name: middleware.name().to_string(),
            priority: middleware.priority(),
            enabled: true,
            middleware,
        };
        let mut registrations = self.registrations.write().await;
        match registrations
            .iter_mut()
            .find(|r| r.name == registration.name)
        {
            Some(existing) => {
                debug!(
                    "[{}] Replacing middleware '{}'",
                    self.label, registration.name
                );
                *existing = registration;
            }
            None => {
                debug!(
                    "[{}] Registered middleware '{}' with priority {}",
                    self.label, registration.name, registration.priority
                );
                registrations.push(registration);
            }
        }
        registrations.sort_by_key(|r| r.priority);
    }

    /// Returns true if a middleware was removed
    pub async fn remove(&self, name: &str) -> bool {
        let mut registrations = self.registrations.write().await;
        let before = registrations.len();
        registrations.retain(|r| r.name != name);
        before != registrations.len()
    }

    /// Returns false when no middleware has this name
    pub async fn toggle(&self, name: &str, enabled: bool) -> bool {
        let mut registrations = self.registrations.write().await;
        match registrations.iter_mut().find(|r| r.name == name) {
            Some(registration) => {
                registration.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub async fn list(&self) -> Vec<MiddlewareInfo> {
        self.registrations
            .read()
            .await
            .iter()
            .map(|r| MiddlewareInfo {
                name: r.name.clone(),
                priority: r.priority,
                enabled: r.enabled,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.registrations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registrations.read().await.is_empty()
    }

    pub async fn set_error_handler(&self, handler: ErrorHandler) {
        *self.error_handler.write().await = handler;
    }

    /// Run `payload` through every enabled middleware and hand the result back
    pub async fn process(&self, payload: P) -> Result<Delivery<P>, PipelineError> {
        self.run(payload, &Passthrough).await.result
    }

    /// Run `payload` through the chain and finish with `handler`
    pub async fn process_with(
        &self,
        payload: P,
        handler: &dyn FinalHandler<P>,
    ) -> Result<Delivery<P>, PipelineError> {
        self.run(payload, handler).await.result
    }

    /// Like `process_with`, also returning the execution record
    pub async fn run(&self, payload: P, handler: &dyn FinalHandler<P>) -> PipelineRun<P> {
        // snapshot so registrations may change while this run is in flight
        let stages: Vec<Stage<P>> = self
            .registrations
            .read()
            .await
            .iter()
            .filter(|r| r.enabled)
            .map(|r| Stage {
                name: r.name.clone(),
                middleware: Arc::clone(&r.middleware),
            })
            .collect();

        let mut context = ExecutionContext::new(&self.label);
        let next = Next {
            stages: &stages,
            handler,
            context: &mut context,
        };
        let outcome = next.run(payload).await;

        let result = match outcome {
            Ok(payload) => match context.short_circuited_by.clone() {
                Some(middleware) if !context.completed => {
                    debug!(
                        "[{}] Run ended early at middleware '{}'",
                        self.label, middleware
                    );
                    Ok(Delivery::ShortCircuited {
                        middleware,
                        payload,
                    })
                }
                _ => Ok(Delivery::Completed(payload)),
            },
            Err(err) => {
                match &err {
                    PipelineError::Intercepted { reason, .. } => context.mark_intercepted(reason),
                    PipelineError::Failed { .. } => context.mark_failed(),
                }
                let handler = Arc::clone(&*self.error_handler.read().await);
                handler(&err, &context);
                Err(err)
            }
        };
        context.finish();

        PipelineRun { result, context }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        priority: i32,
        visits: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware<u32> for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn process(&self, payload: u32, next: Next<'_, u32>) -> Result<u32, PipelineError> {
            self.visits.lock().unwrap().push(self.name.clone());
            next.run(payload + 1).await
        }
    }

    fn recorder(name: &str, priority: i32, visits: &Arc<Mutex<Vec<String>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            name: name.to_string(),
            priority,
            visits: Arc::clone(visits),
        })
    }

    #[tokio::test]
    async fn runs_in_priority_order() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let manager = MiddlewareManager::<u32>::new("test");
        manager.register(recorder("c", 30, &visits)).await;
        manager.register(recorder("a", 10, &visits)).await;
        manager.register(recorder("b", 20, &visits)).await;

        let delivery = manager.process(0).await.unwrap();
        assert_eq!(delivery, Delivery::Completed(3));
        assert_eq!(*visits.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn replace_by_name_and_toggle() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let manager = MiddlewareManager::<u32>::new("test");
        manager.register(recorder("a", 10, &visits)).await;
        manager.register(recorder("b", 20, &visits)).await;
        // same name, new priority: still one entry, now runs last
        manager.register(recorder("a", 50, &visits)).await;
        assert_eq!(manager.len().await, 2);
        let names: Vec<String> = manager.list().await.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["b", "a"]);

        assert!(manager.toggle("b", false).await);
        assert!(!manager.toggle("missing", false).await);
        let delivery = manager.process(0).await.unwrap();
        assert_eq!(delivery.into_payload(), 1);
        assert_eq!(*visits.lock().unwrap(), vec!["a"]);

        assert!(manager.remove("a").await);
        assert!(!manager.remove("a").await);
    }

    #[tokio::test]
    async fn empty_chain_completes() {
        let manager = MiddlewareManager::<u32>::new("test");
        let run = manager.run(7, &Passthrough).await;
        assert_eq!(run.result.unwrap(), Delivery::Completed(7));
        assert!(run.context.completed);
        assert!(run.context.stages.is_empty());
    }

    #[tokio::test]
    async fn closure_final_handler() {
        let manager = MiddlewareManager::<u32>::new("test");
        let double = |n: u32| async move { Ok::<u32, PipelineError>(n * 2) };
        let delivery = manager.process_with(21, &double).await.unwrap();
        assert_eq!(delivery, Delivery::Completed(42));

        let reject = |_n: u32| async move { Err::<u32, PipelineError>(PipelineError::failed("nope")) };
        let err = manager.process_with(1, &reject).await.unwrap_err();
        assert_eq!(err.middleware(), "final-handler");
    }
}
