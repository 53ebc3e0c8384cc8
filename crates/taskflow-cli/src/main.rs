use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use taskflow_core::impls::VariableEvaluator;
use taskflow_core::pipeline::ExpressionResolver;
use taskflow_core::typed::{ExpressionLayer, LayeredFactory};
use taskflow_core::{
    BoxError, DiagnosticContext, DispatchEvent, DispatcherConfig, Document, HandlerRegistry,
    Status, StatusChanged, StatusListener, Task, TaskDispatcher, TaskError, TaskHandler, TaskId,
    handler_fn,
};

const DEFAULT_FILTER: &str = "taskflow_core=info,taskflow_cli=info";

/// Document の解決済みテキストをそのまま返す handler
struct Echo;

#[async_trait]
impl TaskHandler<Document, String> for Echo {
    async fn handle(&self, payload: &mut Document) -> Result<String, BoxError> {
        Ok(payload.content().to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Line<'a> {
    Result {
        task_id: TaskId,
        status: Status,
        elapsed_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Event(&'a StatusChanged),
    Lifecycle(&'a DispatchEvent),
}

fn print(line: &Line<'_>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(line)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = DispatcherConfig::from_env()?;
    info!(?config, "starting taskflow");

    let registry = HandlerRegistry::builder()
        .register::<String, String, _>(handler_fn(|s: &mut String| -> Result<String, BoxError> {
            Ok(s.to_uppercase())
        }))?
        .register::<Document, String, _>(Echo)?
        .expect::<Document>()
        .build()?;

    let user = std::env::var("USER").unwrap_or_else(|_| "world".to_string());
    let evaluator = VariableEvaluator::new().with_variable("app", "taskflow");
    let factory = LayeredFactory::new(
        registry,
        ExpressionLayer::new(ExpressionResolver::new(Arc::new(evaluator))),
    );

    let (listener, mut events) = StatusListener::channel();
    let (lifecycle_tx, mut lifecycle) = tokio::sync::mpsc::unbounded_channel::<DispatchEvent>();
    let dispatcher = TaskDispatcher::builder()
        .factory(factory)
        .config(&config)
        .listener(&listener)
        .events(Arc::new(lifecycle_tx))
        .build()?;

    let mut templates: Vec<String> = std::env::args().skip(1).collect();
    if templates.is_empty() {
        templates.push("Hello ${user}, ${app} started at ${now:%H:%M:%S}".to_string());
    }
    let documents: Vec<Arc<Task<Document>>> = templates
        .into_iter()
        .map(|text| Arc::new(Task::wrap(Document::new(text).with_parameter("user", user.as_str()))))
        .collect();
    let shout = Arc::new(Task::wrap(String::from("taskflow")));

    let context = DiagnosticContext::new().with("run", shout.id().to_string());
    let (document_handles, shout_handle) = context.sync_scope(|| {
        let documents = documents
            .iter()
            .map(|task| dispatcher.dispatch::<Document, String>(task))
            .collect::<Result<Vec<_>, _>>()?;
        let shout = dispatcher.dispatch::<String, String>(&shout)?;
        Ok::<_, anyhow::Error>((documents, shout))
    })?;

    for (task, handle) in documents.iter().zip(document_handles) {
        let outcome = handle.await;
        report(task, outcome.as_deref().ok(), outcome.as_ref().err())?;
    }
    let outcome = shout_handle.await;
    report(&shout, outcome.as_deref().ok(), outcome.as_ref().err())?;

    dispatcher.shutdown();
    dispatcher.terminated().await;

    while let Ok(event) = events.try_recv() {
        print(&Line::Event(&event))?;
    }
    while let Ok(event) = lifecycle.try_recv() {
        print(&Line::Lifecycle(&event))?;
    }
    info!("taskflow finished");
    Ok(())
}

fn report<T>(
    task: &Task<T>,
    value: Option<&str>,
    error: Option<&TaskError>,
) -> anyhow::Result<()> {
    print(&Line::Result {
        task_id: task.id(),
        status: task.status(),
        elapsed_ms: task.elapsed().as_millis() as u64,
        value,
        error: error.map(ToString::to_string),
    })
}
