// SPDX-License-Identifier: Apache-2.0

//! The scan orchestrator: runs a loaded plugin catalog against the
//! shared data context, in one of four modes (unordered/DAG-ordered,
//! each sequential or concurrent), reporting progress and honoring
//! cooperative cancellation along the way.
//!
//! Concurrent modes use a [`tokio::task::JoinSet`] per layer/batch, the
//! same fan-out-then-drain shape hipcheck's engine uses for concurrent
//! plugin queries, and a [`CancellationToken`] checked between layers so
//! a cancelled scan stops promptly rather than draining every in-flight
//! task to completion first.
//!
//! Every plugin evaluation runs under a [`PluginContext`] scoped to one
//! orchestrator run: a fresh scan id, the target description the run was
//! invoked against, and the shared data/hook handles. Around each
//! evaluation the context publishes `plugin:beforeRun:<id>`,
//! `plugin:onError:<id>`, and `plugin:afterRun:<id>` through the
//! [`AppManager`]'s hook bus, so anything registered against those names
//! -- logging, a UI, a test -- observes a run without the orchestrator
//! needing to know who's listening.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::app::AppManager;
use crate::dag;
use crate::error::{Error, Result};
use crate::plugin::Plugin;

/// The shared, string-keyed data map plugins read from and write to.
/// Enforces single-writer-per-key: once a key has been written by one
/// plugin, any other plugin attempting to write the same key is
/// rejected, so two plugins can never silently clobber each other's
/// output.
#[derive(Debug, Default)]
pub struct DataContext {
    values: Mutex<HashMap<String, String>>,
    writers: Mutex<HashMap<String, String>>,
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().expect("data context poisoned").get(key).cloned()
    }

    /// Seed a key with no writer attribution -- used to load probe
    /// results into the context before any plugin runs.
    pub fn seed(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .lock()
            .expect("data context poisoned")
            .insert(key.into(), value.into());
    }

    /// Write a key on behalf of `writer_id`. Fails if the key already
    /// has a different writer of record.
    pub fn set(&self, writer_id: &str, key: &str, value: String) -> Result<()> {
        let mut writers = self.writers.lock().expect("data context poisoned");
        if let Some(existing) = writers.get(key) {
            if existing != writer_id {
                return Err(Error::Invocation(format!(
                    "plugin '{writer_id}' may not write key '{key}', already owned by '{existing}'"
                )));
            }
        } else {
            writers.insert(key.to_string(), writer_id.to_string());
        }
        self.values.lock().expect("data context poisoned").insert(key.to_string(), value);
        Ok(())
    }
}

/// A plugin's output once its triggers and match rules have fired.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub plugin_id: String,
    pub message: String,
    pub remediation: Option<String>,
    pub is_vulnerability: bool,
}

/// Progress reported by the orchestrator as a scan runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    PluginStarted { id: String },
    PluginFinished { id: String, fired: bool },
    LayerStarted { index: usize, size: usize },
    LayerFinished { index: usize },
    Cancelled,
}

/// A bounded progress channel that drops the oldest queued event rather
/// than blocking the orchestrator when a consumer falls behind; scan
/// correctness never depends on every progress event being observed.
#[derive(Clone)]
pub struct ProgressSender {
    tx: async_channel::Sender<ProgressEvent>,
}

impl ProgressSender {
    pub fn new(capacity: usize) -> (Self, async_channel::Receiver<ProgressEvent>) {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn send(&self, event: ProgressEvent) {
        if let Err(async_channel::TrySendError::Full(event)) = self.tx.try_send(event) {
            let _ = self.tx.try_recv();
            let _ = self.tx.try_send(event);
        }
    }
}

/// The context one orchestrator run evaluates every plugin under: a
/// fresh id identifying this run for logging and hook correlation, the
/// target description the run was invoked against (if any), and the
/// shared data/hook handles every plugin sees.
#[derive(Clone)]
pub struct PluginContext {
    pub scan_id: String,
    pub target: Option<String>,
    pub data: Arc<DataContext>,
    pub app: Arc<AppManager>,
}

impl PluginContext {
    fn new(target: Option<String>, data: Arc<DataContext>, app: Arc<AppManager>) -> Self {
        Self {
            scan_id: uuid::Uuid::new_v4().to_string(),
            target,
            data,
            app,
        }
    }
}

/// Evaluate a single plugin against the data context: all triggers must
/// hold, then all match rules must hold, for the plugin to fire. On
/// firing, the plugin's message is written back into the context under
/// `"<id>/result"` so dependent plugins can trigger on it.
///
/// Publishes `plugin:beforeRun:<id>` before evaluation starts,
/// `plugin:onError:<id>` if writing the result back to the data context
/// fails, and `plugin:afterRun:<id>` once evaluation concludes either
/// way.
fn evaluate(plugin: &Plugin, ctx: &PluginContext) -> Result<Option<Finding>> {
    let before = format!("plugin:beforeRun:{}", plugin.id);
    let after = format!("plugin:afterRun:{}", plugin.id);
    ctx.app.trigger(&before, Some(ctx.scan_id.clone()));
    log::debug!("scan {}: evaluating plugin '{}'", ctx.scan_id, plugin.id);

    let lookup = |key: &str| ctx.data.get(key);

    let triggers_hold = plugin.triggers.iter().all(|t| t.evaluate(lookup(&t.data_key).as_deref()));
    if !triggers_hold {
        ctx.app.trigger(&after, None);
        return Ok(None);
    }
    if !plugin.match_block.is_satisfied(lookup) {
        ctx.app.trigger(&after, None);
        return Ok(None);
    }

    if let Err(e) = ctx.data.set(&plugin.id, &format!("{}/result", plugin.id), plugin.output.message.clone()) {
        ctx.app.trigger(&format!("plugin:onError:{}", plugin.id), Some(e.to_string()));
        ctx.app.trigger(&after, None);
        return Err(e);
    }

    ctx.app.trigger(&after, None);

    Ok(Some(Finding {
        plugin_id: plugin.id.clone(),
        message: plugin.output.message.clone(),
        remediation: plugin.output.remediation.clone(),
        is_vulnerability: plugin.output.is_vulnerability,
    }))
}

fn check_cancelled(cancel: &CancellationToken, progress: &ProgressSender) -> Result<()> {
    if cancel.is_cancelled() {
        progress.send(ProgressEvent::Cancelled);
        return Err(Error::cancelled("scan was cancelled"));
    }
    Ok(())
}

/// Run every plugin in catalog order, one at a time, ignoring
/// dependency order entirely. Appropriate when the catalog has no
/// dependency edges at all.
pub fn run_all_sequential(
    catalog: &[Plugin],
    data: Arc<DataContext>,
    progress: &ProgressSender,
    cancel: &CancellationToken,
    app: Arc<AppManager>,
    target: Option<String>,
) -> Result<Vec<Finding>> {
    let ctx = PluginContext::new(target, data, app);
    let mut findings = Vec::new();
    for plugin in catalog {
        check_cancelled(cancel, progress)?;
        progress.send(ProgressEvent::PluginStarted { id: plugin.id.clone() });
        let result = evaluate(plugin, &ctx)?;
        progress.send(ProgressEvent::PluginFinished {
            id: plugin.id.clone(),
            fired: result.is_some(),
        });
        if let Some(finding) = result {
            findings.push(finding);
        }
    }
    Ok(findings)
}

/// Run every plugin concurrently, ignoring dependency order. Each
/// plugin runs as its own task; all tasks are drained before returning.
pub async fn run_all_parallel(
    catalog: Vec<Plugin>,
    data: Arc<DataContext>,
    progress: ProgressSender,
    cancel: CancellationToken,
    app: Arc<AppManager>,
    target: Option<String>,
) -> Result<Vec<Finding>> {
    check_cancelled(&cancel, &progress)?;
    let ctx = PluginContext::new(target, data, app);
    let mut set = JoinSet::new();
    for plugin in catalog {
        let ctx = ctx.clone();
        let progress = progress.clone();
        set.spawn(async move {
            progress.send(ProgressEvent::PluginStarted { id: plugin.id.clone() });
            let result = evaluate(&plugin, &ctx);
            progress.send(ProgressEvent::PluginFinished {
                id: plugin.id.clone(),
                fired: matches!(result, Ok(Some(_))),
            });
            result
        });
    }

    let mut findings = Vec::new();
    while let Some(joined) = set.join_next().await {
        let evaluated = joined.map_err(|e| Error::Invocation(format!("plugin task panicked: {e}")))?;
        if let Some(finding) = evaluated? {
            findings.push(finding);
        }
    }
    Ok(findings)
}

fn catalog_index(catalog: &[Plugin]) -> HashMap<&str, &Plugin> {
    catalog.iter().map(|p| (p.id.as_str(), p)).collect()
}

/// Run the catalog in a single dependency-respecting order, one plugin
/// at a time.
pub fn run_dag_sequential(
    catalog: &[Plugin],
    data: Arc<DataContext>,
    progress: &ProgressSender,
    cancel: &CancellationToken,
    app: Arc<AppManager>,
    target: Option<String>,
) -> Result<Vec<Finding>> {
    let refs: Vec<&Plugin> = catalog.iter().collect();
    let order = dag::topological_sort(&refs)?;
    let index = catalog_index(catalog);
    let ctx = PluginContext::new(target, data, app);

    let mut findings = Vec::new();
    for id in order {
        check_cancelled(cancel, progress)?;
        let plugin = index.get(id.as_str()).expect("planned id is in catalog");
        progress.send(ProgressEvent::PluginStarted { id: plugin.id.clone() });
        let result = evaluate(plugin, &ctx)?;
        progress.send(ProgressEvent::PluginFinished {
            id: plugin.id.clone(),
            fired: result.is_some(),
        });
        if let Some(finding) = result {
            findings.push(finding);
        }
    }
    Ok(findings)
}

/// Run the catalog layer by layer: every plugin in a layer runs
/// concurrently, and the orchestrator waits for the whole layer to
/// finish (a happens-before fence) before starting the next, since a
/// later layer's plugins may trigger on an earlier layer's results.
pub async fn run_dag_layered(
    catalog: Vec<Plugin>,
    data: Arc<DataContext>,
    progress: ProgressSender,
    cancel: CancellationToken,
    app: Arc<AppManager>,
    target: Option<String>,
) -> Result<Vec<Finding>> {
    let refs: Vec<&Plugin> = catalog.iter().collect();
    let layers = dag::layers(&refs)?;
    let index: HashMap<String, Plugin> = catalog.into_iter().map(|p| (p.id.clone(), p)).collect();
    let ctx = PluginContext::new(target, data, app);

    let mut findings = Vec::new();
    for (layer_index, layer_ids) in layers.into_iter().enumerate() {
        check_cancelled(&cancel, &progress)?;
        progress.send(ProgressEvent::LayerStarted {
            index: layer_index,
            size: layer_ids.len(),
        });

        let mut set = JoinSet::new();
        for id in &layer_ids {
            let plugin = index.get(id).expect("planned id is in catalog").clone();
            let ctx = ctx.clone();
            let progress = progress.clone();
            set.spawn(async move {
                progress.send(ProgressEvent::PluginStarted { id: plugin.id.clone() });
                let result = evaluate(&plugin, &ctx);
                progress.send(ProgressEvent::PluginFinished {
                    id: plugin.id.clone(),
                    fired: matches!(result, Ok(Some(_))),
                });
                result
            });
        }

        while let Some(joined) = set.join_next().await {
            let evaluated = joined.map_err(|e| Error::Invocation(format!("plugin task panicked: {e}")))?;
            if let Some(finding) = evaluated? {
                findings.push(finding);
            }
        }

        progress.send(ProgressEvent::LayerFinished { index: layer_index });
    }

    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Workspace;
    use crate::plugin::{Condition, Match, Metadata, Output, Predicate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn firing_plugin(id: &str, depends_on: Vec<&str>) -> Plugin {
        Plugin {
            id: id.to_string(),
            name: id.to_string(),
            version: semver::Version::new(1, 0, 0),
            metadata: Metadata::default(),
            triggers: Vec::new(),
            match_block: Match::default(),
            output: Output {
                message: format!("{id} fired"),
                remediation: None,
                is_vulnerability: true,
            },
            depends_on: depends_on.into_iter().map(String::from).collect(),
        }
    }

    fn test_app() -> Arc<AppManager> {
        AppManager::new(Workspace::at("/tmp/vulntor-orchestrator-test"))
    }

    fn test_ctx(app: Arc<AppManager>) -> PluginContext {
        PluginContext::new(None, Arc::new(DataContext::new()), app)
    }

    #[test]
    fn data_context_enforces_single_writer_per_key() {
        let data = DataContext::new();
        data.set("plugin-a", "shared", "first".to_string()).unwrap();
        assert!(data.set("plugin-b", "shared", "second".to_string()).is_err());
        assert!(data.set("plugin-a", "shared", "updated".to_string()).is_ok());
    }

    #[test]
    fn evaluate_fires_plugin_with_no_gating_conditions() {
        let plugin = firing_plugin("p1", vec![]);
        let ctx = test_ctx(test_app());
        let found = evaluate(&plugin, &ctx).unwrap();
        assert!(found.is_some());
        assert_eq!(ctx.data.get("p1/result").as_deref(), Some("p1 fired"));
    }

    #[test]
    fn evaluate_skips_plugin_whose_trigger_is_unsatisfied() {
        let mut plugin = firing_plugin("p1", vec![]);
        plugin.triggers.push(Condition {
            data_key: "missing/key".to_string(),
            predicate: Predicate::Exists,
        });
        let ctx = test_ctx(test_app());
        assert!(evaluate(&plugin, &ctx).unwrap().is_none());
    }

    #[test]
    fn evaluate_publishes_before_and_after_run_hooks() {
        let plugin = firing_plugin("p1", vec![]);
        let app = test_app();
        let before_count = Arc::new(AtomicUsize::new(0));
        let after_count = Arc::new(AtomicUsize::new(0));
        let before_clone = Arc::clone(&before_count);
        let after_clone = Arc::clone(&after_count);
        app.on("plugin:beforeRun:p1", move |_| {
            before_clone.fetch_add(1, Ordering::SeqCst);
        });
        app.on("plugin:afterRun:p1", move |_| {
            after_clone.fetch_add(1, Ordering::SeqCst);
        });

        let ctx = test_ctx(app);
        evaluate(&plugin, &ctx).unwrap();

        assert_eq!(before_count.load(Ordering::SeqCst), 1);
        assert_eq!(after_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_all_sequential_collects_every_finding() {
        let catalog = vec![firing_plugin("a", vec![]), firing_plugin("b", vec![])];
        let data = Arc::new(DataContext::new());
        let (progress, _rx) = ProgressSender::new(16);
        let cancel = CancellationToken::new();
        let findings = run_all_sequential(&catalog, data, &progress, &cancel, test_app(), None).unwrap();
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn run_all_sequential_stops_immediately_when_cancelled() {
        let catalog = vec![firing_plugin("a", vec![])];
        let data = Arc::new(DataContext::new());
        let (progress, _rx) = ProgressSender::new(16);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_all_sequential(&catalog, data, &progress, &cancel, test_app(), None).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn run_dag_layered_runs_dependents_after_dependencies() {
        let catalog = vec![firing_plugin("a", vec![]), firing_plugin("b", vec!["a"])];
        let data = Arc::new(DataContext::new());
        let (progress, _rx) = ProgressSender::new(16);
        let cancel = CancellationToken::new();
        let findings = run_dag_layered(catalog, data, progress, cancel, test_app(), None).await.unwrap();
        assert_eq!(findings.len(), 2);
    }

    #[tokio::test]
    async fn run_all_parallel_collects_every_finding() {
        let catalog = vec![firing_plugin("a", vec![]), firing_plugin("b", vec![])];
        let data = Arc::new(DataContext::new());
        let (progress, _rx) = ProgressSender::new(16);
        let cancel = CancellationToken::new();
        let findings = run_all_parallel(catalog, data, progress, cancel, test_app(), None).await.unwrap();
        assert_eq!(findings.len(), 2);
    }
}
