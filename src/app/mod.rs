// SPDX-License-Identifier: Apache-2.0

//! The application manager: the root object a scan run hangs off of. It
//! owns the workspace-wide cancellation token, a named hook bus callers
//! and plugins can subscribe diagnostics or UI updates to, and the
//! lifecycle methods (`init`/`shutdown`) that bound a run.
//!
//! This is the same role hipcheck's `HcEngine` plays as the thing
//! `main` constructs once and drives to completion, minus the Salsa
//! incremental-query storage we have no use for here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::config::Workspace;

/// Context handed to a hook listener when its name is triggered: the
/// name itself (useful when one closure is registered under several
/// names) plus an optional free-form detail string (a scan id, an error
/// message, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub name: String,
    pub detail: Option<String>,
}

type Hook = Box<dyn Fn(&HookContext) + Send + Sync>;

static GLOBAL_APP: OnceLock<Arc<AppManager>> = OnceLock::new();

/// The root manager for one process's worth of scan activity.
pub struct AppManager {
    workspace: Workspace,
    cancel: CancellationToken,
    hooks: Mutex<HashMap<String, Vec<Hook>>>,
}

impl AppManager {
    /// Build a fresh, unshared manager. Prefer [`AppManager::init`] for
    /// the process-wide instance; this is for tests and any other caller
    /// that deliberately wants an isolated manager rather than the
    /// global singleton.
    pub fn new(workspace: Workspace) -> Arc<Self> {
        Arc::new(Self {
            workspace,
            cancel: CancellationToken::new(),
            hooks: Mutex::new(HashMap::new()),
        })
    }

    /// Initialize (or return) the process-wide manager. Idempotent: a
    /// second call returns the instance the first call built, ignoring
    /// the `workspace` argument it was given -- the same guarantee
    /// [`crate::shell::Shell::init`] makes for the global shell.
    pub fn init(workspace: Workspace) -> Arc<Self> {
        Arc::clone(GLOBAL_APP.get_or_init(|| Self::new(workspace)))
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register a listener under `name`, invoked in registration order
    /// whenever [`AppManager::trigger`] is called with that same name.
    /// Hooks must not block for long: a slow hook delays whatever
    /// triggered it.
    pub fn on(&self, name: impl Into<String>, hook: impl Fn(&HookContext) + Send + Sync + 'static) {
        self.hooks.lock().expect("hook map poisoned").entry(name.into()).or_default().push(Box::new(hook));
    }

    /// Invoke every listener registered under `name`, in registration
    /// order. A name with no listeners is a no-op. Used by the
    /// orchestrator to publish `plugin:beforeRun:<id>`,
    /// `plugin:onError:<id>`, and `plugin:afterRun:<id>` around each
    /// plugin's evaluation, and by [`AppManager::shutdown`] to publish
    /// `onShutdown`.
    pub fn trigger(&self, name: &str, detail: Option<String>) {
        let hooks = self.hooks.lock().expect("hook map poisoned");
        if let Some(listeners) = hooks.get(name) {
            let ctx = HookContext {
                name: name.to_string(),
                detail,
            };
            for hook in listeners {
                hook(&ctx);
            }
        }
    }

    /// Request cancellation of any in-flight orchestrator run. Returns
    /// immediately; cancellation is cooperative and observed at the
    /// next check point inside the orchestrator.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tear down the manager: mark cancelled (in case a run is still in
    /// flight) and dispatch `onShutdown` to any registered listeners.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.trigger("onShutdown", None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn hooks_observe_every_trigger_under_their_name_in_order() {
        let app = AppManager::new(Workspace::at("/tmp/vulntor-test-workspace"));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        app.on("plugin:beforeRun:demo", move |_ctx| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        app.trigger("plugin:beforeRun:demo", None);
        app.trigger("plugin:beforeRun:demo", Some("scan-1".to_string()));
        app.trigger("plugin:afterRun:demo", None);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn shutdown_cancels_the_token_and_dispatches_on_shutdown() {
        let app = AppManager::new(Workspace::at("/tmp/vulntor-test-workspace"));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let observed_clone = Arc::clone(&observed);
        app.on("onShutdown", move |ctx| {
            observed_clone.lock().unwrap().push(ctx.name.clone());
        });

        assert!(!app.is_cancelled());
        app.shutdown();
        assert!(app.is_cancelled());
        assert_eq!(observed.lock().unwrap().as_slice(), &["onShutdown".to_string()]);
    }

    #[test]
    fn cancel_is_observable_through_a_cloned_token() {
        let app = AppManager::new(Workspace::at("/tmp/vulntor-test-workspace"));
        let token = app.cancellation_token();
        assert!(!token.is_cancelled());
        app.cancel();
        assert!(token.is_cancelled());
    }
}
