use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use futures_util::future::BoxFuture;
use tracing::info;

use crate::context::{ExitRequest, EXIT_RESTART};
use crate::memory::MemoryStore;

/// Reply prefix the reasoning model uses to request a runtime action
/// instead of a spoken answer. Never forwarded to the speech sink.
pub const ACTION_PREFIX: &str = "ACTION:";

/// Parses `ACTION: name | argument` (argument optional).
pub fn parse_action_reply(reply: &str) -> Option<(String, String)> {
    let rest = reply.trim().strip_prefix(ACTION_PREFIX)?;
    let mut parts = rest.splitn(2, '|');
    let name = parts.next()?.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }
    let argument = parts.next().unwrap_or("").trim().to_string();
    Some((name, argument))
}

type Handler = Box<dyn Fn(String) -> BoxFuture<'static, String> + Send + Sync>;

struct ActionSpec {
    sensitive: bool,
    handler: Handler,
}

/// Named runtime actions the reasoning model may invoke. Sensitive
/// actions are never executed directly; the dispatcher parks them behind
/// a user confirmation first.
pub struct ActionRegistry {
    actions: HashMap<String, ActionSpec>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, sensitive: bool, handler: F)
    where
        F: Fn(String) -> BoxFuture<'static, String> + Send + Sync + 'static,
    {
        self.actions.insert(
            name.to_string(),
            ActionSpec {
                sensitive,
                handler: Box::new(handler),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.actions.get(name).is_some_and(|spec| spec.sensitive)
    }

    /// Runs the named action and returns its spoken result. Unknown
    /// actions yield `None`.
    pub async fn execute(&self, name: &str, argument: &str) -> Option<String> {
        let spec = self.actions.get(name)?;
        info!(action = name, "executing runtime action");
        Some((spec.handler)(argument.to_string()).await)
    }

    /// One line per action for the system prompt.
    pub fn describe(&self) -> String {
        let mut names: Vec<_> = self.actions.keys().cloned().collect();
        names.sort();
        names.join(", ")
    }

    /// The built-in action set.
    pub fn builtin(memory: Arc<MemoryStore>, exit: ExitRequest) -> Self {
        let mut registry = Self::new();

        registry.register("current_time", false, |_| {
            Box::pin(async {
                format!("It's {}.", Local::now().format("%-I:%M %p"))
            })
        });

        let store = Arc::clone(&memory);
        registry.register("remember_fact", false, move |fact| {
            let store = Arc::clone(&store);
            Box::pin(async move {
                if fact.is_empty() {
                    return "There was nothing to remember.".to_string();
                }
                store.add(&fact, &["action"]);
                "Noted.".to_string()
            })
        });

        let store = Arc::clone(&memory);
        registry.register("clear_memory", true, move |_| {
            let store = Arc::clone(&store);
            Box::pin(async move {
                store.clear();
                "Memory cleared.".to_string()
            })
        });

        registry.register("restart_runtime", true, move |_| {
            let exit = exit.clone();
            Box::pin(async move {
                exit.request(EXIT_RESTART);
                "Restarting now.".to_string()
            })
        });

        registry
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
