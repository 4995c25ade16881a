//! Dispatcher schema and shared handler dependencies, grounded in the
//! teacher's `telegram::handlers` module: one `HandlerDeps` cloned per
//! branch, a flat `dptree::entry().branch(...)` tree.

mod inline;
mod messages;
mod start;
mod voice;

use std::sync::Arc;

use teloxide::dispatching::UpdateHandler;

use doracore::engine::Engine;
use health_monitor::ActivityProbe;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct HandlerDeps {
    pub engine: Arc<Engine>,
    pub activity: Arc<ActivityProbe>,
}

impl HandlerDeps {
    pub fn new(engine: Arc<Engine>, activity: Arc<ActivityProbe>) -> Self {
        Self { engine, activity }
    }
}

pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_start = deps.clone();
    let deps_callback = deps.clone();
    let deps_voice = deps.clone();
    let deps_inline = deps.clone();
    let deps_messages = deps;

    dptree::entry()
        .branch(start::handler(deps_start))
        .branch(start::callback_handler(deps_callback))
        .branch(voice::handler(deps_voice))
        .branch(inline::handler(deps_inline))
        .branch(messages::handler(deps_messages))
}
