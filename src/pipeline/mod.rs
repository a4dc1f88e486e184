pub mod artifact;
pub mod chat;
pub mod coloring;
pub mod failure_hint;
pub mod flow;
pub mod generation;
pub mod runlog;
pub mod runtime;
pub mod settings_layer;
pub mod template_pool;
