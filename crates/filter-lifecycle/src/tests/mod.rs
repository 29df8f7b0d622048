mod support;
mod threaded_targets;
