pub mod app;
pub mod audit;
pub mod cache;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod credential;
pub mod guard;
pub mod identity;
pub mod local_store;
pub mod logging;
pub mod navigator;
pub mod onboarding;
pub mod paths;
pub mod preferences;
pub mod provider;
pub mod resolver;
pub mod runtime;
pub mod secret_store;
pub mod state;
#[cfg(test)]
pub mod test_support;
pub mod validator;
