use std::sync::Arc;

use serde::Serialize;

use crate::classifier::ProviderError;
use crate::cli::{Cli, Command};
use crate::config::CapgateConfig;
use crate::credential::Credential;
use crate::identity::{LocalIdentity, Session};
use crate::navigator::RecordingNavigator;
use crate::paths::CapgatePaths;
use crate::provider::Provider;
use crate::resolver::ProviderClient;
use crate::runtime::CapabilityRuntime;
use crate::validator::SkippedValidator;

pub fn run(cli: Cli) -> Result<(), String> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| e.to_string())?;
    rt.block_on(run_command(cli))
}

async fn run_command(cli: Cli) -> Result<(), String> {
    let paths = CapgatePaths::discover();
    let config = CapgateConfig::load(&paths).map_err(|e| e.to_string())?;
    let identity = match cli.user.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(user_id) => {
            let mut session = Session::new(user_id);
            if let Some(email) = cli.email.clone() {
                session = session.with_email(email);
            }
            LocalIdentity::signed_in(session)
        }
        None => LocalIdentity::new(),
    };
    let navigator = Arc::new(RecordingNavigator::new());
    let mut builder =
        CapabilityRuntime::builder_from_config(&config, &paths, Arc::new(identity))?
            .navigator(navigator.clone());
    if matches!(
        cli.command,
        Command::Onboard {
            skip_validation: true,
            ..
        }
    ) {
        builder = builder.validator(Arc::new(SkippedValidator));
    }
    let runtime = builder.build();

    match cli.command {
        Command::Status => {
            let _ = runtime.startup_sync().await;
            let payload = serde_json::json!({
                "status": runtime.status(),
                "paths": {
                    "rootDir": paths.root_dir().display().to_string(),
                    "configPath": paths.config_path().display().to_string(),
                    "auditDir": paths.audit_dir().display().to_string(),
                },
                "config": config,
            });
            print_json(&payload)
        }
        Command::Resolve {
            provider,
            materialize,
        } => {
            let client = if materialize {
                match runtime.materialize(provider).await {
                    Ok(client) => client,
                    Err(err) => {
                        let classification = runtime.classify(&err);
                        return Err(format!("{err} (classified as {classification:?})"));
                    }
                }
            } else {
                runtime.resolve(provider).await.map_err(|e| e.to_string())?
            };
            print_json(&serde_json::json!({
                "client": client_json(&client),
                "state": runtime.state(),
            }))
        }
        Command::Check => {
            let outcome = runtime
                .guard(|client| async move { client_json(&client) })
                .await;
            print_json(&serde_json::json!({
                "outcome": outcome.label(),
                "client": outcome.ran(),
                "state": runtime.state(),
                "navigation": navigator.take(),
            }))
        }
        Command::Store { provider, key } => {
            let credential = require_credential(key)?;
            runtime
                .store_credential(provider, &credential)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&serde_json::json!({
                "stored": true,
                "provider": provider,
                "fingerprint": credential.fingerprint(),
            }))
        }
        Command::Keys => print_json(&runtime.provider_status().await),
        Command::Onboard {
            provider,
            key,
            skip,
            ..
        } => {
            let mut session = runtime.begin_onboarding(provider);
            if skip {
                runtime
                    .skip_onboarding(&mut session)
                    .map_err(|e| e.to_string())?;
                return print_json(&serde_json::json!({
                    "provider": provider,
                    "step": session.step(),
                    "skipped": runtime.has_skipped_onboarding(),
                }));
            }
            session
                .set_input(key.as_deref().unwrap_or_default())
                .map_err(|e| e.to_string())?;
            let stored = runtime
                .submit_onboarding(&mut session)
                .await
                .map_err(|e| e.to_string())?;
            session.close().map_err(|e| e.to_string())?;
            print_json(&serde_json::json!({
                "provider": provider,
                "step": session.step(),
                "stored": stored,
                "state": runtime.state(),
            }))
        }
        Command::Disable { confirm } => {
            let mut session = runtime.begin_onboarding(Provider::PRIMARY);
            session.request_disable().map_err(|e| e.to_string())?;
            if confirm {
                runtime
                    .confirm_disable(&mut session)
                    .map_err(|e| e.to_string())?;
            }
            print_json(&serde_json::json!({
                "step": session.step(),
                "aiEnabled": runtime.status().ai_enabled,
            }))
        }
        Command::Enable => {
            let enabled = runtime.re_enable();
            print_json(&serde_json::json!({
                "enabled": enabled,
                "aiEnabled": runtime.status().ai_enabled,
                "navigation": navigator.take(),
            }))
        }
        Command::Classify { message, status } => {
            let message = message.unwrap_or_default();
            let error = match status {
                Some(status) => ProviderError::from_http(status, &message),
                None => ProviderError::from_message(&message),
            };
            let classification = runtime.classify(&error);
            print_json(&serde_json::json!({
                "error": error.to_string(),
                "classification": classification,
                "state": runtime.state(),
                "navigation": navigator.take(),
            }))
        }
        Command::Audit {
            limit,
            before_ts_ms,
        } => {
            let events = runtime
                .audit_log()
                .read(limit, before_ts_ms)
                .map_err(|e| e.to_string())?;
            print_json(&events)
        }
    }
}

fn require_credential(raw: String) -> Result<Credential, String> {
    Credential::new(raw).ok_or_else(|| "key must not be empty".to_string())
}

fn client_json(client: &ProviderClient) -> serde_json::Value {
    serde_json::json!({
        "provider": client.provider,
        "source": client.source.label(),
        "fingerprint": client.credential().map(Credential::fingerprint),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let raw = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", raw);
    Ok(())
}
