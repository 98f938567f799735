//! Translates wire [`Request`]s into [`DaemonState`] calls and wraps the
//! result back into a wire [`Response`].

use std::time::Duration;

use portcullis_shared::errors::PortcullisError;
use portcullis_shared::wire::{ApplyCounters, Request, Response};

use crate::audit;
use crate::lifecycle::DaemonState;
use crate::policy::Policy;

pub async fn dispatch(state: &DaemonState, req: Request) -> Response {
    let timeout = Duration::from_millis(state.config.mutator_timeout_ms);
    match req {
        Request::Ping => Response::ok(serde_json::json!({ "pong": true })),

        Request::Validate { policy } => match parse_policy(state, &policy) {
            Ok(parsed) => match crate::lifecycle::compile_preview(&parsed) {
                Ok(filters) => Response::ok(serde_json::json!({
                    "valid": true,
                    "filter_count": filters.len(),
                })),
                Err(e) => Response::err(&e),
            },
            Err(e) => Response::err(&e),
        },

        Request::Apply { policy_path } => match policy_path {
            Some(path) => match std::fs::read_to_string(&path)
                .map_err(PortcullisError::from)
                .and_then(|s| parse_policy(state, &s))
            {
                Ok(parsed) => apply_response(state, parsed, timeout).await,
                Err(e) => Response::err(&e),
            },
            None => Response::err(&PortcullisError::InvalidArgument(
                "apply requires policy_path".into(),
            )),
        },

        Request::ApplyBytes { policy } => match parse_policy(state, &policy) {
            Ok(parsed) => apply_response(state, parsed, timeout).await,
            Err(e) => Response::err(&e),
        },

        Request::Rollback => match state.rollback(timeout).await {
            Ok(counters) => counters_response(counters),
            Err(e) => Response::err(&e),
        },

        Request::Teardown => match state.teardown(timeout).await {
            Ok(()) => Response::ok(serde_json::json!({})),
            Err(e) => Response::err(&e),
        },

        Request::RevertLkg => match state.revert_to_lkg(timeout).await {
            Ok(counters) => counters_response(counters),
            Err(e) => Response::err(&e),
        },

        Request::WatchSet { path } => {
            state.set_watch_path(path.map(std::path::PathBuf::from));
            Response::ok(serde_json::json!({ "watching": state.watch_path() }))
        }

        Request::WatchStatus => Response::ok(serde_json::json!({
            "path": state.watch_path(),
        })),

        Request::GetLkg { include_body } => {
            let outcome = crate::lkg::load(&state.layout.lkg_path());
            match outcome {
                crate::lkg::LoadOutcome::Present(policy) => {
                    #[allow(unused_mut)]
                    let mut body =
                        serde_json::json!({ "present": true, "version": policy.version });
                    if include_body {
                        body["policy"] = serde_json::to_value(&policy).unwrap_or_default();
                    }
                    Response::ok(body)
                }
                crate::lkg::LoadOutcome::Absent => {
                    Response::ok(serde_json::json!({ "present": false }))
                }
                crate::lkg::LoadOutcome::Corrupt(reason) => Response::err(
                    &PortcullisError::InvalidState(format!("LKG store corrupt: {reason}")),
                ),
            }
        }

        Request::GetLogs {
            tail,
            since_minutes: _,
        } => match audit::tail(&state.layout.audit_log_path(), tail.unwrap_or(100)) {
            Ok(events) => Response::ok(serde_json::json!({ "events": events })),
            Err(e) => Response::err(&e),
        },
    }
}

async fn apply_response(state: &DaemonState, policy: Policy, timeout: Duration) -> Response {
    match state.apply(policy, timeout).await {
        Ok(counters) => counters_response(counters),
        Err(e) => Response::err(&e),
    }
}

fn counters_response(counters: ApplyCounters) -> Response {
    Response::ok(serde_json::to_value(counters).unwrap_or_default())
}

fn parse_policy(state: &DaemonState, raw: &str) -> Result<Policy, PortcullisError> {
    crate::policy::validate_raw(raw, state.config.max_policy_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryAdapter;
    use crate::config::{DaemonConfig, Layout};
    use std::sync::Arc;

    fn state() -> (DaemonState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure_dirs().unwrap();
        let state = DaemonState::new(
            DaemonConfig::default(),
            layout,
            Arc::new(InMemoryAdapter::new()),
        );
        (state, dir)
    }

    #[tokio::test]
    async fn ping_returns_ok() {
        let (state, _dir) = state();
        let resp = dispatch(&state, Request::Ping).await;
        matches!(resp, Response::Ok(_));
    }

    #[tokio::test]
    async fn validate_rejects_malformed_json() {
        let (state, _dir) = state();
        let resp = dispatch(
            &state,
            Request::Validate {
                policy: "not json".into(),
            },
        )
        .await;
        assert!(matches!(resp, Response::Err(_)));
    }

    #[tokio::test]
    async fn apply_bytes_installs_policy() {
        let (state, _dir) = state();
        let policy = serde_json::json!({
            "version": "1.0.0",
            "default_action": "allow",
            "updated_at": chrono::Utc::now().to_rfc3339(),
            "rules": [],
        })
        .to_string();
        let resp = dispatch(&state, Request::ApplyBytes { policy }).await;
        assert!(matches!(resp, Response::Ok(_)));
        assert!(state.current_policy().is_some());
    }
}
