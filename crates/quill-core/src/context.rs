//! Request context supplied by the dispatch layer on every invocation.
//!
//! Every field is required. Validation never fills in a default identity.

use crate::error::{CoreError, CoreResult};
use crate::types::SessionMode;

/// Raw context as handed over by the caller.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub transport_id: Option<String>,
    pub session_id: Option<String>,
    pub requested_mode: Option<SessionMode>,
    pub agent_identity: Option<String>,
    pub intent: Option<String>,
    pub timestamp_utc: Option<String>,
}

/// How the caller identifies itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Transport(String),
    Session(String),
}

/// A context with every required field present.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedContext {
    pub identity: Identity,
    pub requested_mode: SessionMode,
    pub agent_identity: String,
    pub intent: String,
    pub timestamp_utc: String,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl RequestContext {
    pub fn for_transport(transport_id: &str, agent: &str, mode: SessionMode, intent: &str) -> Self {
        Self {
            transport_id: Some(transport_id.to_string()),
            session_id: None,
            requested_mode: Some(mode),
            agent_identity: Some(agent.to_string()),
            intent: Some(intent.to_string()),
            timestamp_utc: Some(crate::entry::now_rfc3339()),
        }
    }

    pub fn for_session(session_id: &str, agent: &str, mode: SessionMode, intent: &str) -> Self {
        Self {
            transport_id: None,
            session_id: Some(session_id.to_string()),
            ..Self::for_transport("", agent, mode, intent)
        }
    }

    /// Hard-fail with the first absent field. An explicit session id wins over a transport id.
    pub fn validate(&self) -> CoreResult<ValidatedContext> {
        let identity = match (present(&self.session_id), present(&self.transport_id)) {
            (Some(sid), _) => Identity::Session(sid.to_string()),
            (None, Some(tid)) => Identity::Transport(tid.to_string()),
            (None, None) => {
                return Err(CoreError::InvalidIdentity {
                    field: "transport_id",
                })
            }
        };
        let requested_mode = self.requested_mode.ok_or(CoreError::InvalidIdentity {
            field: "requested_mode",
        })?;
        let agent_identity = present(&self.agent_identity).ok_or(CoreError::InvalidIdentity {
            field: "agent_identity",
        })?;
        let intent = present(&self.intent).ok_or(CoreError::InvalidIdentity { field: "intent" })?;
        let timestamp_utc = present(&self.timestamp_utc).ok_or(CoreError::InvalidIdentity {
            field: "timestamp_utc",
        })?;

        Ok(ValidatedContext {
            identity,
            requested_mode,
            agent_identity: agent_identity.to_string(),
            intent: intent.to_string(),
            timestamp_utc: timestamp_utc.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_field(ctx: &RequestContext) -> &'static str {
        match ctx.validate().unwrap_err() {
            CoreError::InvalidIdentity { field } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn transport_context_validates() {
        let ctx = RequestContext::for_transport("t1", "agent-a", SessionMode::Isolated, "log");
        let v = ctx.validate().unwrap();
        assert_eq!(v.identity, Identity::Transport("t1".into()));
        assert_eq!(v.agent_identity, "agent-a");
    }

    #[test]
    fn explicit_session_wins() {
        let mut ctx = RequestContext::for_session("sess-1", "agent-a", SessionMode::Project, "log");
        ctx.transport_id = Some("t1".into());
        let v = ctx.validate().unwrap();
        assert_eq!(v.identity, Identity::Session("sess-1".into()));
    }

    #[test]
    fn empty_identity_is_rejected_not_defaulted() {
        let ctx = RequestContext::for_transport("   ", "agent-a", SessionMode::Isolated, "log");
        assert_eq!(missing_field(&ctx), "transport_id");
    }

    #[test]
    fn each_required_field_is_named() {
        let base = RequestContext::for_transport("t1", "agent-a", SessionMode::Isolated, "log");

        let mut ctx = base.clone();
        ctx.requested_mode = None;
        assert_eq!(missing_field(&ctx), "requested_mode");

        let mut ctx = base.clone();
        ctx.agent_identity = Some(String::new());
        assert_eq!(missing_field(&ctx), "agent_identity");

        let mut ctx = base.clone();
        ctx.intent = None;
        assert_eq!(missing_field(&ctx), "intent");

        let mut ctx = base;
        ctx.timestamp_utc = None;
        assert_eq!(missing_field(&ctx), "timestamp_utc");
    }
}
