//! Security-focused logging module to track authentication and authorization events
//!
//! Callers only ever see a generic "unauthorized"; the precise cause of each
//! rejection is recorded here and in the `log` output.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::authz::Transport;
use crate::constants::MAX_SECURITY_EVENTS;

/// Types of security events to track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    // Authentication events
    AuthenticationFailed { email: Option<String>, reason: String },
    AuthenticationSuccess { user_id: String },
    TokenValidationFailed { fingerprint: Option<String>, reason: String },
    RefreshIssued { user_id: String },
    AccountActivated { user_id: String },
    ActivationFailed { email: Option<String>, reason: String },

    // Authorization events
    PermissionDenied { user_id: String, transport: Transport, resource: String },
    UnauthenticatedAccess { transport: Transport, resource: String, reason: String },

    // Provisioning
    IdentityProvisioned { user_id: String, by: String },

    // Backend
    StoreFailure { operation: String, error: String },
}

impl SecurityEvent {
    /// Key used for counting and alert thresholds
    pub fn key(&self) -> &'static str {
        match self {
            SecurityEvent::AuthenticationFailed { .. } => "auth_failed",
            SecurityEvent::AuthenticationSuccess { .. } => "auth_success",
            SecurityEvent::TokenValidationFailed { .. } => "token_validation_failed",
            SecurityEvent::RefreshIssued { .. } => "refresh_issued",
            SecurityEvent::AccountActivated { .. } => "account_activated",
            SecurityEvent::ActivationFailed { .. } => "activation_failed",
            SecurityEvent::PermissionDenied { .. } => "permission_denied",
            SecurityEvent::UnauthenticatedAccess { .. } => "unauthenticated_access",
            SecurityEvent::IdentityProvisioned { .. } => "identity_provisioned",
            SecurityEvent::StoreFailure { .. } => "store_failure",
        }
    }
}

#[derive(Debug, Clone)]
struct TimestampedEvent {
    event: SecurityEvent,
    timestamp: Instant,
}

/// Security logger for tracking and alerting on security events.
///
/// Constructed once at startup and shared through `Arc`.
pub struct SecurityLogger {
    events: Arc<RwLock<Vec<TimestampedEvent>>>,
    event_counts: Arc<RwLock<HashMap<&'static str, usize>>>,
    max_events: usize,
    alert_thresholds: HashMap<&'static str, usize>,
}

impl SecurityLogger {
    pub fn new() -> Self {
        let mut alert_thresholds = HashMap::new();
        alert_thresholds.insert("auth_failed", 5);
        alert_thresholds.insert("activation_failed", 5);
        alert_thresholds.insert("token_validation_failed", 10);
        alert_thresholds.insert("permission_denied", 20);
        alert_thresholds.insert("unauthenticated_access", 10);
        alert_thresholds.insert("store_failure", 3);

        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            event_counts: Arc::new(RwLock::new(HashMap::new())),
            max_events: MAX_SECURITY_EVENTS,
            alert_thresholds,
        }
    }

    /// Log a security event
    pub async fn log_event(&self, event: SecurityEvent) {
        let event_key = event.key();

        {
            let mut events = self.events.write().await;
            events.push(TimestampedEvent {
                event: event.clone(),
                timestamp: Instant::now(),
            });
            if events.len() > self.max_events {
                let excess = events.len() - self.max_events;
                events.drain(0..excess);
            }
        }

        // One running total per event type; an alert fires at every multiple of its threshold
        {
            let mut counts = self.event_counts.write().await;
            let count = counts.entry(event_key).or_insert(0);
            *count += 1;
            if let Some(&threshold) = self.alert_thresholds.get(event_key) {
                if *count % threshold == 0 {
                    log::error!(
                        "SECURITY ALERT: {} events of type '{}' detected; latest: {:?}",
                        count,
                        event_key,
                        event
                    );
                }
            }
        }

        match &event {
            SecurityEvent::AuthenticationFailed { email, reason } => {
                log::warn!("SECURITY: Authentication failed - Email: {:?}, Reason: {}", email, reason);
            }
            SecurityEvent::AuthenticationSuccess { user_id } => {
                log::info!("SECURITY: Authentication success - User: {}", user_id);
            }
            SecurityEvent::TokenValidationFailed { fingerprint, reason } => {
                log::warn!(
                    "SECURITY: Token validation failed - Token: {:?}, Reason: {}",
                    fingerprint,
                    reason
                );
            }
            SecurityEvent::RefreshIssued { user_id } => {
                log::debug!("SECURITY: Token pair refreshed - User: {}", user_id);
            }
            SecurityEvent::AccountActivated { user_id } => {
                log::info!("SECURITY: Account activated - User: {}", user_id);
            }
            SecurityEvent::ActivationFailed { email, reason } => {
                log::warn!("SECURITY: Activation failed - Email: {:?}, Reason: {}", email, reason);
            }
            SecurityEvent::PermissionDenied { user_id, transport, resource } => {
                log::warn!(
                    "SECURITY: Permission denied - User: {}, Transport: {}, Resource: {}",
                    user_id,
                    transport,
                    resource
                );
            }
            SecurityEvent::UnauthenticatedAccess { transport, resource, reason } => {
                log::warn!(
                    "SECURITY: Unauthenticated access - Transport: {}, Resource: {}, Reason: {}",
                    transport,
                    resource,
                    reason
                );
            }
            SecurityEvent::IdentityProvisioned { user_id, by } => {
                log::info!("SECURITY: Identity provisioned - User: {}, By: {}", user_id, by);
            }
            SecurityEvent::StoreFailure { operation, error } => {
                log::error!("SECURITY: Store failure - Operation: {}, Error: {}", operation, error);
            }
        }
    }

    /// Get recent security events
    pub async fn get_recent_events(&self, duration: Duration) -> Vec<SecurityEvent> {
        let events = self.events.read().await;
        let now = Instant::now();
        events
            .iter()
            .filter(|event| now.duration_since(event.timestamp) <= duration)
            .map(|event| event.event.clone())
            .collect()
    }

    /// Totals per event key
    pub async fn get_event_stats(&self) -> HashMap<&'static str, usize> {
        self.event_counts.read().await.clone()
    }

    /// Drop events older than `max_age`
    pub async fn cleanup_old_events(&self, max_age: Duration) {
        let mut events = self.events.write().await;
        let now = Instant::now();
        events.retain(|event| now.duration_since(event.timestamp) <= max_age);
    }

    /// Start periodic cleanup task
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                self.cleanup_old_events(Duration::from_secs(3600 * 24)).await;
            }
        });
    }
}

impl Default for SecurityLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_recorded_and_counted() {
        let logger = SecurityLogger::new();
        logger
            .log_event(SecurityEvent::AuthenticationFailed {
                email: Some("a@b.com".into()),
                reason: "no user associated with email address".into(),
            })
            .await;
        logger
            .log_event(SecurityEvent::AuthenticationSuccess { user_id: "u1".into() })
            .await;

        let recent = logger.get_recent_events(Duration::from_secs(60)).await;
        assert_eq!(recent.len(), 2);
        let stats = logger.get_event_stats().await;
        assert_eq!(stats.get("auth_failed"), Some(&1));
        assert_eq!(stats.get("auth_success"), Some(&1));
    }

    #[tokio::test]
    async fn test_event_buffer_is_bounded() {
        let mut logger = SecurityLogger::new();
        logger.max_events = 3;
        for i in 0..5 {
            logger
                .log_event(SecurityEvent::RefreshIssued { user_id: format!("u{}", i) })
                .await;
        }
        let recent = logger.get_recent_events(Duration::from_secs(60)).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0], SecurityEvent::RefreshIssued { user_id: "u2".into() });
    }

    #[tokio::test]
    async fn test_counts_keep_running_past_alert_threshold() {
        let logger = SecurityLogger::new();
        for _ in 0..7 {
            logger
                .log_event(SecurityEvent::StoreFailure {
                    operation: "login".into(),
                    error: "timeout".into(),
                })
                .await;
        }
        let stats = logger.get_event_stats().await;
        assert_eq!(stats.get("store_failure"), Some(&7));
    }
}
