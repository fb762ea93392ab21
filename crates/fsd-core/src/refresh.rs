//! ---
//! fsd_section: "04-configuration-orchestration"
//! fsd_subsection: "module"
//! fsd_type: "source"
//! fsd_scope: "code"
//! fsd_description: "Routes polled data to the view, audit engine and alert feed."
//! fsd_version: "v0.0.0-prealpha"
//! fsd_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use fsd_api::ApiOperation;
use fsd_common::PollDomain;
use futures::future::join_all;

use crate::alerts::AlertFeed;
use crate::audit::AuditFilterEngine;
use crate::error::DashboardError;
use crate::gate::SessionGate;
use crate::scheduler::PollHandler;
use crate::view::DashboardView;

#[derive(Debug, Clone)]
pub struct DashboardRefresher {
    gate: Arc<SessionGate>,
    view: Arc<DashboardView>,
    audit: Arc<AuditFilterEngine>,
    alerts: Arc<AlertFeed>,
}

impl DashboardRefresher {
    pub fn new(
        gate: Arc<SessionGate>,
        view: Arc<DashboardView>,
        audit: Arc<AuditFilterEngine>,
        alerts: Arc<AlertFeed>,
    ) -> Self {
        Self {
            gate,
            view,
            audit,
            alerts,
        }
    }

    async fn fetch(&self, domain: PollDomain) -> Result<(), DashboardError> {
        let gate = &self.gate;
        match domain {
            PollDomain::Status => {
                let status = gate
                    .call(ApiOperation::FetchStatus, |api, token| async move {
                        api.fetch_status(token.as_ref()).await
                    })
                    .await?;
                self.view.set_status(status);
            }
            PollDomain::Files => {
                let files = gate
                    .call(ApiOperation::ListFiles, |api, token| async move {
                        api.list_files(token.as_ref()).await
                    })
                    .await?;
                self.view.set_files(files);
            }
            PollDomain::AuditLog => {
                let entries = gate
                    .call(ApiOperation::FetchAuditLog, |api, token| async move {
                        api.fetch_audit_log(token.as_ref()).await
                    })
                    .await?;
                self.audit.ingest(entries);
            }
            PollDomain::SecurityEvents => {
                let events = gate
                    .call(ApiOperation::FetchSecurityEvents, |api, token| async move {
                        api.fetch_security_events(token.as_ref()).await
                    })
                    .await?;
                self.alerts.ingest_security(&events);
                self.view.set_security(events);
            }
            PollDomain::Locks => {
                let locks = gate
                    .call(ApiOperation::FetchLocks, |api, token| async move {
                        api.fetch_locks(token.as_ref()).await
                    })
                    .await?;
                self.view.set_locks(locks);
            }
        }
        Ok(())
    }

    /// Fetch every domain once, concurrently.
    pub async fn refresh_all(&self) -> Vec<(PollDomain, Result<(), DashboardError>)> {
        let results = join_all(PollDomain::ALL.map(|domain| self.poll(domain))).await;
        PollDomain::ALL.into_iter().zip(results).collect()
    }
}

#[async_trait]
impl PollHandler for DashboardRefresher {
    async fn poll(&self, domain: PollDomain) -> Result<(), DashboardError> {
        let result = self.fetch(domain).await;
        match &result {
            Ok(()) => self.view.mark_healthy(domain),
            Err(err) => self.view.mark_failed(domain, &err.to_string()),
        }
        result
    }
}
