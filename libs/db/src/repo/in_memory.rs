//! In-memory repository implementations, for engine tests and the `cli`
//! binary's scratch mode. Each one guards a `HashMap` behind a
//! `tokio::sync::Mutex` and enforces the same optimistic-concurrency
//! contract as the Postgres implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use ticketflow_domain::{
    ApprovalTask, ApprovalTaskId, Assignment, AssignmentId, AssignmentStatus, ChangeRequest,
    ChangeRequestId, ChangeRequestStatus, HandoverRequest, HandoverRequestId,
    HandoverRequestStatus, InfoRequest, InfoRequestId, InfoRequestStatus, NotificationId,
    NotificationOutboxEntry, NotificationStatus, Ticket, TicketId, TicketStep, TicketStepId,
};

use crate::repo::errors::*;
use crate::repo::traits::*;

#[derive(Default)]
pub struct InMemoryTicketRepository {
    rows: Mutex<HashMap<TicketId, Ticket>>,
}

#[async_trait]
impl TicketRepository for InMemoryTicketRepository {
    async fn find_by_id(&self, id: &TicketId) -> Result<Option<Ticket>, FindTicketError> {
        Ok(self.rows.lock().await.get(id).cloned())
    }

    async fn create(&self, ticket: Ticket) -> Result<Ticket, CreateTicketError> {
        let mut rows = self.rows.lock().await;
        rows.insert(ticket.ticket_id, ticket.clone());
        Ok(ticket)
    }

    async fn update(
        &self,
        ticket: &Ticket,
        expected_version: i64,
    ) -> Result<Ticket, UpdateTicketError> {
        let mut rows = self.rows.lock().await;
        let current = rows
            .get(&ticket.ticket_id)
            .ok_or(UpdateTicketError::NotFound(ticket.ticket_id))?;
        if current.version != expected_version {
            return Err(UpdateTicketError::Concurrency {
                expected: expected_version,
            });
        }
        let mut next = ticket.clone();
        next.version = expected_version + 1;
        rows.insert(next.ticket_id, next.clone());
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryTicketStepRepository {
    rows: Mutex<HashMap<TicketStepId, TicketStep>>,
}

#[async_trait]
impl TicketStepRepository for InMemoryTicketStepRepository {
    async fn find_by_id(
        &self,
        id: &TicketStepId,
    ) -> Result<Option<TicketStep>, FindTicketStepError> {
        Ok(self.rows.lock().await.get(id).cloned())
    }

    async fn find_by_ticket(
        &self,
        ticket_id: &TicketId,
    ) -> Result<Vec<TicketStep>, FindTicketStepError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|s| &s.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn create(&self, step: TicketStep) -> Result<TicketStep, CreateTicketStepError> {
        let mut rows = self.rows.lock().await;
        rows.insert(step.ticket_step_id, step.clone());
        Ok(step)
    }

    async fn update(
        &self,
        step: &TicketStep,
        expected_version: i64,
    ) -> Result<TicketStep, UpdateTicketStepError> {
        let mut rows = self.rows.lock().await;
        let current = rows
            .get(&step.ticket_step_id)
            .ok_or(UpdateTicketStepError::NotFound(step.ticket_step_id))?;
        if current.version != expected_version {
            return Err(UpdateTicketStepError::Concurrency {
                expected: expected_version,
            });
        }
        let mut next = step.clone();
        next.version = expected_version + 1;
        rows.insert(next.ticket_step_id, next.clone());
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryApprovalTaskRepository {
    rows: Mutex<HashMap<ApprovalTaskId, ApprovalTask>>,
}

#[async_trait]
impl ApprovalTaskRepository for InMemoryApprovalTaskRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalTaskId,
    ) -> Result<Option<ApprovalTask>, FindApprovalTaskError> {
        Ok(self.rows.lock().await.get(id).cloned())
    }

    async fn find_by_ticket_step(
        &self,
        ticket_step_id: &TicketStepId,
    ) -> Result<Vec<ApprovalTask>, FindApprovalTaskError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|t| &t.ticket_step_id == ticket_step_id)
            .cloned()
            .collect())
    }

    async fn create(&self, task: ApprovalTask) -> Result<ApprovalTask, CreateApprovalTaskError> {
        let mut rows = self.rows.lock().await;
        rows.insert(task.approval_task_id, task.clone());
        Ok(task)
    }

    async fn update(
        &self,
        task: &ApprovalTask,
        expected_version: i64,
    ) -> Result<ApprovalTask, UpdateApprovalTaskError> {
        let mut rows = self.rows.lock().await;
        let current = rows
            .get(&task.approval_task_id)
            .ok_or(UpdateApprovalTaskError::NotFound(task.approval_task_id))?;
        if current.version != expected_version {
            return Err(UpdateApprovalTaskError::Concurrency {
                expected: expected_version,
            });
        }
        let mut next = task.clone();
        next.version = expected_version + 1;
        rows.insert(next.approval_task_id, next.clone());
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryAssignmentRepository {
    rows: Mutex<HashMap<AssignmentId, Assignment>>,
}

#[async_trait]
impl AssignmentRepository for InMemoryAssignmentRepository {
    async fn find_by_id(&self, id: &AssignmentId) -> Result<Option<Assignment>, FindAssignmentError> {
        Ok(self.rows.lock().await.get(id).cloned())
    }

    async fn find_active_by_ticket_step(
        &self,
        ticket_step_id: &TicketStepId,
    ) -> Result<Option<Assignment>, FindAssignmentError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .find(|a| &a.ticket_step_id == ticket_step_id && a.status == AssignmentStatus::Active)
            .cloned())
    }

    async fn list_by_ticket_step(
        &self,
        ticket_step_id: &TicketStepId,
    ) -> Result<Vec<Assignment>, FindAssignmentError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|a| &a.ticket_step_id == ticket_step_id)
            .cloned()
            .collect())
    }

    async fn create(&self, assignment: Assignment) -> Result<Assignment, CreateAssignmentError> {
        let mut rows = self.rows.lock().await;
        rows.insert(assignment.assignment_id, assignment.clone());
        Ok(assignment)
    }

    async fn update(
        &self,
        assignment: &Assignment,
        expected_version: i64,
    ) -> Result<Assignment, UpdateAssignmentError> {
        let mut rows = self.rows.lock().await;
        let current = rows
            .get(&assignment.assignment_id)
            .ok_or(UpdateAssignmentError::NotFound(assignment.assignment_id))?;
        if current.version != expected_version {
            return Err(UpdateAssignmentError::Concurrency {
                expected: expected_version,
            });
        }
        let mut next = assignment.clone();
        next.version = expected_version + 1;
        rows.insert(next.assignment_id, next.clone());
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryInfoRequestRepository {
    rows: Mutex<HashMap<InfoRequestId, InfoRequest>>,
}

#[async_trait]
impl InfoRequestRepository for InMemoryInfoRequestRepository {
    async fn find_by_id(&self, id: &InfoRequestId) -> Result<Option<InfoRequest>, FindInfoRequestError> {
        Ok(self.rows.lock().await.get(id).cloned())
    }

    async fn find_open_by_ticket_step(
        &self,
        ticket_step_id: &TicketStepId,
    ) -> Result<Option<InfoRequest>, FindInfoRequestError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .find(|r| &r.ticket_step_id == ticket_step_id && r.status == InfoRequestStatus::Open)
            .cloned())
    }

    async fn create(&self, request: InfoRequest) -> Result<InfoRequest, CreateInfoRequestError> {
        let mut rows = self.rows.lock().await;
        rows.insert(request.info_request_id, request.clone());
        Ok(request)
    }

    async fn update(
        &self,
        request: &InfoRequest,
        expected_version: i64,
    ) -> Result<InfoRequest, UpdateInfoRequestError> {
        let mut rows = self.rows.lock().await;
        let current = rows
            .get(&request.info_request_id)
            .ok_or(UpdateInfoRequestError::NotFound(request.info_request_id))?;
        if current.version != expected_version {
            return Err(UpdateInfoRequestError::Concurrency {
                expected: expected_version,
            });
        }
        let mut next = request.clone();
        next.version = expected_version + 1;
        rows.insert(next.info_request_id, next.clone());
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryHandoverRequestRepository {
    rows: Mutex<HashMap<HandoverRequestId, HandoverRequest>>,
}

#[async_trait]
impl HandoverRequestRepository for InMemoryHandoverRequestRepository {
    async fn find_by_id(
        &self,
        id: &HandoverRequestId,
    ) -> Result<Option<HandoverRequest>, FindHandoverRequestError> {
        Ok(self.rows.lock().await.get(id).cloned())
    }

    async fn find_pending_by_ticket_step(
        &self,
        ticket_step_id: &TicketStepId,
    ) -> Result<Option<HandoverRequest>, FindHandoverRequestError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .find(|r| {
                &r.ticket_step_id == ticket_step_id && r.status == HandoverRequestStatus::Pending
            })
            .cloned())
    }

    async fn create(
        &self,
        request: HandoverRequest,
    ) -> Result<HandoverRequest, CreateHandoverRequestError> {
        let mut rows = self.rows.lock().await;
        rows.insert(request.handover_request_id, request.clone());
        Ok(request)
    }

    async fn update(
        &self,
        request: &HandoverRequest,
        expected_version: i64,
    ) -> Result<HandoverRequest, UpdateHandoverRequestError> {
        let mut rows = self.rows.lock().await;
        let current = rows
            .get(&request.handover_request_id)
            .ok_or(UpdateHandoverRequestError::NotFound(request.handover_request_id))?;
        if current.version != expected_version {
            return Err(UpdateHandoverRequestError::Concurrency {
                expected: expected_version,
            });
        }
        let mut next = request.clone();
        next.version = expected_version + 1;
        rows.insert(next.handover_request_id, next.clone());
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryChangeRequestRepository {
    rows: Mutex<HashMap<ChangeRequestId, ChangeRequest>>,
}

#[async_trait]
impl ChangeRequestRepository for InMemoryChangeRequestRepository {
    async fn find_by_id(
        &self,
        id: &ChangeRequestId,
    ) -> Result<Option<ChangeRequest>, FindChangeRequestError> {
        Ok(self.rows.lock().await.get(id).cloned())
    }

    async fn find_pending_by_ticket(
        &self,
        ticket_id: &TicketId,
    ) -> Result<Option<ChangeRequest>, FindChangeRequestError> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .find(|c| &c.ticket_id == ticket_id && c.status == ChangeRequestStatus::Pending)
            .cloned())
    }

    async fn create(
        &self,
        change_request: ChangeRequest,
    ) -> Result<ChangeRequest, CreateChangeRequestError> {
        let mut rows = self.rows.lock().await;
        rows.insert(change_request.change_request_id, change_request.clone());
        Ok(change_request)
    }

    async fn update(
        &self,
        change_request: &ChangeRequest,
        expected_version: i64,
    ) -> Result<ChangeRequest, UpdateChangeRequestError> {
        let mut rows = self.rows.lock().await;
        let current = rows
            .get(&change_request.change_request_id)
            .ok_or(UpdateChangeRequestError::NotFound(change_request.change_request_id))?;
        if current.version != expected_version {
            return Err(UpdateChangeRequestError::Concurrency {
                expected: expected_version,
            });
        }
        let mut next = change_request.clone();
        next.version = expected_version + 1;
        rows.insert(next.change_request_id, next.clone());
        Ok(next)
    }
}

#[derive(Default)]
pub struct InMemoryNotificationOutboxRepository {
    rows: Mutex<HashMap<NotificationId, NotificationOutboxEntry>>,
}

#[async_trait]
impl NotificationOutboxRepository for InMemoryNotificationOutboxRepository {
    async fn create(
        &self,
        entry: NotificationOutboxEntry,
    ) -> Result<NotificationOutboxEntry, CreateNotificationError> {
        let mut rows = self.rows.lock().await;
        rows.insert(entry.notification_id, entry.clone());
        Ok(entry)
    }

    async fn claim_due(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationOutboxEntry>, ListNotificationsError> {
        let rows = self.rows.lock().await;
        let mut due: Vec<_> = rows
            .values()
            .filter(|n| n.is_pending() && n.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|n| n.next_attempt_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_sent(
        &self,
        id: &NotificationId,
        expected_version: i64,
    ) -> Result<(), UpdateNotificationError> {
        let mut rows = self.rows.lock().await;
        let entry = rows
            .get_mut(id)
            .ok_or(UpdateNotificationError::NotFound(*id))?;
        if entry.version != expected_version {
            return Err(UpdateNotificationError::Concurrency {
                expected: expected_version,
            });
        }
        entry.status = NotificationStatus::Sent;
        entry.sent_at = Some(now_or_existing(entry.sent_at));
        entry.version += 1;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: &NotificationId,
        expected_version: i64,
        next_attempt_at: DateTime<Utc>,
        status: NotificationStatus,
    ) -> Result<(), UpdateNotificationError> {
        let mut rows = self.rows.lock().await;
        let entry = rows
            .get_mut(id)
            .ok_or(UpdateNotificationError::NotFound(*id))?;
        if entry.version != expected_version {
            return Err(UpdateNotificationError::Concurrency {
                expected: expected_version,
            });
        }
        entry.retry_count += 1;
        entry.next_attempt_at = next_attempt_at;
        entry.status = status;
        entry.version += 1;
        Ok(())
    }
}

fn now_or_existing(existing: Option<DateTime<Utc>>) -> DateTime<Utc> {
    existing.unwrap_or_else(Utc::now)
}
