//! Fire-and-forget notification dispatch.
//!
//! Email delivery lives outside this service. The core hands completed
//! events to a [Notifier] after the database transaction commits; a failed
//! dispatch is logged and never rolls back the state change that produced
//! it.

use crate::ids::{BudgetId, RuleOverrideId, TransactionId};

/// An event worth telling humans about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A budget was presented to parents for acknowledgment.
    BudgetPresented {
        /// The presented budget.
        budget_id: BudgetId,
    },
    /// A budget crossed its acknowledgment threshold and locked.
    BudgetLocked {
        /// The locked budget.
        budget_id: BudgetId,
    },
    /// A transaction failed validation and entered the exception queue.
    ExceptionRaised {
        /// The non-compliant transaction.
        transaction_id: TransactionId,
        /// The derived severity, e.g. `HIGH`.
        severity: String,
    },
    /// An exception was resolved.
    ExceptionResolved {
        /// The resolved transaction.
        transaction_id: TransactionId,
        /// The resolution method that was used, e.g. `OVERRIDE`.
        resolution: String,
    },
    /// A team rule override request was approved or rejected.
    RuleOverrideDecided {
        /// The decided override request.
        override_id: RuleOverrideId,
        /// Whether the request was approved.
        approved: bool,
    },
}

/// A sink for notifications.
///
/// Implementations must not block the request for long and must not fail
/// loudly: the state change that produced the notification has already
/// committed.
pub trait Notifier: Send + Sync {
    /// Dispatch `notification` to whoever should hear about it.
    fn notify(&self, notification: Notification);
}

/// A [Notifier] that writes notifications to the application log.
///
/// The default sink. Deployments wire a real email dispatcher in front of
/// the service; the core only needs somewhere to put the event.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!("notification dispatched: {notification:?}");
    }
}
