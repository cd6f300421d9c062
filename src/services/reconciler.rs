use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::TransactionTrait;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::dedup::DedupCache;
use crate::errors::ServiceError;
use crate::services::catalog::{self, StockDecrement};
use crate::services::orders::{self, OrderService};
use crate::stripe::{CartLine, CheckoutContext, CheckoutSessionLookup, EventType, PaymentEvent};

/// Everything needed to persist one order, extracted and validated from
/// a payment event before any creation strategy runs.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub user_id: String,
    pub reference: String,
    pub total_amount: Decimal,
    pub cart: Vec<CartLine>,
}

/// What a creation strategy actually persisted. The stepwise path can
/// legitimately skip lines or fail decrements without failing the order.
#[derive(Debug, Clone)]
pub struct CreationReport {
    pub order_id: Uuid,
    pub lines_created: usize,
    pub skipped_skus: Vec<String>,
    pub decrement_failures: Vec<String>,
}

/// Terminal outcomes of reconciling one verified event. All of these
/// acknowledge with HTTP 200; errors surface separately as `ServiceError`.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Exactly one order was persisted (possibly partially fulfilled on
    /// the stepwise path).
    Completed(CreationReport),
    /// The transaction was already handled; nothing was written.
    Duplicate,
    /// A `payment_intent.payment_failed` notification; logged only.
    PaymentFailed,
    /// An event type this service does not act on, or a succeeded intent
    /// whose session could not be resolved. Acknowledged so the provider
    /// stops retrying.
    Ignored(String),
}

/// Strategy seam for order creation: one transactional implementation
/// and one best-effort stepwise implementation.
#[async_trait]
pub trait OrderCreator: Send + Sync {
    async fn create(&self, draft: &OrderDraft) -> Result<CreationReport, ServiceError>;

    fn name(&self) -> &'static str;
}

/// Preferred path: order, line items, and stock decrements in one
/// database transaction. Any failure rolls the whole unit back, leaving
/// no partial order behind.
pub struct AtomicOrderCreator {
    db_pool: Arc<DbPool>,
}

impl AtomicOrderCreator {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl OrderCreator for AtomicOrderCreator {
    #[instrument(skip(self, draft), fields(reference = %draft.reference, user_id = %draft.user_id))]
    async fn create(&self, draft: &OrderDraft) -> Result<CreationReport, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        let order = orders::insert_order(
            &txn,
            &draft.user_id,
            draft.total_amount,
            Some(&draft.reference),
        )
        .await?;

        for line in &draft.cart {
            let unit_price = catalog::price_for_sku(&txn, &line.sku)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("sku {} not in catalog", line.sku))
                })?;

            orders::insert_line_item(&txn, order.id, &line.sku, line.quantity, unit_price)
                .await?;

            match catalog::decrement_stock(&txn, &line.sku, line.quantity).await? {
                StockDecrement::Decremented => {}
                StockDecrement::InsufficientStock => {
                    return Err(ServiceError::InsufficientStock(line.sku.clone()));
                }
                StockDecrement::NotFound => {
                    return Err(ServiceError::NotFound(format!(
                        "sku {} not in catalog",
                        line.sku
                    )));
                }
            }
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order.id, lines = draft.cart.len(), "Order created atomically");

        Ok(CreationReport {
            order_id: order.id,
            lines_created: draft.cart.len(),
            skipped_skus: Vec::new(),
            decrement_failures: Vec::new(),
        })
    }

    fn name(&self) -> &'static str {
        "atomic"
    }
}

/// Fallback path: a manual multi-step sequence without a transactional
/// wrapper. The order row is inserted first (failure there escalates);
/// after that every line is best-effort. A SKU missing from the catalog
/// or a failed decrement is logged and skipped, never fatal: failing the
/// whole webhook at this point would make the provider retry and risk a
/// second order for the lines that did succeed.
pub struct StepwiseOrderCreator {
    db_pool: Arc<DbPool>,
}

impl StepwiseOrderCreator {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl OrderCreator for StepwiseOrderCreator {
    #[instrument(skip(self, draft), fields(reference = %draft.reference, user_id = %draft.user_id))]
    async fn create(&self, draft: &OrderDraft) -> Result<CreationReport, ServiceError> {
        let conn = &*self.db_pool;

        let order = orders::insert_order(
            conn,
            &draft.user_id,
            draft.total_amount,
            Some(&draft.reference),
        )
        .await?;

        let mut report = CreationReport {
            order_id: order.id,
            lines_created: 0,
            skipped_skus: Vec::new(),
            decrement_failures: Vec::new(),
        };

        for line in &draft.cart {
            let unit_price = match catalog::price_for_sku(conn, &line.sku).await {
                Ok(Some(price)) => price,
                Ok(None) => {
                    warn!(order_id = %order.id, sku = %line.sku,
                        "SKU not in catalog; skipping line item");
                    report.skipped_skus.push(line.sku.clone());
                    continue;
                }
                Err(e) => {
                    warn!(order_id = %order.id, sku = %line.sku, error = %e,
                        "Price lookup failed; skipping line item");
                    report.skipped_skus.push(line.sku.clone());
                    continue;
                }
            };

            if let Err(e) =
                orders::insert_line_item(conn, order.id, &line.sku, line.quantity, unit_price)
                    .await
            {
                warn!(order_id = %order.id, sku = %line.sku, error = %e,
                    "Line item insert failed; skipping line");
                report.skipped_skus.push(line.sku.clone());
                continue;
            }
            report.lines_created += 1;

            match catalog::decrement_stock(conn, &line.sku, line.quantity).await {
                Ok(StockDecrement::Decremented) => {}
                Ok(StockDecrement::InsufficientStock) => {
                    warn!(order_id = %order.id, sku = %line.sku, quantity = line.quantity,
                        "Stock too low to decrement; order kept, flagged for review");
                    report.decrement_failures.push(line.sku.clone());
                }
                Ok(StockDecrement::NotFound) => {
                    warn!(order_id = %order.id, sku = %line.sku,
                        "SKU vanished before decrement; order kept, flagged for review");
                    report.decrement_failures.push(line.sku.clone());
                }
                Err(e) => {
                    warn!(order_id = %order.id, sku = %line.sku, error = %e,
                        "Stock decrement errored; order kept, flagged for review");
                    report.decrement_failures.push(line.sku.clone());
                }
            }
        }

        info!(
            order_id = %order.id,
            lines_created = report.lines_created,
            skipped = report.skipped_skus.len(),
            decrement_failures = report.decrement_failures.len(),
            "Order created stepwise"
        );

        Ok(report)
    }

    fn name(&self) -> &'static str {
        "stepwise"
    }
}

/// Turns one verified payment event into at most one order, tolerating
/// duplicate and concurrent deliveries.
///
/// De-duplication is layered: the in-process cache (checked and marked
/// before any database I/O for this reference), an exact match on the
/// persisted transaction reference, and the heuristic same-user
/// same-amount recent-order probe. A sufficiently adversarial race can
/// still slip past all three; that residual risk is accepted.
pub struct Reconciler {
    orders: OrderService,
    session_lookup: Arc<dyn CheckoutSessionLookup>,
    cache: Arc<DedupCache>,
    atomic: AtomicOrderCreator,
    stepwise: StepwiseOrderCreator,
    prefer_atomic: bool,
    duplicate_window: Duration,
}

impl Reconciler {
    pub fn new(
        db_pool: Arc<DbPool>,
        session_lookup: Arc<dyn CheckoutSessionLookup>,
        cache: Arc<DedupCache>,
        prefer_atomic: bool,
        duplicate_window_secs: i64,
    ) -> Self {
        Self {
            orders: OrderService::new(db_pool.clone()),
            session_lookup,
            cache,
            atomic: AtomicOrderCreator::new(db_pool.clone()),
            stepwise: StepwiseOrderCreator::new(db_pool),
            prefer_atomic,
            duplicate_window: Duration::seconds(duplicate_window_secs),
        }
    }

    #[instrument(skip(self, event), fields(event_type = %event.event_type.as_str(), object_id = %event.object_id))]
    pub async fn reconcile(&self, event: PaymentEvent) -> Result<ReconcileOutcome, ServiceError> {
        let context = match &event.event_type {
            EventType::CheckoutCompleted => self.context_from_session_event(&event)?,
            EventType::PaymentIntentSucceeded => {
                match self.resolve_session(&event.object_id).await? {
                    Some(context) => context,
                    None => {
                        warn!(payment_intent = %event.object_id,
                            "No checkout session found for succeeded payment intent; acknowledging");
                        return Ok(ReconcileOutcome::Ignored(
                            "no checkout session for payment intent".into(),
                        ));
                    }
                }
            }
            EventType::PaymentIntentFailed => {
                warn!(payment_intent = %event.object_id, "Payment intent failed; no order created");
                return Ok(ReconcileOutcome::PaymentFailed);
            }
            EventType::Other(raw) => {
                info!(event_type = %raw, "Unhandled webhook event type; acknowledging");
                return Ok(ReconcileOutcome::Ignored(raw.clone()));
            }
        };

        // Fast-path duplicate suppression. Check and mark happen before
        // any further I/O for this reference so concurrent deliveries
        // milliseconds apart collapse to a single processing attempt.
        if !self.cache.check_and_insert(&context.reference) {
            info!(reference = %context.reference, "Duplicate delivery short-circuited by cache");
            return Ok(ReconcileOutcome::Duplicate);
        }

        match self.reconcile_admitted(&context).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // A 5xx answer tells the provider to retry. The retry must
                // not be swallowed by the fast path while no order exists,
                // so the reference is evicted again. 4xx answers stay
                // cached: the provider is told not to redeliver those.
                if e.status_code().is_server_error() {
                    warn!(reference = %context.reference, error = %e,
                        "Reconciliation failed after cache admission; evicting reference for the retry");
                    self.cache.remove(&context.reference);
                }
                Err(e)
            }
        }
    }

    async fn reconcile_admitted(
        &self,
        context: &CheckoutContext,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let cart = context.cart()?;
        let user_id = match context.user_id() {
            Ok(user_id) => user_id.to_string(),
            Err(e) => {
                // A paid transaction that cannot be attributed: loud log,
                // since there is no user-facing retry affordance.
                error!(reference = %context.reference,
                    "Paid event carries no user id; order cannot be attributed");
                return Err(e);
            }
        };

        let draft = OrderDraft {
            user_id,
            reference: context.reference.clone(),
            total_amount: context.total_amount(),
            cart,
        };

        // Persistent duplicate checks: exact reference match first, then
        // the (user, amount, window) heuristic for rows persisted before
        // the reference column was populated or indexed.
        if let Some(existing) = self.orders.find_by_reference(&draft.reference).await? {
            info!(reference = %draft.reference, order_id = %existing.id,
                "Order already recorded for this transaction reference");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let since = Utc::now() - self.duplicate_window;
        let recent = self
            .orders
            .find_recent_orders(&draft.user_id, draft.total_amount, since)
            .await?;
        if !recent.is_empty() {
            warn!(reference = %draft.reference, user_id = %draft.user_id,
                matches = recent.len(),
                "Recent order with same user and amount; treating delivery as duplicate");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let report = self.create_order(&draft).await?;
        Ok(ReconcileOutcome::Completed(report))
    }

    fn context_from_session_event(
        &self,
        event: &PaymentEvent,
    ) -> Result<CheckoutContext, ServiceError> {
        let amount_minor_units = event.amount_minor_units.ok_or_else(|| {
            ServiceError::MalformedPayload("checkout session without amount_total".into())
        })?;

        Ok(CheckoutContext {
            reference: event.object_id.clone(),
            amount_minor_units,
            metadata: event.metadata.clone(),
        })
    }

    async fn resolve_session(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<CheckoutContext>, ServiceError> {
        let session = self
            .session_lookup
            .find_checkout_session(payment_intent_id)
            .await?;

        Ok(session.map(|session| CheckoutContext {
            reference: session.id,
            amount_minor_units: session.amount_minor_units,
            metadata: session.metadata,
        }))
    }

    async fn create_order(&self, draft: &OrderDraft) -> Result<CreationReport, ServiceError> {
        if self.prefer_atomic {
            match self.atomic.create(draft).await {
                Ok(report) => return Ok(report),
                Err(e) => {
                    warn!(reference = %draft.reference, error = %e,
                        "Atomic order creation failed; falling back to stepwise path");
                }
            }
        }

        self.stepwise.create(draft).await
    }
}
