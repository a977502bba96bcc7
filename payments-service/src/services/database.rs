//! Database service for payments-service.
//!
//! All multi-step mutations (charges, installments, refunds, cycle
//! billing) run inside one transaction with row locks on the plan or
//! deal, so a partially applied ledger can never be observed.

use crate::models::{
    CreateDeal, CreateInvoice, CreatePlan, CreateSubscription, Deal, DealStatus, GatewaySettings,
    Invoice, NewPayment, Payment, PaymentPlan, PaymentStatus, PlanStatus, RecurringPayment,
    SubscriptionStatus, UpsertGatewaySettings,
};
use crate::services::metrics::{DB_QUERY_DURATION, INSTALLMENTS_TOTAL};
use crate::services::{plans, subscriptions};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Failure modes of the invoice insert that callers react to
/// differently: number collisions are retried, payment duplicates are
/// a business conflict.
#[derive(Debug)]
pub enum InvoiceInsertError {
    NumberTaken,
    DuplicatePayment,
    Db(AppError),
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "payments-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Gateway settings
    // -------------------------------------------------------------------------

    /// Upsert one gateway settings row. Setting is_default unsets the
    /// flag on every other row in the same transaction, keeping at
    /// most one default.
    #[instrument(skip(self, input), fields(gateway = %input.gateway))]
    pub async fn upsert_gateway_settings(
        &self,
        input: &UpsertGatewaySettings,
    ) -> Result<GatewaySettings, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_gateway_settings"])
            .start_timer();

        let mut tx = self.begin().await?;

        if input.is_default == Some(true) {
            sqlx::query("UPDATE gateway_settings SET is_default = FALSE, updated_utc = NOW() WHERE gateway <> $1")
                .bind(&input.gateway)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow!("Failed to clear default gateway: {}", e))
                })?;
        }

        let settings = sqlx::query_as::<_, GatewaySettings>(
            r#"
            INSERT INTO gateway_settings (
                gateway_settings_id, gateway, is_active, is_default, terminal_id,
                api_key, api_secret, webhook_secret, vat_rate, invoice_prefix,
                receipt_prefix, settings
            )
            VALUES (
                $1, $2, COALESCE($3, FALSE), COALESCE($4, FALSE), $5,
                $6, $7, $8, COALESCE($9, 17), COALESCE($10, 'INV'),
                COALESCE($11, 'RCP'), $12
            )
            ON CONFLICT (gateway) DO UPDATE SET
                is_active      = COALESCE($3, gateway_settings.is_active),
                is_default     = COALESCE($4, gateway_settings.is_default),
                terminal_id    = COALESCE($5, gateway_settings.terminal_id),
                api_key        = COALESCE($6, gateway_settings.api_key),
                api_secret     = COALESCE($7, gateway_settings.api_secret),
                webhook_secret = COALESCE($8, gateway_settings.webhook_secret),
                vat_rate       = COALESCE($9, gateway_settings.vat_rate),
                invoice_prefix = COALESCE($10, gateway_settings.invoice_prefix),
                receipt_prefix = COALESCE($11, gateway_settings.receipt_prefix),
                settings       = COALESCE($12, gateway_settings.settings),
                updated_utc    = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.gateway)
        .bind(input.is_active)
        .bind(input.is_default)
        .bind(&input.terminal_id)
        .bind(&input.api_key)
        .bind(&input.api_secret)
        .bind(&input.webhook_secret)
        .bind(input.vat_rate)
        .bind(&input.invoice_prefix)
        .bind(&input.receipt_prefix)
        .bind(&input.settings)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to upsert gateway settings: {}", e)))?;

        self.commit(tx).await?;
        timer.observe_duration();

        info!(gateway = %settings.gateway, is_default = settings.is_default, "Gateway settings saved");
        Ok(settings)
    }

    pub async fn list_gateway_settings(&self) -> Result<Vec<GatewaySettings>, AppError> {
        sqlx::query_as::<_, GatewaySettings>(
            "SELECT * FROM gateway_settings ORDER BY gateway",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to list gateway settings: {}", e)))
    }

    pub async fn get_gateway_settings(
        &self,
        gateway: &str,
    ) -> Result<Option<GatewaySettings>, AppError> {
        sqlx::query_as::<_, GatewaySettings>("SELECT * FROM gateway_settings WHERE gateway = $1")
            .bind(gateway)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load gateway settings: {}", e)))
    }

    /// The configured default gateway, falling back to the first active
    /// row when no default is flagged.
    pub async fn default_gateway_settings(&self) -> Result<Option<GatewaySettings>, AppError> {
        sqlx::query_as::<_, GatewaySettings>(
            r#"
            SELECT * FROM gateway_settings
            WHERE is_active = TRUE
            ORDER BY is_default DESC, created_utc ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load default gateway: {}", e)))
    }

    // -------------------------------------------------------------------------
    // Deals
    // -------------------------------------------------------------------------

    pub async fn create_deal(&self, input: &CreateDeal) -> Result<Deal, AppError> {
        sqlx::query_as::<_, Deal>(
            r#"
            INSERT INTO deals (
                deal_id, contact_id, product_name, customer_name, customer_email,
                customer_phone, currency, final_amount
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.contact_id)
        .bind(&input.product_name)
        .bind(&input.customer_name)
        .bind(&input.customer_email)
        .bind(&input.customer_phone)
        .bind(&input.currency)
        .bind(input.final_amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to create deal: {}", e)))
    }

    pub async fn get_deal(&self, deal_id: Uuid) -> Result<Option<Deal>, AppError> {
        sqlx::query_as::<_, Deal>("SELECT * FROM deals WHERE deal_id = $1")
            .bind(deal_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load deal: {}", e)))
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE payment_id = $1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load payment: {}", e)))
    }

    pub async fn get_payment_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load payment: {}", e)))
    }

    /// Persist a settlement attempt. Completed payments tied to a deal
    /// move the deal's paid amount and derived status in the same
    /// transaction.
    #[instrument(skip(self, input), fields(gateway = ?input.gateway))]
    pub async fn record_charge(&self, input: &NewPayment) -> Result<Payment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_charge"])
            .start_timer();

        let mut tx = self.begin().await?;
        let payment = Self::insert_payment(&mut tx, input).await?;

        if input.status == PaymentStatus::Completed {
            if let Some(deal_id) = input.deal_id {
                Self::apply_deal_increment(&mut tx, deal_id, input.amount, Utc::now()).await?;
            }
        }

        self.commit(tx).await?;
        timer.observe_duration();
        Ok(payment)
    }

    /// Atomically move a completed payment into processing so exactly
    /// one refund attempt holds it before the gateway is called. A
    /// competing caller gets a conflict, never a second gateway call.
    #[instrument(skip(self))]
    pub async fn claim_refund(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        let claimed = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments SET status = 'processing', updated_utc = NOW()
            WHERE payment_id = $1 AND status = 'completed'
            RETURNING *
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to claim refund: {}", e)))?;

        if let Some(payment) = claimed {
            return Ok(payment);
        }

        let payment = self
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Payment not found")))?;
        match PaymentStatus::from_string(&payment.status) {
            PaymentStatus::Refunded => {
                Err(AppError::Conflict(anyhow!("Payment is already refunded")))
            }
            _ => Err(AppError::Conflict(anyhow!(
                "Only completed payments can be refunded"
            ))),
        }
    }

    /// Put a claimed payment back to completed after the gateway
    /// refused the refund.
    pub async fn release_refund_claim(&self, payment_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE payments SET status = 'completed', updated_utc = NOW()
            WHERE payment_id = $1 AND status = 'processing'
            "#,
        )
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to release refund claim: {}", e)))?;
        Ok(())
    }

    /// Transition a completed (or refund-claimed) payment to refunded
    /// and pull the amount back out of the deal. Returns false when the
    /// payment is already refunded (idempotent under webhook
    /// redelivery).
    #[instrument(skip(self))]
    pub async fn refund_payment_record(
        &self,
        payment_id: Uuid,
        amount: Decimal,
    ) -> Result<bool, AppError> {
        let mut tx = self.begin().await?;

        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE payment_id = $1 FOR UPDATE",
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to lock payment: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow!("Payment not found")))?;

        match PaymentStatus::from_string(&payment.status) {
            PaymentStatus::Refunded => {
                tx.rollback().await.ok();
                return Ok(false);
            }
            // Processing covers a refund claim in flight.
            PaymentStatus::Completed | PaymentStatus::Processing => {}
            _ => {
                return Err(AppError::Conflict(anyhow!(
                    "Only completed payments can be refunded"
                )));
            }
        }

        sqlx::query(
            "UPDATE payments SET status = $2, updated_utc = NOW() WHERE payment_id = $1",
        )
        .bind(payment_id)
        .bind(PaymentStatus::Refunded.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update payment: {}", e)))?;

        if let Some(deal_id) = payment.deal_id {
            Self::apply_deal_decrement(&mut tx, deal_id, amount).await?;
        }

        self.commit(tx).await?;
        Ok(true)
    }

    /// Settle a pending payment from a verified webhook. Returns false
    /// when the payment already carries a settled status.
    pub async fn complete_payment_record(&self, payment_id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.begin().await?;

        let payment = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE payment_id = $1 FOR UPDATE",
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to lock payment: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow!("Payment not found")))?;

        if !matches!(
            PaymentStatus::from_string(&payment.status),
            PaymentStatus::Pending | PaymentStatus::Processing
        ) {
            tx.rollback().await.ok();
            return Ok(false);
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE payments SET status = $2, completed_at = $3, updated_utc = NOW() WHERE payment_id = $1",
        )
        .bind(payment_id)
        .bind(PaymentStatus::Completed.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update payment: {}", e)))?;

        if let Some(deal_id) = payment.deal_id {
            Self::apply_deal_increment(&mut tx, deal_id, payment.amount, now).await?;
        }

        self.commit(tx).await?;
        Ok(true)
    }

    /// Mark a pending payment failed from a verified webhook.
    pub async fn fail_payment_record(
        &self,
        payment_id: Uuid,
        error_code: Option<&str>,
    ) -> Result<bool, AppError> {
        let updated = sqlx::query(
            r#"
            UPDATE payments SET status = 'failed', error_code = $2, updated_utc = NOW()
            WHERE payment_id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(payment_id)
        .bind(error_code)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update payment: {}", e)))?;

        Ok(updated.rows_affected() > 0)
    }

    // -------------------------------------------------------------------------
    // Payment plans
    // -------------------------------------------------------------------------

    pub async fn create_plan(&self, input: &CreatePlan) -> Result<PaymentPlan, AppError> {
        self.get_deal(input.deal_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Deal not found")))?;

        sqlx::query_as::<_, PaymentPlan>(
            r#"
            INSERT INTO payment_plans (
                plan_id, deal_id, contact_id, total_amount, number_of_payments,
                payment_frequency, start_date, next_payment_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.deal_id)
        .bind(input.contact_id)
        .bind(input.total_amount)
        .bind(input.number_of_payments)
        .bind(input.payment_frequency.as_str())
        .bind(input.start_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to create plan: {}", e)))
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> Result<Option<PaymentPlan>, AppError> {
        sqlx::query_as::<_, PaymentPlan>("SELECT * FROM payment_plans WHERE plan_id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load plan: {}", e)))
    }

    /// Record one installment: payment insert, plan counters and the
    /// parent deal, all or nothing. The plan row lock serializes
    /// concurrent installment requests so the installment count can
    /// never pass the plan's total.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn record_installment(
        &self,
        plan_id: Uuid,
        amount_override: Option<Decimal>,
    ) -> Result<(Payment, PaymentPlan), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_installment"])
            .start_timer();

        let mut tx = self.begin().await?;

        let plan = sqlx::query_as::<_, PaymentPlan>(
            "SELECT * FROM payment_plans WHERE plan_id = $1 FOR UPDATE",
        )
        .bind(plan_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to lock plan: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow!("Payment plan not found")))?;

        let now = Utc::now();
        let outcome = plans::apply_installment(&plan, amount_override, now.date_naive())?;

        let deal = sqlx::query_as::<_, Deal>("SELECT * FROM deals WHERE deal_id = $1 FOR UPDATE")
            .bind(plan.deal_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to lock deal: {}", e)))?
            .ok_or_else(|| AppError::NotFound(anyhow!("Deal not found for plan")))?;

        let payment = Self::insert_payment(
            &mut tx,
            &NewPayment {
                deal_id: Some(plan.deal_id),
                contact_id: plan.contact_id,
                plan_id: Some(plan.plan_id),
                subscription_id: None,
                amount: outcome.amount,
                currency: deal.currency.clone(),
                payment_method: "installment".to_string(),
                gateway: None,
                status: PaymentStatus::Completed,
                transaction_id: Some(plans::synthetic_transaction_id(
                    plan.plan_id,
                    outcome.paid_installments,
                )),
                auth_code: None,
                last4_digits: None,
                card_brand: None,
                error_code: None,
                error_message: None,
                completed_at: Some(now),
            },
        )
        .await?;

        let status = if outcome.completed {
            PlanStatus::Completed
        } else {
            PlanStatus::Active
        };
        let completed_at = if outcome.completed { Some(now) } else { None };

        let plan = sqlx::query_as::<_, PaymentPlan>(
            r#"
            UPDATE payment_plans SET
                paid_amount = $2, paid_installments = $3, next_payment_date = $4,
                status = $5, completed_at = $6, updated_utc = NOW()
            WHERE plan_id = $1
            RETURNING *
            "#,
        )
        .bind(plan.plan_id)
        .bind(outcome.paid_amount)
        .bind(outcome.paid_installments)
        .bind(outcome.next_payment_date)
        .bind(status.as_str())
        .bind(completed_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update plan: {}", e)))?;

        Self::apply_deal_increment(&mut tx, deal.deal_id, outcome.amount, now).await?;

        self.commit(tx).await?;
        timer.observe_duration();
        INSTALLMENTS_TOTAL
            .with_label_values(&[&plan.payment_frequency])
            .inc();

        info!(
            plan_id = %plan.plan_id,
            paid_installments = plan.paid_installments,
            completed = outcome.completed,
            "Installment recorded"
        );
        Ok((payment, plan))
    }

    /// Manual pause/resume/cancel with current-state guards.
    pub async fn update_plan_status(
        &self,
        plan_id: Uuid,
        target: PlanStatus,
    ) -> Result<PaymentPlan, AppError> {
        let mut tx = self.begin().await?;

        let plan = sqlx::query_as::<_, PaymentPlan>(
            "SELECT * FROM payment_plans WHERE plan_id = $1 FOR UPDATE",
        )
        .bind(plan_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to lock plan: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow!("Payment plan not found")))?;

        plans::check_transition(PlanStatus::from_string(&plan.status), target)?;

        let plan = sqlx::query_as::<_, PaymentPlan>(
            "UPDATE payment_plans SET status = $2, updated_utc = NOW() WHERE plan_id = $1 RETURNING *",
        )
        .bind(plan_id)
        .bind(target.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update plan: {}", e)))?;

        self.commit(tx).await?;
        Ok(plan)
    }

    /// Delete a plan that has no recorded payments.
    pub async fn delete_plan(&self, plan_id: Uuid) -> Result<(), AppError> {
        let payments: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE plan_id = $1")
                .bind(plan_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow!("Failed to count payments: {}", e)))?;

        if payments > 0 {
            return Err(AppError::Conflict(anyhow!(
                "Cannot delete a plan with recorded payments"
            )));
        }

        let deleted = sqlx::query("DELETE FROM payment_plans WHERE plan_id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to delete plan: {}", e)))?;

        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow!("Payment plan not found")));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Recurring payments
    // -------------------------------------------------------------------------

    pub async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<RecurringPayment, AppError> {
        sqlx::query_as::<_, RecurringPayment>(
            r#"
            INSERT INTO recurring_payments (
                subscription_id, contact_id, deal_id, description, amount,
                currency, billing_cycle, start_date, next_billing_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.contact_id)
        .bind(input.deal_id)
        .bind(&input.description)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(input.billing_cycle.as_str())
        .bind(input.start_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to create subscription: {}", e)))
    }

    pub async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<RecurringPayment>, AppError> {
        sqlx::query_as::<_, RecurringPayment>(
            "SELECT * FROM recurring_payments WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load subscription: {}", e)))
    }

    pub async fn list_active_subscriptions(&self) -> Result<Vec<RecurringPayment>, AppError> {
        sqlx::query_as::<_, RecurringPayment>(
            "SELECT * FROM recurring_payments WHERE status = 'active' ORDER BY created_utc",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to list subscriptions: {}", e)))
    }

    /// Bill one cycle: payment insert plus counters and the next
    /// billing date, in one transaction.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn charge_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<(Payment, RecurringPayment), AppError> {
        let mut tx = self.begin().await?;

        let subscription = sqlx::query_as::<_, RecurringPayment>(
            "SELECT * FROM recurring_payments WHERE subscription_id = $1 FOR UPDATE",
        )
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to lock subscription: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow!("Subscription not found")))?;

        let now = Utc::now();
        let outcome = subscriptions::apply_cycle(&subscription, now.date_naive())?;

        let payment = Self::insert_payment(
            &mut tx,
            &NewPayment {
                deal_id: subscription.deal_id,
                contact_id: subscription.contact_id,
                plan_id: None,
                subscription_id: Some(subscription.subscription_id),
                amount: outcome.amount,
                currency: subscription.currency.clone(),
                payment_method: "subscription".to_string(),
                gateway: None,
                status: PaymentStatus::Completed,
                transaction_id: Some(subscriptions::synthetic_transaction_id(
                    subscription.subscription_id,
                    outcome.total_charges,
                )),
                auth_code: None,
                last4_digits: None,
                card_brand: None,
                error_code: None,
                error_message: None,
                completed_at: Some(now),
            },
        )
        .await?;

        let subscription = sqlx::query_as::<_, RecurringPayment>(
            r#"
            UPDATE recurring_payments SET
                total_charges = $2, total_revenue = $3, next_billing_date = $4,
                updated_utc = NOW()
            WHERE subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(subscription.subscription_id)
        .bind(outcome.total_charges)
        .bind(outcome.total_revenue)
        .bind(outcome.next_billing_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update subscription: {}", e)))?;

        self.commit(tx).await?;

        info!(
            subscription_id = %subscription.subscription_id,
            total_charges = subscription.total_charges,
            "Subscription cycle billed"
        );
        Ok((payment, subscription))
    }

    pub async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        target: SubscriptionStatus,
    ) -> Result<RecurringPayment, AppError> {
        let mut tx = self.begin().await?;

        let subscription = sqlx::query_as::<_, RecurringPayment>(
            "SELECT * FROM recurring_payments WHERE subscription_id = $1 FOR UPDATE",
        )
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to lock subscription: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow!("Subscription not found")))?;

        subscriptions::check_transition(
            SubscriptionStatus::from_string(&subscription.status),
            target,
        )?;

        let cancelled_at = if target == SubscriptionStatus::Cancelled {
            Some(Utc::now())
        } else {
            subscription.cancelled_at
        };

        let subscription = sqlx::query_as::<_, RecurringPayment>(
            r#"
            UPDATE recurring_payments SET status = $2, cancelled_at = $3, updated_utc = NOW()
            WHERE subscription_id = $1
            RETURNING *
            "#,
        )
        .bind(subscription_id)
        .bind(target.as_str())
        .bind(cancelled_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update subscription: {}", e)))?;

        self.commit(tx).await?;
        Ok(subscription)
    }

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<Option<Invoice>, AppError> {
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE invoice_id = $1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load invoice: {}", e)))
    }

    pub async fn get_invoice_by_payment(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE payment_id = $1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to load invoice: {}", e)))
    }

    /// Highest allocated sequence in a prefix+year bucket, 0 when the
    /// bucket is empty. A candidate only; the unique constraint is the
    /// real uniqueness guard.
    pub async fn max_invoice_sequence(&self, prefix: &str, year: i32) -> Result<i64, AppError> {
        let numbers: Vec<String> =
            sqlx::query_scalar("SELECT invoice_number FROM invoices WHERE invoice_number LIKE $1")
                .bind(format!("{}-{}-%", prefix, year))
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow!("Failed to scan invoice numbers: {}", e))
                })?;

        Ok(numbers
            .iter()
            .filter_map(|n| crate::services::invoices::parse_invoice_sequence(n, prefix, year))
            .max()
            .unwrap_or(0))
    }

    pub async fn insert_invoice(&self, input: &CreateInvoice) -> Result<Invoice, InvoiceInsertError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let line_items = serde_json::to_value(&input.line_items)
            .map_err(|e| InvoiceInsertError::Db(AppError::InternalError(anyhow!(e))))?;

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                invoice_id, payment_id, invoice_number, invoice_type, subtotal,
                vat_rate, vat_amount, total_amount, currency, line_items,
                customer_name, customer_email, customer_phone, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'issued')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.payment_id)
        .bind(&input.invoice_number)
        .bind(input.invoice_type.as_str())
        .bind(input.subtotal)
        .bind(input.vat_rate)
        .bind(input.vat_amount)
        .bind(input.total_amount)
        .bind(&input.currency)
        .bind(line_items)
        .bind(&input.customer_name)
        .bind(&input.customer_email)
        .bind(&input.customer_phone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                if db_err.constraint() == Some("invoices_payment_id_key") {
                    InvoiceInsertError::DuplicatePayment
                } else {
                    InvoiceInsertError::NumberTaken
                }
            }
            _ => InvoiceInsertError::Db(AppError::DatabaseError(anyhow!(
                "Failed to insert invoice: {}",
                e
            ))),
        })?;

        timer.observe_duration();
        Ok(invoice)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to begin transaction: {}", e)))
    }

    async fn commit(&self, tx: Transaction<'static, Postgres>) -> Result<(), AppError> {
        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to commit transaction: {}", e)))
    }

    async fn insert_payment(
        tx: &mut Transaction<'static, Postgres>,
        input: &NewPayment,
    ) -> Result<Payment, AppError> {
        let completed_at = match input.status {
            PaymentStatus::Completed => input.completed_at.or_else(|| Some(Utc::now())),
            _ => input.completed_at,
        };

        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                payment_id, deal_id, contact_id, plan_id, subscription_id, amount,
                currency, payment_method, gateway, status, transaction_id, auth_code,
                last4_digits, card_brand, error_code, error_message, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.deal_id)
        .bind(input.contact_id)
        .bind(input.plan_id)
        .bind(input.subscription_id)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(&input.payment_method)
        .bind(&input.gateway)
        .bind(input.status.as_str())
        .bind(&input.transaction_id)
        .bind(&input.auth_code)
        .bind(&input.last4_digits)
        .bind(&input.card_brand)
        .bind(&input.error_code)
        .bind(&input.error_message)
        .bind(completed_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to insert payment: {}", e)))
    }

    /// Move a deal's paid amount up and re-derive its status; paid_at
    /// is set only on the transition to paid.
    async fn apply_deal_increment(
        tx: &mut Transaction<'static, Postgres>,
        deal_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let deal = sqlx::query_as::<_, Deal>("SELECT * FROM deals WHERE deal_id = $1 FOR UPDATE")
            .bind(deal_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to lock deal: {}", e)))?
            .ok_or_else(|| AppError::NotFound(anyhow!("Deal not found")))?;

        let paid_amount = deal.paid_amount + amount;
        let status = DealStatus::derive(paid_amount, deal.final_amount);
        let paid_at = if status == DealStatus::Paid && deal.paid_at.is_none() {
            Some(now)
        } else {
            deal.paid_at
        };

        sqlx::query(
            r#"
            UPDATE deals SET paid_amount = $2, status = $3, paid_at = $4, updated_utc = NOW()
            WHERE deal_id = $1
            "#,
        )
        .bind(deal_id)
        .bind(paid_amount)
        .bind(status.as_str())
        .bind(paid_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update deal: {}", e)))?;

        Ok(())
    }

    /// Pull a refunded amount back out of a deal.
    async fn apply_deal_decrement(
        tx: &mut Transaction<'static, Postgres>,
        deal_id: Uuid,
        amount: Decimal,
    ) -> Result<(), AppError> {
        let deal = sqlx::query_as::<_, Deal>("SELECT * FROM deals WHERE deal_id = $1 FOR UPDATE")
            .bind(deal_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow!("Failed to lock deal: {}", e)))?
            .ok_or_else(|| AppError::NotFound(anyhow!("Deal not found")))?;

        let paid_amount = (deal.paid_amount - amount).max(Decimal::ZERO);
        let status = if paid_amount == Decimal::ZERO {
            DealStatus::Refunded
        } else {
            DealStatus::PartiallyPaid
        };

        sqlx::query(
            r#"
            UPDATE deals SET paid_amount = $2, status = $3, updated_utc = NOW()
            WHERE deal_id = $1
            "#,
        )
        .bind(deal_id)
        .bind(paid_amount)
        .bind(status.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow!("Failed to update deal: {}", e)))?;

        Ok(())
    }
}
