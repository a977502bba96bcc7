pub mod deal;
pub mod gateway_settings;
pub mod invoice;
pub mod payment;
pub mod plan;
pub mod subscription;

pub use deal::{CreateDeal, Deal, DealStatus};
pub use gateway_settings::{GatewaySettings, GatewayTuning, UpsertGatewaySettings};
pub use invoice::{CreateInvoice, Invoice, InvoiceStatus, InvoiceType, LineItem, LineItems};
pub use payment::{NewPayment, Payment, PaymentStatus};
pub use plan::{CreatePlan, PaymentFrequency, PaymentPlan, PlanStatus};
pub use subscription::{BillingCycle, CreateSubscription, RecurringPayment, SubscriptionStatus};
