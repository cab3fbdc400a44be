//! Endpoint Rotation
//!
//! Payment endpoints (addresses, invoices) are replaced after use so that
//! several payments cannot be linked to the same identifier. Each payment
//! method carries its own policy and use counter.
//!
//! # Rotation Policies
//!
//! - **OnUse**: Rotate after every payment (best privacy)
//! - **AfterUses**: Rotate once the use count reaches the threshold
//! - **Manual**: No automatic rotation
//!
//! # Example
//!
//! ```ignore
//! use paykit_autopay::rotation::{RotationController, RotationPolicy};
//!
//! let controller = RotationController::new(store, keys);
//! controller
//!     .update_method_settings("onchain", RotationPolicy::AfterUses, 5)
//!     .await?;
//!
//! // After a payment went out, count the use and rotate if due
//! if let Some(endpoint) = controller.on_payment_executed("onchain", &publisher).await? {
//!     println!("new endpoint: {}", endpoint.endpoint);
//! }
//! ```

mod controller;
mod policies;

pub use controller::RotationController;
pub use policies::{
    MethodRotationSettings, RotationConfig, RotationEvent, RotationPolicy, RotationReason,
};
